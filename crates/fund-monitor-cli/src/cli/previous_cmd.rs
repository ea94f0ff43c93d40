//! `fund-monitor previous-period`: locate last month's archived snapshot.

use anyhow::{Context, Result};
use fund_monitor::{MonitorConfig, MonthlyArchiver, PeriodLabel};
use serde_json::json;

use super::output;

pub async fn run(config: &MonitorConfig, period: Option<&str>) -> Result<()> {
    let period = match period {
        Some(label) => label.parse::<PeriodLabel>().context("invalid --period")?,
        None => PeriodLabel::current(),
    };
    let archiver = MonthlyArchiver::new(&config.archive_dir);
    let found = archiver.find_previous_period(Some(period))?;

    if output::is_json() {
        output::print_json(&json!({
            "period": period.to_string(),
            "previous_period": period.previous().to_string(),
            "snapshot": found,
        }));
        return Ok(());
    }

    match found {
        Some(path) => println!("{}", path.display()),
        None => output::line(format!(
            "No snapshot archived for {} under {}",
            period.previous(),
            archiver.base_dir().display()
        )),
    }
    Ok(())
}
