//! Environment readiness check.

use anyhow::Result;
use fund_monitor::config::{PASSWORD_VAR, USERNAME_VAR};
use fund_monitor::{credentials_from_env, worker_count, MonitorConfig, ResourceProbe};
use serde_json::json;

use super::output;
use crate::renderer::chromium::{find_chromium, CHROMIUM_PATH_VAR};
use crate::site::SiteProfile;

/// Check Chromium, credentials, the site profile and host resources.
pub async fn run(config: &MonitorConfig) -> Result<()> {
    let chromium = find_chromium();
    let credentials = credentials_from_env();
    let profile = SiteProfile::load_or_bundled(config.site_profile.as_deref());
    let probe = ResourceProbe::detect();
    let workers = worker_count(
        probe.total_memory_gb,
        config.session_memory_gb,
        probe.cpu_count,
        usize::MAX,
    );
    let ready = chromium.is_some() && credentials.is_ok() && profile.is_ok();

    if output::is_json() {
        output::print_json(&json!({
            "ready": ready,
            "chromium": chromium,
            "credentials": credentials.is_ok(),
            "site_profile": profile.as_ref().ok().map(|p| p.name.clone()),
            "total_memory_gb": probe.total_memory_gb,
            "cpu_count": probe.cpu_count,
            "max_parallel_workers": workers,
            "output_dir": config.output_dir,
            "archive_dir": config.archive_dir,
        }));
        return Ok(());
    }

    println!("Fund Monitor Doctor");
    println!("===================");
    println!();
    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!("[!!] Chromium NOT found. Install Chrome or set {CHROMIUM_PATH_VAR}."),
    }
    match &credentials {
        Ok(_) => println!("[OK] Credentials set ({USERNAME_VAR})"),
        Err(_) => println!("[!!] Credentials missing. Set {USERNAME_VAR} and {PASSWORD_VAR}."),
    }
    match &profile {
        Ok(p) => println!("[OK] Site profile '{}' ({} fields)", p.name, p.record.fields.len()),
        Err(e) => println!("[!!] Site profile invalid: {e:#}"),
    }
    println!(
        "[OK] {:.1} GB memory, {} CPUs: up to {workers} parallel sessions at {:.1} GB each",
        probe.total_memory_gb, probe.cpu_count, config.session_memory_gb
    );
    println!("     Output:  {}", config.output_dir.display());
    println!("     Archive: {}", config.archive_dir.display());

    println!();
    if ready {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }
    Ok(())
}
