//! Fund Monitor: entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use fund_monitor::MonitorConfig;
use fund_monitor_cli::cli;
use fund_monitor_cli::cli::discover_cmd::DiscoverOptions;
use fund_monitor_cli::cli::scrape_cmd::ScrapeOptions;

#[derive(Parser)]
#[command(
    name = "fund-monitor",
    about = "Fund Monitor: discover, scrape and track changes in a fund catalog",
    version,
    after_help = "Credentials are read from FUNDSQUARE_USERNAME and FUNDSQUARE_PASSWORD.\nOther settings come from FUND_MONITOR_* variables; flags override them."
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Directory for snapshots, reports and the run journal.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Root of the monthly archive.
    #[arg(long, global = true)]
    archive_dir: Option<PathBuf>,

    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Args, Clone, Default)]
struct DiscoverArgs {
    /// Service provider roster (columns Category, Value, Text).
    #[arg(long)]
    roster: Option<PathBuf>,
    /// Skip the ISIN country-code searches.
    #[arg(long)]
    no_isin_patterns: bool,
    /// Skip the legal structure searches.
    #[arg(long)]
    no_legal_structures: bool,
    /// Pause after each search, in milliseconds.
    #[arg(long)]
    request_delay_ms: Option<u64>,
}

impl DiscoverArgs {
    fn options(&self) -> DiscoverOptions {
        DiscoverOptions {
            roster: self.roster.clone(),
            skip_isin_patterns: self.no_isin_patterns,
            skip_legal_structures: self.no_legal_structures,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Discover fund identifiers through catalog searches
    Discover {
        #[command(flatten)]
        args: DiscoverArgs,
    },
    /// Extract fund records for a list of identifiers
    Scrape {
        /// Identifier list (column URLs, Fundsquare_URL or the first column)
        #[arg(long)]
        urls: Option<PathBuf>,
        /// Run discovery first and merge its identifiers with --urls
        #[arg(long)]
        discover: bool,
        #[command(flatten)]
        discover_args: DiscoverArgs,
        /// Skip this many identifiers of the merged list
        #[arg(long, default_value = "0")]
        start_index: usize,
        /// Scrape at most this many identifiers
        #[arg(long)]
        max_items: Option<usize>,
        /// Identifiers per chunk
        #[arg(long)]
        batch_size: Option<usize>,
        /// Re-authenticate after this many records within a chunk (0 disables)
        #[arg(long)]
        relogin_every: Option<usize>,
        /// Pause after each record, in milliseconds
        #[arg(long)]
        extract_delay_ms: Option<u64>,
        /// Run chunks on several browser sessions at once
        #[arg(long)]
        parallel: bool,
        /// Upper bound on parallel sessions
        #[arg(long)]
        max_workers: Option<usize>,
        /// Archive the result and compare it with the previous month
        #[arg(long)]
        monthly: bool,
    },
    /// Compare two snapshots and write change reports
    Compare {
        /// Newer snapshot
        current: PathBuf,
        /// Older snapshot
        previous: PathBuf,
        /// Where to write the reports (default: <output-dir>/changes)
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Archive a snapshot for this month and compare it with last month
    Monthly {
        /// Snapshot to archive
        snapshot: PathBuf,
        /// Period label YYYY_MM (default: current month)
        #[arg(long)]
        period: Option<String>,
    },
    /// Print the archived snapshot of the month before --period
    PreviousPeriod {
        /// Period label YYYY_MM (default: current month)
        #[arg(long)]
        period: Option<String>,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var(cli::output::JSON_VAR, "1");
    }
    if cli.quiet {
        std::env::set_var(cli::output::QUIET_VAR, "1");
    }
    init_logging(&cli.log_level, cli.log_format);

    let mut config = MonitorConfig::from_env();
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if let Some(dir) = cli.archive_dir {
        config.archive_dir = dir;
    }

    let result = match cli.command {
        Commands::Discover { args } => {
            config.request_delay = cli::override_ms(config.request_delay, args.request_delay_ms);
            cli::discover_cmd::run(&config, &args.options()).await
        }
        Commands::Scrape {
            urls,
            discover,
            discover_args,
            start_index,
            max_items,
            batch_size,
            relogin_every,
            extract_delay_ms,
            parallel,
            max_workers,
            monthly,
        } => {
            if let Some(size) = batch_size {
                config.batch_size = size.max(1);
            }
            if let Some(every) = relogin_every {
                config.relogin_every = every;
            }
            config.extract_delay = cli::override_ms(config.extract_delay, extract_delay_ms);
            config.request_delay =
                cli::override_ms(config.request_delay, discover_args.request_delay_ms);
            let options = ScrapeOptions {
                urls,
                discover,
                discover_options: discover_args.options(),
                start_index,
                max_items,
                parallel,
                max_workers,
                monthly,
            };
            cli::scrape_cmd::run(&config, &options).await
        }
        Commands::Compare {
            current,
            previous,
            report_dir,
        } => cli::compare_cmd::run(&config, &current, &previous, report_dir).await,
        Commands::Monthly { snapshot, period } => {
            cli::monthly_cmd::run(&config, &snapshot, period.as_deref()).await
        }
        Commands::PreviousPeriod { period } => {
            cli::previous_cmd::run(&config, period.as_deref()).await
        }
        Commands::Doctor => cli::doctor::run(&config).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "fund-monitor", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        tracing::error!("{e:#}");
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else if !cli::output::is_quiet() {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
