mod chain;
mod config;
mod expiry;
mod notify;
mod recipient;
mod signals;
mod watch;

use chain::RpcChainReader;
use clap::Parser;
use config::{ConfigError, Overrides, Settings, WatchtowerConfig};
use notify::SmtpSink;
use recipient::SettingsStore;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use watch::{FatalError, WatchLoop, WatchOutcome};

/// Expired and notified (whether or not delivery succeeded).
pub const EXIT_NOTIFIED: i32 = 0;
/// Unexpected failure inside the watch loop before expiry was acted on.
pub const EXIT_FATAL: i32 = 1;
/// Configuration or startup connectivity failure; the loop never ran.
pub const EXIT_CONFIG: i32 = 2;
/// Stopped by a signal before expiry.
pub const EXIT_STOPPED: i32 = 130;

/// A dead man's switch watchtower: polls a contract's `lastactive()`
/// timestamp and emails the beneficiary once the inactivity timeout passes.
#[derive(Parser, Debug)]
#[command(name = "watchtower", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "watchtower.toml")]
    config: PathBuf,

    /// Beneficiary email address (overrides env, config, and saved settings)
    #[arg(short, long)]
    email: Option<String>,

    /// RPC endpoint URL (overrides RPC_URL)
    #[arg(long)]
    rpc_url: Option<String>,

    /// Contract address (overrides CONTRACT_ADDRESS)
    #[arg(long)]
    contract: Option<String>,

    /// Inactivity timeout in seconds (overrides TIMEOUT)
    #[arg(long, allow_negative_numbers = true)]
    timeout: Option<i64>,

    /// Seconds between polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Where a prompted beneficiary address is saved
    #[arg(long, default_value_os_t = SettingsStore::default_path())]
    settings_file: PathBuf,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (RPC requests, SMTP submission)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "watchtower=debug"
    } else if cli.quiet {
        "watchtower=warn"
    } else {
        "watchtower=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let settings = match load_settings(&cli) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "configuration error, not starting");
            return EXIT_CONFIG;
        }
    };

    if cli.dry_run {
        println!("watchtower v{}", env!("CARGO_PKG_VERSION"));
        println!("{}", settings.summary());
        println!("Dry run mode: config validated, not running.");
        return EXIT_NOTIFIED;
    }

    let reader = match RpcChainReader::connect(&settings).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "startup check failed, not starting");
            return EXIT_CONFIG;
        }
    };
    let sink = SmtpSink::new(&settings);

    tracing::info!(
        contract = %settings.contract_address,
        timeout_secs = settings.timeout_secs,
        poll_interval_secs = settings.poll_interval.as_secs(),
        beneficiary = %sink.recipient(),
        "watchtower active"
    );

    let mut stop = signals::install();
    let handle = tokio::spawn(async move {
        let mut watch = WatchLoop::new(&settings, reader, sink);
        watch.run(&mut stop).await
    });
    exit_code(join_watch(handle).await)
}

/// A panic inside the watch task surfaces as a `JoinError`; treat it as fatal.
async fn join_watch(
    handle: JoinHandle<Result<WatchOutcome, FatalError>>,
) -> Result<WatchOutcome, FatalError> {
    match handle.await {
        Ok(r) => r,
        Err(e) => Err(FatalError::Panicked {
            detail: e.to_string(),
        }),
    }
}

fn exit_code(result: Result<WatchOutcome, FatalError>) -> i32 {
    match result {
        Ok(WatchOutcome::Notified { delivered }) => {
            if !delivered {
                tracing::warn!("deadline passed but the notification was not delivered");
            }
            EXIT_NOTIFIED
        }
        Ok(WatchOutcome::Stopped) => EXIT_STOPPED,
        Err(e) => {
            tracing::error!(error = %e, "fatal error, watch aborted without notifying");
            EXIT_FATAL
        }
    }
}

/// File, then environment, then flags; the beneficiary last since it may prompt.
fn load_settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let mut config = WatchtowerConfig::load(&cli.config)?;
    config.apply_env(|name| std::env::var(name).ok())?;
    config.apply_overrides(&Overrides {
        rpc_url: cli.rpc_url.clone(),
        contract_address: cli.contract.clone(),
        timeout_secs: cli.timeout,
        poll_interval_secs: cli.poll_interval,
    });
    config.check_required()?;

    let store = SettingsStore::new(&cli.settings_file);
    let beneficiary = recipient::resolve(
        cli.email.as_deref(),
        config.email.beneficiary.as_deref(),
        &store,
        std::io::stdin().lock(),
        std::io::stdout(),
    )?;

    Settings::resolve(config, beneficiary)
}
