use clap::Parser;
use dblogtail::cli::run::{self, Mode};
use dblogtail::config::{build_config, resolve_config_path, DbType, OutputTarget, Overrides};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dblogtail")]
#[command(version, about = "Tail and backfill managed database logs", long_about = None)]
struct Cli {
    /// Instance to read logs from
    #[arg(short = 'i', long)]
    identifier: Option<String>,

    /// Database type: mysql or postgresql
    #[arg(long, value_parser = parse_db_type)]
    dbtype: Option<DbType>,

    /// Log file name prefix (defaults per database type)
    #[arg(short = 'f', long = "log_file")]
    log_file: Option<String>,

    /// Download every matching log file instead of tailing
    #[arg(short = 'd', long)]
    download: bool,

    /// Directory for downloads and file output
    #[arg(long = "download_dir")]
    download_dir: Option<PathBuf>,

    /// Lines requested per live fetch
    #[arg(long = "num_lines")]
    num_lines: Option<u64>,

    /// Seconds to wait after a rate-limit response
    #[arg(long = "backoff_timer")]
    backoff_timer: Option<u64>,

    /// Output target: stdout or file
    #[arg(short = 'o', long, value_parser = parse_output)]
    output: Option<OutputTarget>,

    /// Emit structured JSON records for the MySQL slow log
    #[arg(long)]
    formatter: bool,

    /// Replace query text with its SHA-256 digest
    #[arg(long = "scrub_query")]
    scrub_query: bool,

    /// Persist the read position and backfill on restart
    #[arg(long)]
    tracker: bool,

    /// Base URL of the log API gateway
    #[arg(long = "api_url")]
    api_url: Option<String>,

    /// Config file path
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Print the default config and exit
    #[arg(long = "write-default-config")]
    write_default_config: bool,

    /// Debug logging
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            instance: self.identifier.clone(),
            db_type: self.dbtype,
            log_file: self.log_file.clone(),
            num_lines: self.num_lines,
            output: self.output,
            download_dir: self.download_dir.clone(),
            formatter: self.formatter,
            scrub_query: self.scrub_query,
            tracker: self.tracker,
            backoff: self.backoff_timer.map(Duration::from_secs),
            api_url: self.api_url.clone(),
            debug: self.debug,
        }
    }
}

fn parse_db_type(value: &str) -> Result<DbType, String> {
    DbType::parse(value).ok_or_else(|| format!("unknown database type '{}', expected mysql or postgresql", value))
}

fn parse_output(value: &str) -> Result<OutputTarget, String> {
    OutputTarget::parse(value).ok_or_else(|| format!("unknown output '{}', expected stdout or file", value))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.write_default_config {
        run::write_default_config()?;
        return Ok(());
    }

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = match build_config(config_path.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Logs go to stderr; stdout carries only log data.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("dblogtail={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone(), config.timing.shutdown_grace);

    let mode = if cli.download { Mode::Download } else { Mode::Stream };
    if let Err(e) = run::run(config, mode, cancel).await {
        error!(error = %e, "Run failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Cancel on SIGINT/SIGTERM; exit hard if shutdown takes longer than `grace`.
fn spawn_signal_handler(cancel: CancellationToken, grace: Duration) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping");
        cancel.cancel();

        tokio::time::sleep(grace).await;
        error!(grace_secs = grace.as_secs(), "Graceful shutdown timed out, exiting");
        std::process::exit(1);
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
