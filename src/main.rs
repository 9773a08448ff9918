use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use perflog::{BackendKind, LoggerConfig, Supervisor};

#[derive(Debug, Parser)]
#[command(name = "perflog", version, about = "Host performance logger")]
struct Cli {
    /// Path to a YAML config file.
    #[arg(short, long, env = "PERFLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured database location.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the configured sampling cadence (e.g. `1s`, `250ms`).
    #[arg(long, value_parser = humantime::parse_duration)]
    cadence: Option<Duration>,

    /// Override the configured concurrency backend.
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Collector child process; spawned internally by the process backend.
    #[command(hide = true)]
    Child {
        #[arg(long)]
        db: PathBuf,

        #[arg(long, value_parser = humantime::parse_duration)]
        cadence: Duration,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,perflog=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<LoggerConfig, perflog::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => LoggerConfig::load(path)?,
        None => LoggerConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(cadence) = cli.cadence {
        config.cadence = cadence;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    config.validate()?;
    Ok(config)
}

/// Foreground run: log until interrupted, draining the channel once a
/// second the way an attached UI would.
async fn run(config: LoggerConfig) -> Result<(), perflog::BackendError> {
    let mut supervisor = Supervisor::new(config);
    let channel = supervisor.channel();
    supervisor.start_logging()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping");
                break;
            }
            _ = ticker.tick() => {
                let drained = channel.try_drain();
                if let Some(sample) = drained.last() {
                    tracing::info!(
                        cpu = sample.cpu_usage,
                        memory = sample.memory_usage,
                        gpu = %sample.gpu_usage,
                        buffered = drained.len(),
                        "telemetry"
                    );
                }
            }
        }
    }

    supervisor.stop_logging()
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    if let Some(Command::Child { db, cadence }) = cli.command {
        return match perflog::backend::process::run_child(db, cadence) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "collector child failed");
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "logger failed");
            ExitCode::FAILURE
        }
    }
}
