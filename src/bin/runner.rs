//! Stream runner CLI.
//!
//! Loads a TOML program, runs one worker per source until every source is
//! exhausted or Ctrl-C arrives, then drains and closes everything.

use anyhow::{bail, Context};
use clap::Parser;
use rustream::engine::{Engine, WorkerExit};
use rustream::expr::{EnvDataSource, JsonDataSource};
use rustream::metrics::MetricsCatalog;
use rustream::registry::ComponentRegistry;
use rustream::{panic_handler, Config};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "rustream-runner")]
#[command(about = "Run a rule-based stream processing program")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/rustream.toml")]
    config: String,

    /// Log at debug level regardless of the configured level
    #[arg(short, long)]
    verbose: bool,

    /// Print the Prometheus exposition after shutdown
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    config.validate().context("invalid configuration")?;

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        config.logging.tracing_level()?
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(config.logging.ansi)
        .init();

    panic_handler::install_panic_hook();

    info!("Loaded configuration from {}", cli.config);

    let variables = JsonDataSource::new("variables", config.variables.clone());
    let env = EnvDataSource::new();
    let program = ComponentRegistry::with_builtins()
        .build_program(&config.program, &[&variables, &env])
        .context("failed to build program")?;

    let metrics = MetricsCatalog::new(&config.metrics)?;
    let mut engine = Engine::new(Arc::new(program), config.engine.clone(), Arc::clone(&metrics));
    engine.add_data_source(Arc::new(variables));
    engine.start()?;

    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("failed to listen for Ctrl+C")?;
                info!("Received shutdown signal (Ctrl+C)");
                break;
            }
            _ = ticker.tick() => {
                if !engine.is_running() {
                    info!("All workers finished");
                    break;
                }
            }
        }
    }

    let reports = tokio::task::spawn_blocking(move || engine.shutdown()).await??;

    if cli.print_metrics {
        println!("{}", metrics.gather_text()?);
    }

    let mut crashed = 0;
    for report in &reports {
        match &report.exit {
            WorkerExit::Error(_) | WorkerExit::Panicked(_) => {
                error!("Source '{}' terminated abnormally: {:?}", report.source, report.exit);
                crashed += 1;
            }
            WorkerExit::Failed | WorkerExit::Io(_) => {
                warn!("Source '{}' stopped early: {:?}", report.source, report.exit)
            }
            WorkerExit::Eof | WorkerExit::Interrupted => {}
        }
    }
    if crashed > 0 {
        bail!("{} of {} worker(s) terminated abnormally", crashed, reports.len());
    }

    Ok(())
}
