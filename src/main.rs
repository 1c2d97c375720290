//! trackman: run a workflow of shell steps
//!
//! `trackman run -f workflow.yml` executes every step in order, printing
//! lifecycle events to stdout and child output to the log on stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trackman::domain::duration::parse_duration;
use trackman::services::{ConsoleNotifier, NotificationManager, SpinnerSink};
use trackman::{RunnerConfig, Workflow, WorkflowOptions};

#[derive(Debug, Parser)]
#[command(name = "trackman", version, about = "Run a workflow of shell steps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the given workflow
    Run {
        /// Workflow file to run
        #[arg(short = 'f', long = "file")]
        file: PathBuf,

        /// Default step timeout (e.g. 30s, 5m)
        #[arg(long)]
        timeout: Option<String>,

        /// Mirror child output to the terminal
        #[arg(long)]
        echo: bool,
    },
    /// Run the probe of one step
    Probe {
        /// Workflow file containing the step
        #[arg(short = 'f', long = "file")]
        file: PathBuf,

        /// Step whose probe to run
        #[arg(short, long)]
        step: String,
    },
}

/// Initialize logging with RUST_LOG environment variable support
fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn workflow_options(
    config: &RunnerConfig,
    manager: &Arc<NotificationManager>,
    timeout: Option<&str>,
    echo: bool,
) -> Result<WorkflowOptions> {
    let timeout = match timeout {
        Some(raw) => parse_duration(raw).map_err(anyhow::Error::msg)?,
        None => config.runner.default_timeout,
    };

    let mut options = WorkflowOptions::new()
        .with_manager(Arc::clone(manager))
        .with_timeout(timeout);
    if echo || config.runner.echo_output {
        options = options.with_sink(SpinnerSink::stdio());
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RunnerConfig::load(std::env::current_dir().ok().as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config.log.filter);

    let manager = Arc::new(
        NotificationManager::new(vec![ConsoleNotifier::shared()])
            .with_delivery_timeout(config.notify.delivery_timeout),
    );
    manager.start().await;

    // Interrupts cancel the root token so running children are killed
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if trackman::signals::wait_for_shutdown_signal().await.is_ok() {
                tracing::warn!("Received an interrupt, stopping services...");
                cancel.cancel();
                manager.stop().await;
            }
        });
    }

    let result = match cli.command {
        Commands::Run {
            file,
            timeout,
            echo,
        } => {
            let options = workflow_options(&config, &manager, timeout.as_deref(), echo)?;
            let workflow = Workflow::from_path(&file, options)
                .with_context(|| format!("Failed to load workflow {}", file.display()))?;
            workflow.run(&cancel).await
        }
        Commands::Probe { file, step } => {
            let options = workflow_options(&config, &manager, None, false)?;
            let workflow = Workflow::from_path(&file, options)
                .with_context(|| format!("Failed to load workflow {}", file.display()))?;
            workflow.run_probe(&step, &cancel).await
        }
    };

    manager.close().await;
    result?;

    tracing::info!("Done");
    Ok(())
}
