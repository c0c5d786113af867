// FILE: src/main.rs
mod config;
mod console;
mod emotion;
mod error;
mod supervisor;
mod utils;

use crate::config::Config;
use crate::console::{spawn_stdin_reader, Console, ConsoleInput};
use crate::supervisor::bridge::event_bridge;
use crate::supervisor::presentation::{run_presentation, ConsoleLog};
use crate::utils::path_utils::resolve_worker_path;
use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

/// Supervise a line-oriented worker program from an interactive console.
#[derive(Debug, Parser)]
#[command(name = "tiny-agent", version, about)]
struct Cli {
    /// Path to the worker program (run directly, or through WORKER_INTERPRETER).
    worker: String,
}

fn setup_logging(log_level_str: &str, log_file: Option<&Path>) -> Result<()> {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tiny_agent={}", level)));

    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json();

    // stdout belongs to the presentation log; diagnostics go elsewhere.
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing::subscriber::set_global_default(builder.with_writer(Mutex::new(file)).finish())
                .context("Failed to set tracing subscriber")?;
        }
        None => {
            tracing::subscriber::set_global_default(builder.with_writer(std::io::stderr).finish())
                .context("Failed to set tracing subscriber")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Nothing is spawned for a worker path that does not exist.
    if let Err(e) = resolve_worker_path(&cli.worker) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.worker)?;
    setup_logging(&config.log_level, config.log_file.as_deref())?;

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), worker = %config.worker, "Starting tiny-agent");
    tracing::debug!("Loaded configuration: {:?}", config);

    let (events, receiver) = event_bridge();
    let console = Console::from_config(&config, events);

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(input_tx.clone()).context("Failed to start the input reader")?;
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if input_tx.send(ConsoleInput::Interrupt).is_err() {
                break;
            }
        }
    });

    let console_task = tokio::spawn(console.run(input_rx));

    let mut log = ConsoleLog::new(std::io::stdout());
    let rendered = run_presentation(receiver, &mut log).await;
    tracing::debug!(rendered, "Presentation log closed");

    console_task.await.context("Console task failed")?;
    tracing::info!("Session ended.");
    Ok(())
}
