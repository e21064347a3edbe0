use anyhow::Context;
use clap::Parser;
use procwatch::cli::{render_report, Cli, Commands};
use procwatch::config::{write_default_config, AppConfig, LoadedConfig};
use procwatch::coordination::{install_signal_handlers, GracefulShutdown};
use procwatch::logging::{init_logging, init_logging_simple};
use procwatch::supervisor::MonitorLoop;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command() {
        Commands::InitConfig { force } => {
            init_logging_simple();
            match init_config(&cli.config, force) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    ExitCode::FAILURE
                }
            }
        }
        command => {
            let loaded = match AppConfig::load_or_create(&cli.config) {
                Ok(loaded) => loaded,
                Err(e) => {
                    init_logging_simple();
                    error!("Critical error: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            // Flushes the file writer when dropped
            let guard = init_logging(&loaded.config.logging);
            report_config(&loaded);

            let code = match command {
                Commands::Once { json } => run_once(&loaded.config, json).await,
                _ => run_daemon(&loaded.config).await,
            };

            drop(guard);
            code
        }
    }
}

fn report_config(loaded: &LoadedConfig) {
    if loaded.created {
        warn!("Configuration file {} not found.", loaded.path.display());
        info!(
            "Created default configuration file at {}",
            loaded.path.display()
        );
    } else {
        info!("Loaded configuration from {}", loaded.path.display());
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    write_default_config(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn run_daemon(config: &AppConfig) -> ExitCode {
    let shutdown = Arc::new(GracefulShutdown::new());
    install_signal_handlers(shutdown.clone());

    let monitor = MonitorLoop::from_config(config, shutdown.token());
    monitor.run().await;

    info!("Process Monitor stopped by user");
    ExitCode::SUCCESS
}

async fn run_once(config: &AppConfig, json: bool) -> ExitCode {
    let shutdown = Arc::new(GracefulShutdown::new());
    install_signal_handlers(shutdown.clone());

    let monitor = MonitorLoop::from_config(config, shutdown.token());
    let report = monitor.run_cycle().await;

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to serialize cycle report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", render_report(&report));
    }

    if report.datastore_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
