//! RidePool CLI binary
//!
//! Commands for writing and validating configuration, plus a scripted demo
//! session that drives a lobby from creation to archival.

mod demo;

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use config::{generate_default_config, load_config, save_config, validate_config, LogFormatKind};
use observability::{init_logging, LogFormat};
use std::path::Path;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Init { output } => {
            init_logging("poolx", LogFormat::Pretty)?;
            info!("Executing 'init' command");
            init_command(output)
        }
        Commands::Validate { config } => {
            init_logging("poolx", LogFormat::Pretty)?;
            info!("Executing 'validate' command");
            validate_command(config)
        }
        Commands::Demo {
            config,
            seed,
            passengers,
        } => {
            // logging format comes from the config file, so load it first
            let config = match config {
                Some(path) => load_config(path)?,
                None => generate_default_config(),
            };
            init_logging(&config.service.name, log_format(config.logging.format))?;
            debug!(?config, "Configuration resolved");
            demo::run(config, seed, passengers).await
        }
    }
}

pub(crate) fn log_format(kind: LogFormatKind) -> LogFormat {
    match kind {
        LogFormatKind::Pretty => LogFormat::Pretty,
        LogFormatKind::Json => LogFormat::Json,
        LogFormatKind::Compact => LogFormat::Compact,
    }
}

fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Service: {}", config.service.name);
    println!(
        "Passengers per lobby: default {}, limit {}",
        config.matching.default_max_passengers, config.matching.max_passengers_limit
    );
    println!(
        "Match tolerance: {} km",
        config.matching.default_max_distance_km
    );
    match config.matching.approval_timeout_secs {
        Some(secs) => println!("Approval timeout: {}s", secs),
        None => println!("Approval timeout: disabled"),
    }
    println!("Route provider: {}", config.routing.provider.as_str());

    Ok(())
}

fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Edit the matching and routing sections");
    println!(
        "  2. Run 'poolx validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  3. Run 'poolx demo --config {:?}' to walk a lobby through a full ride",
        output_path
    );

    Ok(())
}
