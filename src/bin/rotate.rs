//! inkframe rotation engine without the HTTP server.
//!
//! Runs the conversion and rotation loop against the shared photo database,
//! for frames where uploads reach the data directory some other way.
//!
//! ## Usage
//!
//! ```bash
//! inkframe-rotate              # Run in foreground until Ctrl-C
//! inkframe-rotate --once       # Convert pending photos, show one, exit
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use inkframe::config::Config;
use inkframe::db::Database;
use inkframe::library::PhotoLibrary;
use inkframe::rotation::{CycleOutcome, RotationEngine, RotationTiming};
use inkframe::{display, logging};

#[derive(Default)]
struct RotateArgs {
    /// Run one cycle and exit
    once: bool,
    /// Config path override
    config_path: Option<PathBuf>,
}

fn parse_args() -> RotateArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = RotateArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                parsed.once = true;
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"inkframe-rotate - Rotation engine for the inkframe photo frame

USAGE:
    inkframe-rotate [OPTIONS]

OPTIONS:
    --once, -1          Convert pending photos, display one and exit
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    INKFRAME_CONFIG            Path to config file (overrides default location)
    INKFRAME_LOG               Log filter (e.g. info, inkframe=debug)
    ENABLE_HARDWARE_DISPLAY    true/false, overrides display.hardware
"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    logging::init(config.logging.dir.clone())?;
    info!("inkframe rotation engine starting...");

    let db = Database::open(&config.db_path())
        .with_context(|| format!("failed to open database at {}", config.db_path().display()))?;
    db.initialize().context("failed to initialize database")?;
    info!("Database opened at {:?}", config.db_path());

    let library = Arc::new(
        PhotoLibrary::new(Arc::new(db), display::from_config(&config.display), &config)
            .context("failed to prepare photo directories")?,
    );
    let engine = RotationEngine::new(library, RotationTiming::from(&config.display));

    if args.once {
        info!("Running in single-shot mode");
        match engine.run_cycle().await {
            CycleOutcome::Displayed { photo_id, .. } => info!(photo_id, "Displayed one photo"),
            CycleOutcome::Idle => info!("No converted photos to display"),
            CycleOutcome::RenderFailed(e) | CycleOutcome::Failed(e) => {
                warn!(error = %e, "Rotation cycle failed");
                anyhow::bail!("rotation cycle failed: {}", e);
            }
        }
    } else {
        let handle = engine.spawn();
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        info!("Shutdown signal received");
        handle.shutdown().await;
    }

    info!("inkframe rotation engine stopped");
    Ok(())
}
