//! inkframe server: HTTP uploads plus the rotation engine in one process.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use inkframe::config::Config;
use inkframe::db::Database;
use inkframe::library::PhotoLibrary;
use inkframe::rotation::{RotationEngine, RotationTiming};
use inkframe::server::{create_router, AppState};
use inkframe::{display, logging};

fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("inkframe {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config_path
}

fn print_help() {
    println!(
        r#"inkframe - e-ink photo frame server

USAGE:
    inkframe [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    INKFRAME_CONFIG            Path to config file (overrides default location)
    INKFRAME_LOG               Log filter (e.g. info, inkframe=debug)
    ENABLE_HARDWARE_DISPLAY    true/false, overrides display.hardware

Config file location: $XDG_CONFIG_HOME/inkframe/config.toml

See also: inkframe-rotate --help"#
    );
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_args();

    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    logging::init(config.logging.dir.clone())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "inkframe starting");

    let db = Database::open(&config.db_path())
        .with_context(|| format!("failed to open database at {}", config.db_path().display()))?;
    db.initialize().context("failed to initialize database")?;
    tracing::info!("Database opened at {:?}", config.db_path());

    let sink = display::from_config(&config.display);
    tracing::info!(sink = sink.name(), "Display sink ready");

    let library = Arc::new(
        PhotoLibrary::new(Arc::new(db), sink, &config)
            .context("failed to prepare photo directories")?,
    );

    let engine = RotationEngine::new(library.clone(), RotationTiming::from(&config.display));
    let rotation = engine.spawn();

    let addr = config.server.bind_addr();
    let state = AppState::new(library, Arc::new(config)).with_engine(rotation.subscribe());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!("Listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    rotation.shutdown().await;
    served.context("server error")?;

    tracing::info!("inkframe stopped");
    Ok(())
}
