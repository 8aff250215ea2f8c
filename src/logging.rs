//! Logging configuration with journald support on Linux.
//!
//! Under systemd the frame logs to the journal. Otherwise logs go to a daily
//! rolling file when a log directory is configured, or to stderr.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// Log level is controlled via the `INKFRAME_LOG` environment variable
/// (e.g. `INKFRAME_LOG=debug` or `INKFRAME_LOG=inkframe=debug,tower_http=warn`).
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("INKFRAME_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));

    #[cfg(target_os = "linux")]
    {
        // JOURNAL_STREAM is only set when stderr is connected to the journal
        if std::env::var_os("JOURNAL_STREAM").is_some() {
            if let Ok(journald_layer) = tracing_journald::layer() {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(journald_layer)
                    .try_init()?;

                tracing::info!("Logging initialized with journald backend");
                return Ok(());
            }
        }
    }

    if let Some(log_dir) = log_dir {
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = tracing_appender::rolling::daily(&log_dir, "inkframe.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Dropping the guard would stop the writer thread
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .try_init()?;

        tracing::info!("Logging initialized with file backend at {:?}", log_dir);
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
