//! Display sinks: where converted bitmaps end up.
//!
//! The panel driver itself lives outside this crate. A sink either logs what
//! it would show ([`MockSink`]) or hands the bitmap to an external helper
//! program on stdin ([`CommandSink`]).

use std::io::Write;
use std::process::{Command, Stdio};

use crate::config::DisplayConfig;
use crate::error::{Error, Result};

/// Capability interface over an e-ink panel.
pub trait DisplaySink: Send {
    /// Show a complete 1-bit BMP.
    fn render(&mut self, bitmap: &[u8]) -> Result<()>;

    /// Blank the panel.
    fn clear(&mut self) -> Result<()>;

    /// Put the panel into its low-power state.
    fn sleep(&mut self) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Logs instead of driving hardware. Always succeeds.
#[derive(Debug, Default)]
pub struct MockSink;

impl MockSink {
    pub fn new() -> Self {
        Self
    }
}

impl DisplaySink for MockSink {
    fn render(&mut self, bitmap: &[u8]) -> Result<()> {
        tracing::info!(bytes = bitmap.len(), "MOCK: would display image");
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        tracing::info!("MOCK: would clear display");
        Ok(())
    }

    fn sleep(&mut self) -> Result<()> {
        tracing::debug!("MOCK: would put display to sleep");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Pipes bitmaps into an external panel helper.
///
/// `render` runs `program args...` with the BMP on stdin; `clear` and
/// `sleep` run it with an extra `--clear` / `--sleep` argument and empty
/// stdin. A non-zero exit status is a render failure.
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a `[program, args...]` list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    fn run(&self, extra_arg: Option<&str>, stdin_data: &[u8]) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(extra_arg)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::RenderFailed(format!("failed to start {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A helper that exits early closes the pipe; its exit status
            // decides the outcome.
            if let Err(e) = stdin.write_all(stdin_data) {
                tracing::debug!(error = %e, "Display helper closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::RenderFailed(format!("failed to wait for {}: {}", self.program, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::RenderFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}

impl DisplaySink for CommandSink {
    fn render(&mut self, bitmap: &[u8]) -> Result<()> {
        tracing::info!(program = %self.program, bytes = bitmap.len(), "Sending image to display");
        self.run(None, bitmap)
    }

    fn clear(&mut self) -> Result<()> {
        self.run(Some("--clear"), &[])
    }

    fn sleep(&mut self) -> Result<()> {
        self.run(Some("--sleep"), &[])
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Pick the sink the configuration asks for.
pub fn from_config(config: &DisplayConfig) -> Box<dyn DisplaySink> {
    if !config.hardware_enabled() {
        return Box::new(MockSink::new());
    }

    match config.command.as_deref().and_then(CommandSink::from_argv) {
        Some(sink) => {
            tracing::info!(program = %sink.program, "Hardware display enabled");
            Box::new(sink)
        }
        None => {
            tracing::warn!("Hardware display requested but display.command is not set, using mock");
            Box::new(MockSink::new())
        }
    }
}
