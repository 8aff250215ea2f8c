use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transcode::Dimensions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the persisted state: database, originals and converted bitmaps.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Panel width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,

    /// Panel height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,

    /// Shortest time a photo stays on the panel.
    #[serde(default = "default_min_display_secs")]
    pub min_display_secs: u64,

    /// Longest time a photo stays on the panel.
    #[serde(default = "default_max_display_secs")]
    pub max_display_secs: u64,

    /// Delay after an idle cycle or a failure.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Drive the real panel through `command` instead of logging.
    #[serde(default)]
    pub hardware: bool,

    /// Program (and arguments) that receives the bitmap on stdin,
    /// e.g. `["/usr/local/bin/epd-show"]`.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    480
}

fn default_min_display_secs() -> u64 {
    8 * 3600
}

fn default_max_display_secs() -> u64 {
    12 * 3600
}

fn default_backoff_secs() -> u64 {
    60
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            min_display_secs: default_min_display_secs(),
            max_display_secs: default_max_display_secs(),
            backoff_secs: default_backoff_secs(),
            hardware: false,
            command: None,
        }
    }
}

impl DisplayConfig {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    pub fn min_display(&self) -> Duration {
        Duration::from_secs(self.min_display_secs)
    }

    pub fn max_display(&self) -> Duration {
        Duration::from_secs(self.max_display_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    /// Whether hardware output is enabled, honouring the
    /// `ENABLE_HARDWARE_DISPLAY` environment override.
    pub fn hardware_enabled(&self) -> bool {
        match std::env::var("ENABLE_HARDWARE_DISPLAY") {
            Ok(value) => value.eq_ignore_ascii_case("true"),
            Err(_) => self.hardware,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_allowed_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "heif", "heic", "bmp", "pdf"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Write daily rolling log files here instead of stderr.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inkframe")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            display: DisplayConfig::default(),
            upload: UploadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when no
    /// file exists there.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.display.width == 0 || self.display.height == 0 {
            bail!(
                "display dimensions must be non-zero, got {}x{}",
                self.display.width,
                self.display.height
            );
        }
        if self.display.min_display_secs > self.display.max_display_secs {
            bail!(
                "display.min_display_secs ({}) exceeds display.max_display_secs ({})",
                self.display.min_display_secs,
                self.display.max_display_secs
            );
        }
        if self.display.backoff_secs == 0 {
            bail!("display.backoff_secs must be at least 1");
        }
        Ok(())
    }

    /// `INKFRAME_CONFIG` if set, otherwise `$XDG_CONFIG_HOME/inkframe/config.toml`.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("INKFRAME_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("inkframe")
            .join("config.toml")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("photos.db")
    }

    pub fn originals_dir(&self) -> PathBuf {
        self.data_dir.join("originals")
    }

    pub fn display_dir(&self) -> PathBuf {
        self.data_dir.join("display")
    }
}
