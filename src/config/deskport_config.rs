//! Deskport settings file handling
//!
//! Loads ~/.config/deskport/config.yaml. Every section has defaults, so a
//! missing file is not an error; credentials never live here (see
//! `credentials`).

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP behaviour shared by every connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per call when the platform answers 429
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep used when a 429 carries no usable Retry-After header
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,

    /// Upper bound for a single Retry-After sleep
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_after_secs() -> u64 {
    10
}

fn default_max_retry_after_secs() -> u64 {
    300
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            default_retry_after_secs: default_retry_after_secs(),
            max_retry_after_secs: default_max_retry_after_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Export tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Records requested per page (connectors with a fixed page size ignore it)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Safety valve against pagination that never terminates
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    10_000
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

/// Deskport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeskportConfig {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

impl DeskportConfig {
    /// Load from the default path, falling back to defaults when it is absent
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::DeskportError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading deskport configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            page_size = config.export.page_size,
            max_attempts = config.http.max_attempts,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/deskport/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("deskport");
        path.push("config.yaml");
        path
    }
}
