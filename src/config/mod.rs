//! Configuration system
//!
//! Two layers:
//! - ~/.config/deskport/config.yaml for HTTP and export tuning (optional)
//! - Per-connector credentials from environment variables (required, fail fast)

mod credentials;
mod deskport_config;
pub mod validation;

pub use credentials::ConnectorCredentials;
pub use deskport_config::{DeskportConfig, ExportConfig, HttpConfig};
pub use validation::{validate_config, validate_config_result, ValidationError};
