//! Matchmaker configuration
//!
//! Settings live in a JSON file using the same keys render node operators
//! already use (`HttpPort`, `MatchmakerPort`, ...). Missing keys take their
//! defaults; a missing file is created holding the defaults so it can be
//! edited in place.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default port clients use to reach the allocation endpoints
pub const DEFAULT_HTTP_PORT: u16 = 90;

/// Default public HTTPS port used when redirecting plain HTTP
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Default port render nodes open their control connection to
pub const DEFAULT_MATCHMAKER_PORT: u16 = 9999;

/// Directory that receives log files when `LogToFile` is on
pub const LOG_DIRECTORY: &str = "./logs";

/// Errors for configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(String),
}

/// Runtime settings for the matchmaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakerConfig {
    /// Port for the client-facing HTTP endpoints
    #[serde(rename = "HttpPort")]
    pub http_port: u16,

    /// Redirect plain HTTP requests to HTTPS
    #[serde(rename = "UseHTTPS")]
    pub use_https: bool,

    /// Public HTTPS port (omitted from redirect URLs when 443)
    #[serde(rename = "HttpsPort")]
    pub https_port: u16,

    /// Port for render node control connections
    #[serde(rename = "MatchmakerPort")]
    pub matchmaker_port: u16,

    /// Also write logs to `./logs`
    #[serde(rename = "LogToFile")]
    pub log_to_file: bool,

    /// Serve `GET /signallingserver`
    #[serde(rename = "EnableRESTAPI")]
    pub enable_rest_api: bool,

    /// Serve the redirect endpoints `/` and `/custom_html/{file}`
    #[serde(rename = "EnableRedirectionLinks")]
    pub enable_redirection_links: bool,
}

impl Default for MatchmakerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            use_https: false,
            https_port: DEFAULT_HTTPS_PORT,
            matchmaker_port: DEFAULT_MATCHMAKER_PORT,
            log_to_file: true,
            enable_rest_api: true,
            enable_redirection_links: true,
        }
    }
}

impl MatchmakerConfig {
    /// Apply command-line or environment overrides
    pub fn with_overrides(mut self, http_port: Option<u16>, matchmaker_port: Option<u16>) -> Self {
        if let Some(port) = http_port {
            self.http_port = port;
        }
        if let Some(port) = matchmaker_port {
            self.matchmaker_port = port;
        }
        self
    }
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Parse config JSON, filling unset keys with defaults.
pub fn parse_config(content: &str) -> Result<MatchmakerConfig, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Render a config as the pretty JSON written to disk.
pub fn render_config(config: &MatchmakerConfig) -> Result<String, ConfigError> {
    serde_json::to_string_pretty(config).map_err(|e| ConfigError::ParseError(e.to_string()))
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load the config file, creating it with defaults if it does not exist.
pub fn load_or_init_config(path: &Path) -> Result<MatchmakerConfig, ConfigError> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        return parse_config(&content);
    }

    let config = MatchmakerConfig::default();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_config(&config)?)?;
    Ok(config)
}
