//! Common command-line arguments for gateway services
//!
//! Services flatten [`ServiceArgs`] into their own parser.

#[cfg(feature = "cli")]
use clap::Args;
use std::path::PathBuf;

/// Common service startup arguments
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[cfg_attr(feature = "cli", clap(short = 'l', long, default_value = "info"))]
    pub log_level: String,

    /// Directory for rolling log files
    #[cfg_attr(feature = "cli", clap(long, env = "GATEWAY_LOG_DIR"))]
    pub log_dir: Option<PathBuf>,

    /// Write file logs as JSON lines
    #[cfg_attr(feature = "cli", clap(long))]
    pub json_logs: bool,

    /// Only validate configuration without starting service
    #[cfg_attr(feature = "cli", clap(long))]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            json_logs: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}
