//! Unified error handling for gateway services
//!
//! Library crates keep their own error enums; services convert them into
//! [`GatewayError`] at the boundary.

use modbus_driver::{EngineError, SchemaError, TransportError};
use thiserror::Error;

// ============================================================================
// GatewayError - Main error type
// ============================================================================

/// Main error type for gateway services
#[derive(Debug, Error)]
pub enum GatewayError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Config load error: {0}")]
    ConfigLoad(Box<figment::Error>),

    // ======================================
    // Driver Errors
    // ======================================
    #[error("Driver error: {path}: {source}")]
    Driver {
        path: String,
        #[source]
        source: SchemaError,
    },

    // ======================================
    // Device & Communication Errors
    // ======================================
    #[error("Device {device}: {source}")]
    Device {
        device: String,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Device retired: {0}")]
    DeviceRetired(String),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using GatewayError
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error category, used for log fields and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Protocol,
    Connection,
    Timeout,
    Internal,
}

impl GatewayError {
    pub fn driver(path: impl Into<String>, source: SchemaError) -> Self {
        Self::Driver {
            path: path.into(),
            source,
        }
    }

    pub fn device(device: impl Into<String>, source: EngineError) -> Self {
        Self::Device {
            device: device.into(),
            source,
        }
    }

    /// Short machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::ConfigLoad(_) => "CONFIG_LOAD_ERROR",
            Self::Driver { .. } => "DRIVER_ERROR",
            Self::Device { .. } => "DEVICE_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::DeviceRetired(_) => "DEVICE_RETIRED",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::ChannelClosed(_) => "CHANNEL_CLOSED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_)
            | Self::InvalidConfig { .. }
            | Self::ConfigLoad(_)
            | Self::Driver { .. } => ErrorCategory::Configuration,
            Self::Transport(e) => transport_category(e),
            Self::Device { source, .. } => match source {
                EngineError::Transport(e) => transport_category(e),
                EngineError::MissingInput { .. } | EngineError::WrongInput { .. } => {
                    ErrorCategory::Configuration
                },
            },
            Self::DeviceRetired(_) => ErrorCategory::Connection,
            Self::Io(_)
            | Self::Serialization(_)
            | Self::StartupFailed(_)
            | Self::ChannelClosed(_)
            | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether polling the device again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout
        )
    }
}

fn transport_category(err: &TransportError) -> ErrorCategory {
    match err {
        TransportError::Timeout(_) => ErrorCategory::Timeout,
        TransportError::Connection(_) | TransportError::Io(_) | TransportError::NotOpen => {
            ErrorCategory::Connection
        },
        TransportError::Protocol(_) | TransportError::Exception { .. } => ErrorCategory::Protocol,
    }
}

impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::GatewayError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::GatewayError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! invalid_config {
    ($field:expr, $($arg:tt)*) => {
        $crate::GatewayError::InvalidConfig {
            field: $field.to_string(),
            reason: format!($($arg)*),
        }
    };
}
