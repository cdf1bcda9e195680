//! Error types for driver loading, point decoding and engine calls

use crate::schema::RegisterKind;
use crate::transport::TransportError;
use thiserror::Error;

/// Failure to decode a single point.
///
/// Decode errors are collected per point and never abort a batch read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The device reported the "not implemented" sentinel for this point
    #[error("{point} is an unimplemented register")]
    UnimplementedRegister { point: String },

    /// The driver declares a data type the decoder does not know
    #[error("{point}: unknown data type '{data_type}'")]
    UnknownDataType { point: String, data_type: String },

    /// Enumeration value without a matching label
    #[error("{point}: value {raw} has no label")]
    UnknownLabel { point: String, raw: u64 },

    /// Requested name is not declared in the register table
    #[error("{point} is not declared in {kind}")]
    UnknownPoint { point: String, kind: RegisterKind },

    /// Device answered with fewer registers than the window asked for
    #[error("{point}: registers missing from device response")]
    MissingRegisters { point: String },

    /// Point spans more registers than one read window allows
    #[error("{point}: {count} registers exceed read window of {max_window}")]
    PointTooLarge {
        point: String,
        count: u16,
        max_window: u16,
    },

    /// Word tuple length does not match the data type width
    #[error("{point}: expected {expected} registers, got {actual}")]
    RegisterCountMismatch {
        point: String,
        expected: usize,
        actual: usize,
    },

    /// Referenced scale factor could not be resolved in this call
    #[error("{point}: scale factor '{scale_factor}' unavailable")]
    ScaleFactorUnavailable { point: String, scale_factor: String },

    /// Scale factor register holds a value outside the exponent range
    #[error("{point}: scale factor value {value} out of range")]
    ScaleFactorOutOfRange { point: String, value: i64 },

    /// String registers are not valid UTF-8
    #[error("{point}: register content is not valid UTF-8")]
    InvalidString { point: String },
}

impl DecodeError {
    /// Name of the point the error belongs to
    pub fn point(&self) -> &str {
        match self {
            Self::UnimplementedRegister { point }
            | Self::UnknownDataType { point, .. }
            | Self::UnknownLabel { point, .. }
            | Self::UnknownPoint { point, .. }
            | Self::MissingRegisters { point }
            | Self::PointTooLarge { point, .. }
            | Self::RegisterCountMismatch { point, .. }
            | Self::ScaleFactorUnavailable { point, .. }
            | Self::ScaleFactorOutOfRange { point, .. }
            | Self::InvalidString { point } => point,
        }
    }

    /// Whether this error only means "no reading available"
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Self::UnimplementedRegister { .. })
    }
}

/// Call-level failure of a [`crate::DeviceEngine`] operation
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required argument was empty or absent
    #[error("{operation}() missing required argument: '{argument}'")]
    MissingInput {
        operation: &'static str,
        argument: &'static str,
    },

    /// An argument was present but cannot be used
    #[error("{operation}() wrong input argument '{argument}': {reason}")]
    WrongInput {
        operation: &'static str,
        argument: &'static str,
        reason: String,
    },

    /// Connection or wire failure, aborts the whole call
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl EngineError {
    /// Whether the failure came from the wire rather than the caller
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Driver document could not be loaded
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("driver document is not valid: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("driver document rejected: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl SchemaError {
    /// Individual validation problems, empty for parse errors
    pub fn problems(&self) -> &[String] {
        match self {
            Self::Parse(_) => &[],
            Self::Invalid(problems) => problems,
        }
    }
}
