//! Schema-driven Modbus register decoding and read batching
//!
//! A driver document ([`DriverSchema`]) describes the points of one device model.
//! A [`DeviceEngine`] turns a list of point names into as few register reads as
//! possible, runs them over a [`BusHandle`] and decodes the returned words with
//! a [`DecodeStrategy`].
//!
//! # Features
//!
//! - `tcp` (default): Modbus TCP transport
//! - `rtu`: Modbus RTU transport over a serial line
//! - `test-utils`: in-memory [`MockTransport`] for tests

pub mod engine;
pub mod error;
pub mod planner;
pub mod preprocess;
pub mod schema;
pub mod strategy;
pub mod transport;
pub mod value;

pub use engine::{
    DeviceEngine, EngineConfig, ReadOutcome, ScaleFactorPolicy, WriteCommand, WriteTarget,
};
pub use error::{DecodeError, EngineError, SchemaError};
pub use planner::{AddressWindow, WindowPlanner, DEFAULT_MAX_WINDOW};
pub use schema::{
    DataType, DriverSchema, Endian, LabelTable, PointDefinition, PointTable, RegisterKind,
    ScaleFactorRef, MAX_READ_REGISTERS,
};
pub use strategy::{
    DecodeStrategy, DecoderKind, RawDecoder, RawPoint, ReadableDecoder, MAX_SCALE_FACTOR,
};
pub use transport::{BusHandle, FunctionCode, Transport, TransportError, WireRequest};
pub use value::{Value, ValueContainer};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::mock::{MockHandle, MockTransport};
#[cfg(feature = "rtu")]
pub use transport::rtu::{Parity, RtuTransport, SerialParams};
#[cfg(feature = "tcp")]
pub use transport::tcp::{TcpParams, TcpTransport};
