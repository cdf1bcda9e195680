//! Wire transports
//!
//! A transport executes one Modbus request at a time. Engines never own a
//! transport directly: they go through a [`BusHandle`], which serializes every
//! call on the physical link. TCP devices get a dedicated handle, all RTU
//! devices of a serial line share one.

pub mod frame;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
#[cfg(feature = "rtu")]
pub mod rtu;
#[cfg(feature = "tcp")]
pub mod tcp;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Transport layer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Modbus exception {code:#04x} on FC{function:02X}: {description}")]
    Exception {
        function: u8,
        code: u8,
        description: &'static str,
    },

    #[error("Transport not open")]
    NotOpen,
}

impl TransportError {
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function,
            code,
            description: frame::exception_description(code),
        }
    }
}

/// Function codes used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            _ => None,
        }
    }

    pub fn is_read(self) -> bool {
        matches!(self, Self::ReadHoldingRegisters | Self::ReadInputRegisters)
    }
}

/// Value written to switch a coil on
pub const COIL_ON: u16 = 0xFF00;

/// One request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireRequest {
    pub slave_id: u8,
    pub function: FunctionCode,
    /// Wire address (driver offset already applied)
    pub address: u16,
    /// Register count for reads, value for writes
    pub quantity_or_value: u16,
}

impl WireRequest {
    pub fn read(slave_id: u8, function: FunctionCode, address: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity_or_value: quantity,
        }
    }

    pub fn write_register(slave_id: u8, address: u16, value: u16) -> Self {
        Self {
            slave_id,
            function: FunctionCode::WriteSingleRegister,
            address,
            quantity_or_value: value,
        }
    }

    pub fn write_coil(slave_id: u8, address: u16, on: bool) -> Self {
        Self {
            slave_id,
            function: FunctionCode::WriteSingleCoil,
            address,
            quantity_or_value: if on { COIL_ON } else { 0 },
        }
    }
}

/// Connection to one Modbus link
///
/// `execute` returns the register words for reads and the echoed
/// `[address, value]` pair for writes.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn open(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    async fn execute(&mut self, request: WireRequest) -> Result<Vec<u16>, TransportError>;
}

/// Open if closed, execute, close if open
///
/// The link is closed after every exchange, also when the exchange failed, so
/// one faulty device cannot keep a shared line busy between calls.
pub async fn transact(
    transport: &mut dyn Transport,
    request: WireRequest,
) -> Result<Vec<u16>, TransportError> {
    if !transport.is_open() {
        transport.open().await?;
    }
    let result = transport.execute(request).await;
    if transport.is_open() {
        if let Err(e) = transport.close().await {
            warn!("{} close: {}", transport.name(), e);
        }
    }
    result
}

struct BusInner {
    label: String,
    shared: bool,
    transport: Mutex<Box<dyn Transport>>,
}

/// Lockable handle to one transport
///
/// Cloning the handle shares the transport and its lock.
#[derive(Clone)]
pub struct BusHandle {
    inner: Arc<BusInner>,
}

pub type BusGuard<'a> = MutexGuard<'a, Box<dyn Transport>>;

impl BusHandle {
    /// Handle for a transport used by a single engine
    pub fn dedicated<T: Transport + 'static>(transport: T) -> Self {
        Self::build(Box::new(transport), false)
    }

    /// Handle to be cloned into every engine on the same line
    pub fn shared<T: Transport + 'static>(transport: T) -> Self {
        Self::build(Box::new(transport), true)
    }

    fn build(transport: Box<dyn Transport>, shared: bool) -> Self {
        Self {
            inner: Arc::new(BusInner {
                label: transport.name().to_string(),
                shared,
                transport: Mutex::new(transport),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_shared(&self) -> bool {
        self.inner.shared
    }

    /// Exclusive access to the transport until the guard is dropped
    pub async fn lock(&self) -> BusGuard<'_> {
        self.inner.transport.lock().await
    }

    pub fn same_bus(&self, other: &BusHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusHandle")
            .field("label", &self.inner.label)
            .field("shared", &self.inner.shared)
            .finish()
    }
}
