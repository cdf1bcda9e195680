//! Modbus RTU transport over a serial line

use super::frame;
use super::{Transport, TransportError, WireRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info};

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line parameters
#[derive(Debug, Clone)]
pub struct SerialParams {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Bound on each request/response exchange
    pub timeout: Duration,
}

impl SerialParams {
    /// 9600 8N1
    pub fn new(device: impl Into<String>, timeout: Duration) -> Self {
        Self {
            device: device.into(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            timeout,
        }
    }
}

/// One serial port shared by every slave on the line
#[derive(Debug)]
pub struct RtuTransport {
    params: SerialParams,
    label: String,
    port: Option<SerialStream>,
}

impl RtuTransport {
    pub fn new(params: SerialParams) -> Self {
        Self {
            label: format!("rtu://{}", params.device),
            params,
            port: None,
        }
    }
}

#[async_trait]
impl Transport for RtuTransport {
    fn name(&self) -> &str {
        &self.label
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let params = &self.params;
        debug!("RTU: {} @{}baud", params.device, params.baud_rate);

        let parity = match params.parity {
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::None => tokio_serial::Parity::None,
        };
        let data_bits = match params.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let stop_bits = match params.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        match tokio_serial::new(&params.device, params.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(params.timeout)
            .open_native_async()
        {
            Ok(port) => {
                info!("RTU opened: {}", params.device);
                self.port = Some(port);
                Ok(())
            },
            Err(e) => {
                error!("RTU err: {} - {}", params.device, e);
                Err(TransportError::Connection(format!(
                    "Failed to open serial port {}: {e}",
                    params.device
                )))
            },
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            debug!("RTU closed: {}", self.params.device);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn execute(&mut self, request: WireRequest) -> Result<Vec<u16>, TransportError> {
        let timeout_duration = self.params.timeout;
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;

        let pdu = frame::build_pdu(&request);
        let request_frame = frame::encode_rtu(request.slave_id, &pdu);

        let response = match exchange(port, &request_frame, timeout_duration).await {
            Ok(response) => response,
            Err(e) => {
                self.port = None;
                return Err(e);
            },
        };

        let response_pdu = frame::decode_rtu(&response, request.slave_id)?;
        frame::parse_response(response_pdu, &request)
    }
}

async fn exchange(
    port: &mut SerialStream,
    request: &[u8],
    timeout_duration: Duration,
) -> Result<Vec<u8>, TransportError> {
    port.write_all(request).await.map_err(|e| {
        error!("RTU TX: {}", e);
        TransportError::Io(format!("Serial send error: {e}"))
    })?;
    port.flush().await.map_err(|e| {
        error!("RTU flush: {}", e);
        TransportError::Io(format!("Serial flush error: {e}"))
    })?;
    debug!("RTU TX: {}B", request.len());

    read_frame(port, timeout_duration).await
}

/// Read until the frame length implied by its header has arrived
async fn read_frame(
    port: &mut SerialStream,
    timeout_duration: Duration,
) -> Result<Vec<u8>, TransportError> {
    let deadline = Instant::now() + timeout_duration;
    let mut buffer = Vec::with_capacity(frame::MAX_RTU_FRAME);
    let mut chunk = [0u8; 128];

    loop {
        if let Some(expected) = frame::expected_rtu_len(&buffer) {
            if buffer.len() >= expected {
                buffer.truncate(expected);
                debug!("RTU RX: {}B", buffer.len());
                return Ok(buffer);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("RTU timeout: {}B", buffer.len());
            return Err(TransportError::Timeout(format!(
                "RTU frame incomplete: {}B received",
                buffer.len()
            )));
        }

        match timeout(remaining, port.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                error!("RTU closed");
                return Err(TransportError::Connection(
                    "Serial connection closed".to_string(),
                ));
            },
            Ok(Ok(n)) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > frame::MAX_RTU_FRAME {
                    error!("RTU overflow: {}B", buffer.len());
                    return Err(TransportError::Protocol(
                        "RTU frame exceeds maximum size".to_string(),
                    ));
                }
            },
            Ok(Err(e)) => {
                error!("RTU RX: {}", e);
                return Err(TransportError::Io(format!("Serial read error: {e}")));
            },
            Err(_) => {
                debug!("RTU timeout: {}B", buffer.len());
                return Err(TransportError::Timeout(format!(
                    "RTU frame incomplete: {}B received",
                    buffer.len()
                )));
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_serial_defaults() {
        let params = SerialParams::new("/dev/ttyUSB0", Duration::from_secs(5));
        assert_eq!(params.baud_rate, 9600);
        assert_eq!(params.data_bits, 8);
        assert_eq!(params.stop_bits, 1);
        assert_eq!(params.parity, Parity::None);
    }

    #[test]
    fn test_label() {
        let transport = RtuTransport::new(SerialParams::new(
            "/dev/ttyUSB0",
            Duration::from_secs(5),
        ));
        assert_eq!(transport.name(), "rtu:///dev/ttyUSB0");
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let mut transport = RtuTransport::new(SerialParams::new(
            "/dev/does-not-exist-pollsrv",
            Duration::from_millis(100),
        ));
        assert!(matches!(
            transport.open().await,
            Err(TransportError::Connection(_))
        ));
    }
}
