//! Modbus TCP transport

use super::frame;
use super::{Transport, TransportError, WireRequest};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Default Modbus TCP port
pub const DEFAULT_PORT: u16 = 502;

/// Connection parameters
#[derive(Debug, Clone)]
pub struct TcpParams {
    pub host: String,
    pub port: u16,
    /// Bound on connect and on each request/response exchange
    pub timeout: Duration,
}

impl TcpParams {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One TCP connection with MBAP framing
#[derive(Debug)]
pub struct TcpTransport {
    params: TcpParams,
    label: String,
    stream: Option<TcpStream>,
    transaction_id: u16,
}

impl TcpTransport {
    pub fn new(params: TcpParams) -> Self {
        Self {
            label: format!("tcp://{}", params.address()),
            params,
            stream: None,
            transaction_id: 0,
        }
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &str {
        &self.label
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let addr = self.params.address();
        debug!("TCP connecting: {}", addr);

        match timeout(self.params.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                self.stream = Some(stream);
                Ok(())
            },
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", addr, e);
                Err(TransportError::Connection(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(TransportError::Timeout(format!(
                    "Connection to {addr} timed out"
                )))
            },
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("TCP shutdown: {}", e);
            }
            debug!("TCP closed: {}", self.params.address());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn execute(&mut self, request: WireRequest) -> Result<Vec<u16>, TransportError> {
        let transaction_id = self.next_transaction_id();
        let timeout_duration = self.params.timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;

        let pdu = frame::build_pdu(&request);
        let request_frame = frame::encode_tcp(transaction_id, request.slave_id, &pdu);

        let response = match exchange(stream, &request_frame, timeout_duration).await {
            Ok(response) => response,
            Err(e) => {
                // Stream state is unknown after a failed exchange
                self.stream = None;
                return Err(e);
            },
        };

        let response_pdu = frame::decode_tcp(&response, transaction_id, request.slave_id)?;
        frame::parse_response(response_pdu, &request)
    }
}

async fn exchange(
    stream: &mut TcpStream,
    request: &[u8],
    timeout_duration: Duration,
) -> Result<Vec<u8>, TransportError> {
    match timeout(timeout_duration, stream.write_all(request)).await {
        Ok(Ok(())) => debug!("TCP TX: {}B", request.len()),
        Ok(Err(e)) => {
            error!("TCP TX: {}", e);
            return Err(TransportError::Io(format!("TCP send error: {e}")));
        },
        Err(_) => return Err(TransportError::Timeout("TCP send timeout".to_string())),
    }

    let mut header = [0u8; frame::MBAP_HEADER_LEN];
    match timeout(timeout_duration, stream.read_exact(&mut header)).await {
        Ok(Ok(_)) => {},
        Ok(Err(e)) => {
            error!("TCP header RX: {}", e);
            return Err(TransportError::Io(format!("TCP header read error: {e}")));
        },
        Err(_) => {
            debug!("TCP header timeout");
            return Err(TransportError::Timeout(
                "TCP header read timeout".to_string(),
            ));
        },
    }

    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
    if length < 2 || length > frame::MAX_MBAP_LENGTH {
        error!("TCP invalid len: {}", length);
        return Err(TransportError::Protocol(format!(
            "Invalid TCP frame length: {length}"
        )));
    }

    let mut response = vec![0u8; frame::MBAP_HEADER_LEN + length];
    response[..frame::MBAP_HEADER_LEN].copy_from_slice(&header);
    match timeout(
        timeout_duration,
        stream.read_exact(&mut response[frame::MBAP_HEADER_LEN..]),
    )
    .await
    {
        Ok(Ok(_)) => {
            debug!("TCP RX: {}B", response.len());
            Ok(response)
        },
        Ok(Err(e)) => {
            error!("TCP PDU RX: {}", e);
            Err(TransportError::Io(format!("TCP PDU read error: {e}")))
        },
        Err(_) => {
            debug!("TCP PDU timeout");
            Err(TransportError::Timeout("TCP PDU read timeout".to_string()))
        },
    }
}
