//! In-memory transport for tests and dry runs
//!
//! The register map and the call log live behind a [`MockHandle`] that stays
//! usable after the transport itself has been moved into a [`super::BusHandle`].

use super::{FunctionCode, Transport, TransportError, WireRequest, COIL_ON};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct MockState {
    input: Mutex<HashMap<u16, u16>>,
    holding: Mutex<HashMap<u16, u16>>,
    coils: Mutex<HashMap<u16, bool>>,
    requests: Mutex<Vec<WireRequest>>,
    failures: Mutex<VecDeque<TransportError>>,
    truncate_to: Mutex<Option<usize>>,
    latency: Mutex<Duration>,
    fail_open: AtomicBool,
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl MockState {
    fn respond(&self, request: &WireRequest) -> Result<Vec<u16>, TransportError> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        match request.function {
            FunctionCode::ReadInputRegisters | FunctionCode::ReadHoldingRegisters => {
                let map = if request.function == FunctionCode::ReadInputRegisters {
                    self.input.lock()
                } else {
                    self.holding.lock()
                };
                let mut words: Vec<u16> = (0..request.quantity_or_value)
                    .map(|i| {
                        map.get(&request.address.wrapping_add(i))
                            .copied()
                            .unwrap_or(0)
                    })
                    .collect();
                if let Some(limit) = *self.truncate_to.lock() {
                    words.truncate(limit);
                }
                Ok(words)
            },
            FunctionCode::WriteSingleRegister => {
                self.holding
                    .lock()
                    .insert(request.address, request.quantity_or_value);
                Ok(vec![request.address, request.quantity_or_value])
            },
            FunctionCode::WriteSingleCoil => {
                self.coils
                    .lock()
                    .insert(request.address, request.quantity_or_value == COIL_ON);
                Ok(vec![request.address, request.quantity_or_value])
            },
        }
    }
}

/// Test-side view of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<MockState>,
}

impl MockHandle {
    /// Store `words` at consecutive wire addresses starting at `address`
    pub fn set_input_registers(&self, address: u16, words: &[u16]) {
        let mut map = self.state.input.lock();
        for (i, &word) in words.iter().enumerate() {
            map.insert(address.wrapping_add(i as u16), word);
        }
    }

    pub fn set_holding_registers(&self, address: u16, words: &[u16]) {
        let mut map = self.state.holding.lock();
        for (i, &word) in words.iter().enumerate() {
            map.insert(address.wrapping_add(i as u16), word);
        }
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.state.holding.lock().get(&address).copied()
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.state.coils.lock().get(&address).copied()
    }

    /// Fail the next exchange with `err`; queued errors are used in order
    pub fn fail_next(&self, err: TransportError) {
        self.state.failures.lock().push_back(err);
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Answer reads with at most `limit` registers
    pub fn truncate_reads(&self, limit: Option<usize>) {
        *self.state.truncate_to.lock() = limit;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    /// Every request executed so far, in order
    pub fn requests(&self) -> Vec<WireRequest> {
        self.state.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    /// Times an exchange started while another was still running
    pub fn overlap_count(&self) -> usize {
        self.state.overlaps.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

/// Transport answering from an in-memory register map
#[derive(Debug)]
pub struct MockTransport {
    label: String,
    open: bool,
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            open: false,
            state: Arc::new(MockState::default()),
        }
    }

    /// Second transport backed by the same register map and call log
    pub fn sibling(&self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            open: false,
            state: Arc::clone(&self.state),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.label
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Connection(format!(
                "{} refused",
                self.label
            )));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.open {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            self.open = false;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn execute(&mut self, request: WireRequest) -> Result<Vec<u16>, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }

        let state = Arc::clone(&self.state);
        if state.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            state.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        state.requests.lock().push(request);

        let latency = *state.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = state.respond(&request);
        state.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug!(
            "{} FC{:02X} @{} x{}: {}",
            self.label,
            request.function.code(),
            request.address,
            request.quantity_or_value,
            if result.is_ok() { "ok" } else { "err" }
        );
        result
    }
}
