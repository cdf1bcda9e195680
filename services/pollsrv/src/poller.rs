//! Per-device polling tasks
//!
//! Each device runs in its own task: read the selected input registers, then
//! the holding registers, and forward one merged report per cycle. A device
//! whose transport keeps failing is retired.

use crate::config::{DeviceConfig, PollingConfig};
use crate::registry::DeviceEntry;
use chrono::{DateTime, Utc};
use errors::GatewayError;
use modbus_driver::{DeviceEngine, ReadOutcome, RegisterKind, ValueContainer};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Readings of one device from one polling cycle
#[derive(Debug, Clone)]
pub struct DeviceReport {
    pub serial_number: String,
    pub model: String,
    pub manufacturer: String,
    pub slave_id: u8,
    pub timestamp: DateTime<Utc>,
    pub readings: HashMap<String, ValueContainer>,
    /// Per-point failures, rendered
    pub errors: HashMap<String, String>,
}

impl DeviceReport {
    fn new(device: &DeviceConfig, outcome: ReadOutcome) -> Self {
        Self {
            serial_number: device.serial_number.clone(),
            model: device.model.clone(),
            manufacturer: device.manufacturer.clone(),
            slave_id: device.slave_id,
            timestamp: Utc::now(),
            readings: outcome.values,
            errors: outcome
                .errors
                .into_iter()
                .map(|(point, e)| (point, e.to_string()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty() && self.errors.is_empty()
    }
}

/// Consecutive failure counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHealth {
    consecutive_errors: u32,
    max_errors: u32,
}

impl DeviceHealth {
    pub fn new(max_errors: u32) -> Self {
        Self {
            consecutive_errors: 0,
            max_errors,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Count a failed cycle; true once the device should be retired
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.is_retired()
    }

    pub fn is_retired(&self) -> bool {
        self.consecutive_errors >= self.max_errors
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}

/// Result of one cycle
#[derive(Debug)]
pub struct PollCycle {
    pub report: DeviceReport,
    /// First failed read of the cycle, if any
    pub failure: Option<GatewayError>,
}

/// Why a poll task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    Cancelled,
    Retired,
    ChannelClosed,
}

pub struct DevicePoller {
    device: DeviceConfig,
    engine: DeviceEngine,
    interval: Duration,
    health: DeviceHealth,
    tx: mpsc::Sender<DeviceReport>,
}

impl DevicePoller {
    pub fn new(
        entry: DeviceEntry,
        polling: &PollingConfig,
        tx: mpsc::Sender<DeviceReport>,
    ) -> Self {
        Self {
            device: entry.config,
            engine: entry.engine,
            interval: polling.interval(),
            health: DeviceHealth::new(polling.max_errors),
            tx,
        }
    }

    pub fn serial_number(&self) -> &str {
        &self.device.serial_number
    }

    pub fn health(&self) -> DeviceHealth {
        self.health
    }

    /// Read input then holding registers and merge the results
    ///
    /// A failure on one register type does not skip the other.
    pub async fn poll_once(&self) -> PollCycle {
        let mut outcome = ReadOutcome::default();
        let mut failure = None;

        let selections = [
            (RegisterKind::Input, &self.device.points.input_registers),
            (RegisterKind::Holding, &self.device.points.holding_registers),
        ];
        for (kind, names) in selections {
            if names.is_empty() {
                continue;
            }
            match self.engine.read(names, kind).await {
                Ok(read) => outcome.merge(read),
                Err(e) => {
                    let err = GatewayError::device(&self.device.serial_number, e);
                    if err.is_retryable() {
                        warn!("{} [{}]", err, err.error_code());
                    } else {
                        // Device answered, but not the way the driver expects
                        error!("{} [{}, {:?}]", err, err.error_code(), err.category());
                    }
                    failure.get_or_insert(err);
                },
            }
        }

        PollCycle {
            report: DeviceReport::new(&self.device, outcome),
            failure,
        }
    }

    /// Poll until cancelled, retired, or the report channel closes
    pub async fn run(mut self, cancel: CancellationToken) -> PollExit {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Polling {} every {:?}",
            self.device.serial_number, self.interval
        );

        let exit = loop {
            tokio::select! {
                () = cancel.cancelled() => break PollExit::Cancelled,
                _ = ticker.tick() => {},
            }

            let cycle = self.poll_once().await;
            let failed = cycle.failure.is_some();

            if !cycle.report.is_empty() && self.tx.send(cycle.report).await.is_err() {
                warn!(
                    "{}",
                    GatewayError::ChannelClosed(format!("reports of {}", self.device.serial_number))
                );
                break PollExit::ChannelClosed;
            }

            if !failed {
                self.health.record_success();
                continue;
            }
            if self.health.record_failure() {
                error!(
                    "{} after {} failed cycles",
                    GatewayError::DeviceRetired(self.device.serial_number.clone()),
                    self.health.consecutive_errors()
                );
                break PollExit::Retired;
            }
            debug!(
                "{}: {}/{} errors",
                self.device.serial_number,
                self.health.consecutive_errors(),
                self.health.max_errors
            );
        };

        if let Err(e) = self.engine.close().await {
            debug!("{} close: {}", self.device.serial_number, e);
        }
        exit
    }
}

/// Spawn one poll task per device
pub fn spawn_all(
    devices: Vec<DeviceEntry>,
    polling: &PollingConfig,
    tx: &mpsc::Sender<DeviceReport>,
    cancel: &CancellationToken,
) -> Vec<(String, JoinHandle<PollExit>)> {
    devices
        .into_iter()
        .map(|entry| {
            let poller = DevicePoller::new(entry, polling, tx.clone());
            let serial = poller.serial_number().to_string();
            let handle = tokio::spawn(poller.run(cancel.child_token()));
            (serial, handle)
        })
        .collect()
}
