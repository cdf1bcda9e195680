//! Report consumer
//!
//! Drains device reports, converts them to telemetry records and emits each
//! record as a JSON line at debug level.

use crate::config::SiteInfo;
use crate::poller::DeviceReport;
use crate::report::TelemetryRecord;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub reports: u64,
    pub metrics: u64,
    pub point_errors: u64,
}

pub struct ReportSink {
    site: SiteInfo,
    rx: mpsc::Receiver<DeviceReport>,
    stats: SinkStats,
}

impl ReportSink {
    pub fn new(site: SiteInfo, rx: mpsc::Receiver<DeviceReport>) -> Self {
        Self {
            site,
            rx,
            stats: SinkStats::default(),
        }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) -> SinkStats {
        while let Some(report) = self.rx.recv().await {
            self.handle(&report);
        }
        info!(
            "Sink closed: {} reports, {} metrics",
            self.stats.reports, self.stats.metrics
        );
        self.stats
    }

    fn handle(&mut self, report: &DeviceReport) {
        let record = TelemetryRecord::from_report(&self.site, report);
        info!(
            "{}: {} metrics, {} errors",
            report.serial_number,
            record.metrics.len(),
            report.errors.len()
        );
        for (point, e) in &report.errors {
            debug!("{} {}: {}", report.serial_number, point, e);
        }
        match record.to_json_line() {
            Ok(line) => debug!("{}", line),
            Err(e) => warn!("{}: encode failed: {}", report.serial_number, e),
        }

        self.stats.reports += 1;
        self.stats.metrics += record.metrics.len() as u64;
        self.stats.point_errors += report.errors.len() as u64;
    }
}
