//! Telemetry records for the downstream pipeline
//!
//! Metric names and units are sanitized and each reading gets the metric kind
//! the pipeline stores it under.

use crate::config::SiteInfo;
use crate::poller::DeviceReport;
use modbus_driver::{DataType, Value, ValueContainer};
use serde::Serialize;
use tracing::debug;

/// Storage slot of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Str,
    Enum16,
    Enum32,
    Bitfield16,
    Bitfield32,
}

/// Metric kind of a decoded reading
///
/// Floats and text go by value; everything else by declared data type.
/// `None` for types the pipeline has no slot for.
pub fn metric_kind(reading: &ValueContainer) -> Option<MetricKind> {
    match reading.value() {
        Value::Float(_) => return Some(MetricKind::Float),
        Value::Text(_) => return Some(MetricKind::Str),
        _ => {},
    }
    let kind = match reading.data_type() {
        DataType::Bitfield16 => MetricKind::Bitfield16,
        DataType::Bitfield32 => MetricKind::Bitfield32,
        DataType::Enum16 => MetricKind::Enum16,
        DataType::Enum32 => MetricKind::Enum32,
        DataType::Int16 | DataType::Int32 | DataType::Sunssf => MetricKind::Int32,
        DataType::Uint16 | DataType::Uint32 | DataType::Acc16 | DataType::Acc32 => {
            MetricKind::Uint32
        },
        DataType::Int64 => MetricKind::Int64,
        DataType::Uint64 | DataType::Acc64 => MetricKind::Uint64,
        DataType::Float => MetricKind::Float,
        DataType::String | DataType::Utf8 => MetricKind::Str,
        DataType::Unknown(_) => return None,
    };
    Some(kind)
}

/// Metric-safe form of a point name or unit
///
/// `(` and `)` are dropped, `%` becomes `per_`, spaces, `-` and `/` become `_`.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '(' | ')' => {},
            '%' => out.push_str("per_"),
            ' ' | '-' | '/' => out.push('_'),
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    pub kind: MetricKind,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub device_id: String,
}

/// One device's readings from one cycle, ready to forward
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub site: SiteInfo,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub device: DeviceInfo,
    /// Sorted by metric name
    pub metrics: Vec<Metric>,
}

impl TelemetryRecord {
    pub fn from_report(site: &SiteInfo, report: &DeviceReport) -> Self {
        let mut metrics: Vec<Metric> = report
            .readings
            .iter()
            .filter_map(|(point, reading)| match metric_kind(reading) {
                Some(kind) => Some(Metric {
                    name: sanitize(point),
                    unit: sanitize(reading.unit()),
                    kind,
                    value: reading.value().clone(),
                }),
                None => {
                    debug!("{}: no metric kind for {}", point, reading.data_type());
                    None
                },
            })
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            site: site.clone(),
            timestamp: report.timestamp.timestamp_millis(),
            device: DeviceInfo {
                model: report.model.clone(),
                manufacturer: report.manufacturer.clone(),
                serial_number: report.serial_number.clone(),
                device_id: report.slave_id.to_string(),
            },
            metrics,
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn reading(value: Value, data_type: DataType, unit: &str) -> ValueContainer {
        ValueContainer::new(value, data_type, unit)
    }

    // ========== sanitize() tests ==========

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Temp (Cab)"), "Temp_Cab");
        assert_eq!(sanitize("%"), "per_");
        assert_eq!(sanitize("kW-h/day"), "kW_h_day");
        assert_eq!(sanitize("WH"), "WH");
    }

    // ========== metric_kind() tests ==========

    #[test]
    fn test_kind_by_value_first() {
        let scaled = reading(Value::Float(23.05), DataType::Uint16, "A");
        assert_eq!(metric_kind(&scaled), Some(MetricKind::Float));

        let label = reading(Value::Text("MPPT".into()), DataType::Enum16, "");
        assert_eq!(metric_kind(&label), Some(MetricKind::Str));
    }

    #[test]
    fn test_kind_by_data_type() {
        let cases = [
            (Value::Int(-4), DataType::Int16, MetricKind::Int32),
            (Value::UInt(7), DataType::Acc16, MetricKind::Uint32),
            (Value::UInt(7), DataType::Acc32, MetricKind::Uint32),
            (Value::Int(-7), DataType::Int64, MetricKind::Int64),
            (Value::UInt(7), DataType::Acc64, MetricKind::Uint64),
            (Value::UInt(4), DataType::Enum16, MetricKind::Enum16),
            (Value::UInt(4), DataType::Bitfield32, MetricKind::Bitfield32),
            (
                Value::Labels(vec!["A".into()]),
                DataType::Bitfield16,
                MetricKind::Bitfield16,
            ),
        ];
        for (value, data_type, kind) in cases {
            let r = reading(value, data_type.clone(), "");
            assert_eq!(metric_kind(&r), Some(kind), "{data_type}");
        }
    }

    #[test]
    fn test_unknown_type_has_no_kind() {
        let r = reading(Value::UInt(1), DataType::Unknown("int128".into()), "");
        assert_eq!(metric_kind(&r), None);
    }

    // ========== TelemetryRecord ==========

    #[test]
    fn test_record_from_report() {
        let site = SiteInfo {
            tenant: "acme".to_string(),
            location: "Plant 1".to_string(),
        };
        let mut readings = HashMap::new();
        readings.insert(
            "Temp (Cab)".to_string(),
            reading(Value::Int(-20), DataType::Int16, "C"),
        );
        readings.insert(
            "PF".to_string(),
            reading(Value::Float(98.5), DataType::Int16, "%"),
        );
        readings.insert(
            "Odd".to_string(),
            reading(Value::UInt(0), DataType::Unknown("x".into()), ""),
        );
        let report = DeviceReport {
            serial_number: "SN-1".to_string(),
            model: "SE5000".to_string(),
            manufacturer: "SolarEdge".to_string(),
            slave_id: 3,
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            readings,
            errors: HashMap::new(),
        };

        let record = TelemetryRecord::from_report(&site, &report);
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.device.device_id, "3");
        let names: Vec<&str> = record.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["PF", "Temp_Cab"]);
        assert_eq!(record.metrics[0].unit, "per_");
        assert_eq!(record.metrics[0].kind, MetricKind::Float);
        assert_eq!(record.metrics[1].kind, MetricKind::Int32);

        let json: serde_json::Value = serde_json::from_str(&record.to_json_line().unwrap()).unwrap();
        assert_eq!(json["metrics"][1]["kind"], "int32");
        assert_eq!(json["metrics"][1]["value"], -20);
        assert_eq!(json["site"]["location"], "Plant 1");
    }
}
