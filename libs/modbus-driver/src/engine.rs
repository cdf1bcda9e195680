//! Device engine
//!
//! One engine per field device. A read resolves scale-factor dependencies,
//! plans address windows, executes them on the bus and decodes every requested
//! point. Decode problems are reported per point; only caller mistakes and
//! transport failures fail the whole call.

use crate::error::{DecodeError, EngineError};
use crate::planner::{slice_window, with_dependencies, WindowPlanner, DEFAULT_MAX_WINDOW};
use crate::schema::{DataType, DriverSchema, PointDefinition, PointTable, RegisterKind, ScaleFactorRef};
use crate::strategy::{DecodeStrategy, RawPoint};
use crate::transport::{transact, BusHandle, TransportError, WireRequest};
use crate::value::{Value, ValueContainer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// What happens to a point whose named scale factor could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFactorPolicy {
    /// Report `ScaleFactorUnavailable` for the dependent point
    #[default]
    Strict,
    /// Decode the dependent point with scale factor 0
    DefaultToZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Largest register count per read request
    pub max_window: u16,
    pub scale_factor_policy: ScaleFactorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_window: DEFAULT_MAX_WINDOW,
            scale_factor_policy: ScaleFactorPolicy::default(),
        }
    }
}

/// Result of a read: decoded points and per-point failures, keyed by point name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOutcome {
    pub values: HashMap<String, ValueContainer>,
    pub errors: HashMap<String, DecodeError>,
}

impl ReadOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.errors.is_empty()
    }

    /// Fold another outcome into this one; later entries win on name clashes
    pub fn merge(&mut self, other: ReadOutcome) {
        self.values.extend(other.values);
        self.errors.extend(other.errors);
    }
}

/// Register to write, by address or by point name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    Address(u16),
    Point(String),
}

impl From<u16> for WriteTarget {
    fn from(address: u16) -> Self {
        WriteTarget::Address(address)
    }
}

impl From<&str> for WriteTarget {
    fn from(name: &str) -> Self {
        WriteTarget::Point(name.to_string())
    }
}

impl From<String> for WriteTarget {
    fn from(name: String) -> Self {
        WriteTarget::Point(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCommand {
    /// FC06 write single register
    Register(u16),
    /// FC05 write single coil
    Coil(bool),
}

/// Decoding and batching engine for one device
#[derive(Debug, Clone)]
pub struct DeviceEngine {
    slave_id: u8,
    schema: Arc<DriverSchema>,
    decoder: Arc<dyn DecodeStrategy>,
    bus: BusHandle,
    config: EngineConfig,
    planner: WindowPlanner,
}

impl DeviceEngine {
    pub fn new(
        slave_id: u8,
        schema: Arc<DriverSchema>,
        decoder: Arc<dyn DecodeStrategy>,
        bus: BusHandle,
    ) -> Self {
        Self::with_config(slave_id, schema, decoder, bus, EngineConfig::default())
    }

    pub fn with_config(
        slave_id: u8,
        schema: Arc<DriverSchema>,
        decoder: Arc<dyn DecodeStrategy>,
        bus: BusHandle,
        config: EngineConfig,
    ) -> Self {
        Self {
            slave_id,
            schema,
            decoder,
            bus,
            planner: WindowPlanner::new(config.max_window),
            config,
        }
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn schema(&self) -> &Arc<DriverSchema> {
        &self.schema
    }

    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read and decode `point_names` from one register type
    ///
    /// Holds the bus for the whole call. Fails only on an empty request or a
    /// transport error; every per-point problem lands in `errors`.
    pub async fn read<S: AsRef<str>>(
        &self,
        point_names: &[S],
        kind: RegisterKind,
    ) -> Result<ReadOutcome, EngineError> {
        if point_names.is_empty() {
            return Err(EngineError::MissingInput {
                operation: "read",
                argument: "point_names",
            });
        }

        let table = self.schema.points(kind);
        let requested = unique(point_names);
        let mut outcome = ReadOutcome::default();

        for name in requested.iter().filter(|name| !table.contains(name)) {
            outcome.errors.insert(
                name.to_string(),
                DecodeError::UnknownPoint {
                    point: name.to_string(),
                    kind,
                },
            );
        }

        let working = with_dependencies(table, &requested);
        let raw = self.fetch(table, &working).await?;
        let scale_factors = self.resolve_scale_factors(table, &requested, &raw);

        for point in requested.iter().filter_map(|name| table.get(name)) {
            let decoded = match raw.get(&point.name) {
                Some(words) => self.decode_point(point, words, &scale_factors),
                None if !self.planner.fits(point) => Err(DecodeError::PointTooLarge {
                    point: point.name.clone(),
                    count: point.count,
                    max_window: self.planner.max_window(),
                }),
                None => Err(DecodeError::MissingRegisters {
                    point: point.name.clone(),
                }),
            };
            match decoded {
                Ok(value) => {
                    trace!("{} = {}", point.name, value.value());
                    outcome.values.insert(point.name.clone(), value);
                },
                Err(e) => {
                    debug!("{}: {}", point.name, e);
                    outcome.errors.insert(point.name.clone(), e);
                },
            }
        }

        debug!(
            "Slave {} {}: {} ok, {} err",
            self.slave_id,
            kind,
            outcome.values.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Raw words per point for `point_names` and their scale-factor dependencies
    ///
    /// Unknown names, points wider than a window and points lost to a short
    /// response are absent from the map.
    pub async fn read_raw<S: AsRef<str>>(
        &self,
        point_names: &[S],
        kind: RegisterKind,
    ) -> Result<HashMap<String, Vec<u16>>, EngineError> {
        if point_names.is_empty() {
            return Err(EngineError::MissingInput {
                operation: "read_raw",
                argument: "point_names",
            });
        }
        let table = self.schema.points(kind);
        let working = with_dependencies(table, point_names);
        Ok(self.fetch(table, &working).await?)
    }

    /// Write one register or coil
    ///
    /// Only holding registers are writable. A point name is resolved in the
    /// holding table and must span a single register. Returns the echoed
    /// `[address, value]` pair.
    pub async fn write(
        &self,
        target: impl Into<WriteTarget>,
        kind: RegisterKind,
        command: WriteCommand,
    ) -> Result<Vec<u16>, EngineError> {
        if kind != RegisterKind::Holding {
            return Err(EngineError::WrongInput {
                operation: "write",
                argument: "kind",
                reason: format!("{kind} are read-only"),
            });
        }
        let address = match target.into() {
            WriteTarget::Address(address) => address,
            WriteTarget::Point(name) => {
                let point = self.schema.points(kind).get(&name).ok_or_else(|| {
                    EngineError::WrongInput {
                        operation: "write",
                        argument: "target",
                        reason: format!("'{name}' is not declared in {kind}"),
                    }
                })?;
                if point.count != 1 {
                    return Err(EngineError::WrongInput {
                        operation: "write",
                        argument: "target",
                        reason: format!(
                            "'{name}' spans {} registers, single-register writes only",
                            point.count
                        ),
                    });
                }
                point.address
            },
        };
        if address < self.schema.offset() {
            return Err(EngineError::WrongInput {
                operation: "write",
                argument: "target",
                reason: format!(
                    "address {address} is below driver offset {}",
                    self.schema.offset()
                ),
            });
        }

        let wire_address = self.schema.wire_address(address);
        let request = match command {
            WriteCommand::Register(value) => {
                WireRequest::write_register(self.slave_id, wire_address, value)
            },
            WriteCommand::Coil(on) => WireRequest::write_coil(self.slave_id, wire_address, on),
        };

        debug!(
            "Slave {} write @{}: {:?}",
            self.slave_id, wire_address, command
        );
        let mut transport = self.bus.lock().await;
        Ok(transact(&mut **transport, request).await?)
    }

    /// Close the transport if it is open; safe to call repeatedly
    pub async fn close(&self) -> Result<(), EngineError> {
        let mut transport = self.bus.lock().await;
        if transport.is_open() {
            transport.close().await?;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        table: &PointTable,
        working: &[String],
    ) -> Result<HashMap<String, Vec<u16>>, TransportError> {
        let windows = self.planner.plan(table, working);
        let mut raw = HashMap::new();
        if windows.is_empty() {
            return Ok(raw);
        }

        let function = table.kind().read_function();
        let mut transport = self.bus.lock().await;
        for window in &windows {
            let request = WireRequest::read(
                self.slave_id,
                function,
                self.schema.wire_address(window.start),
                window.length,
            );
            debug!(
                "Slave {} FC{:02X} @{} x{}",
                self.slave_id,
                function.code(),
                request.address,
                window.length
            );

            let words = transact(&mut **transport, request).await?;
            let (sliced, missing) = slice_window(table, window, &words);
            if !missing.is_empty() {
                debug!("Slave {} missing: {:?}", self.slave_id, missing);
            }
            raw.extend(sliced);
        }
        Ok(raw)
    }

    /// Decode the named scale factors used by the requested points
    fn resolve_scale_factors(
        &self,
        table: &PointTable,
        requested: &[&str],
        raw: &HashMap<String, Vec<u16>>,
    ) -> HashMap<String, i32> {
        let mut cache = HashMap::new();
        let providers = requested
            .iter()
            .filter_map(|name| table.get(name))
            .filter_map(PointDefinition::scale_factor_point);

        for provider in providers {
            if cache.contains_key(provider) {
                continue;
            }
            let (Some(point), Some(words)) = (table.get(provider), raw.get(provider)) else {
                continue;
            };
            let sentinel = self.schema.sentinel(&point.data_type);
            match self
                .decoder
                .decode_scale_factor(&RawPoint::new(point, words, sentinel))
            {
                Ok(sf) => {
                    trace!("SF {} = {}", provider, sf);
                    cache.insert(provider.to_string(), sf);
                },
                Err(e) => debug!("SF {} unresolved: {}", provider, e),
            }
        }
        cache
    }

    fn scale_factor_for(
        &self,
        point: &PointDefinition,
        scale_factors: &HashMap<String, i32>,
    ) -> Result<i32, DecodeError> {
        match point.scale_factor_ref() {
            None => Ok(0),
            Some(ScaleFactorRef::Literal(sf)) => Ok(*sf),
            Some(ScaleFactorRef::Point(name)) => match scale_factors.get(name) {
                Some(sf) => Ok(*sf),
                None => match self.config.scale_factor_policy {
                    ScaleFactorPolicy::DefaultToZero => Ok(0),
                    ScaleFactorPolicy::Strict => Err(DecodeError::ScaleFactorUnavailable {
                        point: point.name.clone(),
                        scale_factor: name.clone(),
                    }),
                },
            },
        }
    }

    fn decode_point(
        &self,
        point: &PointDefinition,
        words: &[u16],
        scale_factors: &HashMap<String, i32>,
    ) -> Result<ValueContainer, DecodeError> {
        let raw = RawPoint::new(point, words, self.schema.sentinel(&point.data_type));
        let decoder = self.decoder.as_ref();

        let value = match &point.data_type {
            dt if dt.is_enum() => decoder.decode_enum(&raw, &point.labels)?,
            dt if dt.is_bitfield() => decoder.decode_bitfield(&raw, &point.labels)?,
            dt if dt.is_string() => decoder.decode_string(&raw)?,
            dt if dt.is_integer() => {
                decoder.decode_integer(&raw, self.scale_factor_for(point, scale_factors)?)?
            },
            DataType::Float => {
                decoder.decode_float(&raw, self.scale_factor_for(point, scale_factors)?)?
            },
            DataType::Sunssf => Value::Int(i64::from(decoder.decode_scale_factor(&raw)?)),
            other => {
                return Err(DecodeError::UnknownDataType {
                    point: point.name.clone(),
                    data_type: other.to_string(),
                })
            },
        };

        Ok(ValueContainer::new(
            value,
            point.data_type.clone(),
            point.unit.clone(),
        ))
    }
}

/// Names in first-seen order without duplicates
fn unique<S: AsRef<str>>(names: &[S]) -> Vec<&str> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| seen.insert(*name))
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::strategy::{RawDecoder, ReadableDecoder};
    use crate::transport::mock::{MockHandle, MockTransport};
    use crate::transport::FunctionCode;

    const DRIVER: &str = r#"{
        "offset": 1,
        "points": {
            "input_registers": {
                "A": {"registerAddr": 1, "count": 1, "datatype": "uint16",
                      "scaleFactor": "A_SF", "unit": "V"},
                "A_SF": {"registerAddr": 2, "count": 1, "datatype": "sunssf"},
                "St": {"registerAddr": 3, "count": 1, "datatype": "enum16"}
            },
            "holding_registers": {
                "Lim": {"registerAddr": 11, "count": 1, "datatype": "uint16",
                        "scaleFactor": 0, "unit": "%"}
            }
        },
        "constants": {"enum16": {"St": {"1": "OFF", "2": "ON"}}},
        "unimplemented": {"uint16": 65535, "sunssf": 32768, "enum16": 65535}
    }"#;

    fn engine(decoder: Arc<dyn DecodeStrategy>) -> (DeviceEngine, MockHandle) {
        let schema = Arc::new(DriverSchema::from_json_str(DRIVER).unwrap());
        let mock = MockTransport::new("mock");
        let handle = mock.handle();
        let engine = DeviceEngine::new(7, schema, decoder, BusHandle::dedicated(mock));
        (engine, handle)
    }

    #[tokio::test]
    async fn test_read_applies_named_scale_factor() {
        let (engine, handle) = engine(Arc::new(ReadableDecoder));
        handle.set_input_registers(0, &[2305, 0xFFFF, 2]);

        let outcome = engine.read(&["A"], RegisterKind::Input).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.values["A"].value(), &Value::Float(230.5));
        assert_eq!(outcome.values["A"].unit(), "V");
        assert!(!outcome.values.contains_key("A_SF"));
    }

    #[tokio::test]
    async fn test_read_uses_wire_offset_and_function_code() {
        let (engine, handle) = engine(Arc::new(RawDecoder));
        engine.read(&["St"], RegisterKind::Input).await.unwrap();
        let requests = handle.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].slave_id, 7);
        assert_eq!(requests[0].function, FunctionCode::ReadInputRegisters);
        assert_eq!(requests[0].address, 2);
        assert_eq!(requests[0].quantity_or_value, 1);
    }

    #[tokio::test]
    async fn test_read_empty_request_fails() {
        let (engine, _) = engine(Arc::new(RawDecoder));
        let err = engine
            .read(&[] as &[&str], RegisterKind::Input)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingInput { .. }));
    }

    #[tokio::test]
    async fn test_unknown_point_is_reported_per_point() {
        let (engine, handle) = engine(Arc::new(ReadableDecoder));
        handle.set_input_registers(0, &[0, 0, 2]);
        let outcome = engine
            .read(&["St", "Nope"], RegisterKind::Input)
            .await
            .unwrap();
        assert_eq!(outcome.values["St"].value(), &Value::Text("ON".to_string()));
        assert!(matches!(
            outcome.errors["Nope"],
            DecodeError::UnknownPoint { .. }
        ));
    }

    #[tokio::test]
    async fn test_strict_policy_reports_unavailable_scale_factor() {
        let (engine, handle) = engine(Arc::new(RawDecoder));
        handle.set_input_registers(0, &[100, 0x8000]);
        let outcome = engine.read(&["A"], RegisterKind::Input).await.unwrap();
        assert!(matches!(
            outcome.errors["A"],
            DecodeError::ScaleFactorUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_default_to_zero_policy() {
        let schema = Arc::new(DriverSchema::from_json_str(DRIVER).unwrap());
        let mock = MockTransport::new("mock");
        mock.handle().set_input_registers(0, &[100, 0x8000]);
        let engine = DeviceEngine::with_config(
            1,
            schema,
            Arc::new(RawDecoder),
            BusHandle::dedicated(mock),
            EngineConfig {
                scale_factor_policy: ScaleFactorPolicy::DefaultToZero,
                ..EngineConfig::default()
            },
        );
        let outcome = engine.read(&["A"], RegisterKind::Input).await.unwrap();
        assert_eq!(outcome.values["A"].value(), &Value::UInt(100));
    }

    #[tokio::test]
    async fn test_transport_error_aborts_read() {
        let (engine, handle) = engine(Arc::new(RawDecoder));
        handle.fail_next(TransportError::Timeout("scripted".to_string()));
        let err = engine.read(&["A"], RegisterKind::Input).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_read_raw_includes_dependencies() {
        let (engine, handle) = engine(Arc::new(RawDecoder));
        handle.set_input_registers(0, &[5, 6]);
        let raw = engine.read_raw(&["A"], RegisterKind::Input).await.unwrap();
        assert_eq!(raw["A"], vec![5]);
        assert_eq!(raw["A_SF"], vec![6]);
    }

    #[tokio::test]
    async fn test_write_by_name_and_address() {
        let (engine, handle) = engine(Arc::new(RawDecoder));
        let echo = engine
            .write("Lim", RegisterKind::Holding, WriteCommand::Register(80))
            .await
            .unwrap();
        assert_eq!(echo, vec![10, 80]);
        assert_eq!(handle.holding_register(10), Some(80));

        engine
            .write(21u16, RegisterKind::Holding, WriteCommand::Coil(true))
            .await
            .unwrap();
        assert_eq!(handle.coil(20), Some(true));
    }

    #[tokio::test]
    async fn test_write_unknown_name_is_wrong_input() {
        let (engine, handle) = engine(Arc::new(RawDecoder));
        let err = engine
            .write("A", RegisterKind::Holding, WriteCommand::Register(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WrongInput { .. }));
        assert_eq!(handle.request_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (engine, _) = engine(Arc::new(RawDecoder));
        engine.close().await.unwrap();
        engine.close().await.unwrap();
    }

    #[test]
    fn test_unique_keeps_first_seen_order() {
        assert_eq!(unique(&["b", "a", "b", "c", "a"]), vec!["b", "a", "c"]);
    }
}
