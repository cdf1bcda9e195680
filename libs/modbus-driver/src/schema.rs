//! Driver schema model
//!
//! A driver document describes one device model: the point tables for input and
//! holding registers, the "unimplemented" sentinel per data type and the label
//! tables for enumeration and bitfield points. The schema is immutable after
//! load and shared between every device of the same model.

use crate::error::SchemaError;
use crate::strategy::MAX_SCALE_FACTOR;
use crate::transport::FunctionCode;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// Largest register count a single FC03/FC04 request may carry
pub const MAX_READ_REGISTERS: u16 = 125;

/// Label table of an enum (raw code -> label) or bitfield (mask -> label) point
pub type LabelTable = BTreeMap<u64, String>;

/// Register type a point lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterKind {
    #[serde(rename = "input_registers")]
    Input,
    #[serde(rename = "holding_registers")]
    Holding,
}

impl RegisterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RegisterKind::Input => "input_registers",
            RegisterKind::Holding => "holding_registers",
        }
    }

    /// Function code used to read this register type
    pub fn read_function(self) -> FunctionCode {
        match self {
            RegisterKind::Input => FunctionCode::ReadInputRegisters,
            RegisterKind::Holding => FunctionCode::ReadHoldingRegisters,
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared data type of a point
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Int16,
    Int32,
    Int64,
    Uint16,
    Uint32,
    Uint64,
    Acc16,
    Acc32,
    Acc64,
    Float,
    Sunssf,
    Enum16,
    Enum32,
    Bitfield16,
    Bitfield32,
    String,
    Utf8,
    /// Tag not understood by this decoder; kept so the point fails at decode time
    Unknown(String),
}

impl DataType {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "int16" => DataType::Int16,
            "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "uint16" => DataType::Uint16,
            "uint32" => DataType::Uint32,
            "uint64" => DataType::Uint64,
            "acc16" => DataType::Acc16,
            "acc32" => DataType::Acc32,
            "acc64" => DataType::Acc64,
            "float" => DataType::Float,
            "sunssf" => DataType::Sunssf,
            "enum16" => DataType::Enum16,
            "enum32" => DataType::Enum32,
            "bitfield16" => DataType::Bitfield16,
            "bitfield32" => DataType::Bitfield32,
            "string" => DataType::String,
            "UTF-8" => DataType::Utf8,
            other => DataType::Unknown(other.to_string()),
        }
    }

    /// Tag as written in driver documents
    pub fn as_str(&self) -> &str {
        match self {
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::Acc16 => "acc16",
            DataType::Acc32 => "acc32",
            DataType::Acc64 => "acc64",
            DataType::Float => "float",
            DataType::Sunssf => "sunssf",
            DataType::Enum16 => "enum16",
            DataType::Enum32 => "enum32",
            DataType::Bitfield16 => "bitfield16",
            DataType::Bitfield32 => "bitfield32",
            DataType::String => "string",
            DataType::Utf8 => "UTF-8",
            DataType::Unknown(tag) => tag,
        }
    }

    /// Number of 16-bit words the type assembles from; `None` for strings and
    /// unknown tags
    pub fn word_count(&self) -> Option<usize> {
        match self {
            DataType::Int16
            | DataType::Uint16
            | DataType::Acc16
            | DataType::Sunssf
            | DataType::Enum16
            | DataType::Bitfield16 => Some(1),
            DataType::Int32
            | DataType::Uint32
            | DataType::Acc32
            | DataType::Float
            | DataType::Enum32
            | DataType::Bitfield32 => Some(2),
            DataType::Int64 | DataType::Uint64 | DataType::Acc64 => Some(4),
            DataType::String | DataType::Utf8 | DataType::Unknown(_) => None,
        }
    }

    /// Two's-complement types
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DataType::Int16 | DataType::Int32 | DataType::Int64 | DataType::Sunssf
        )
    }

    /// Types a named scale factor may point at
    pub fn provides_scale_factor(&self) -> bool {
        matches!(self, DataType::Sunssf | DataType::Int16)
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, DataType::Enum16 | DataType::Enum32)
    }

    pub fn is_bitfield(&self) -> bool {
        matches!(self, DataType::Bitfield16 | DataType::Bitfield32)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::String | DataType::Utf8)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Uint16
                | DataType::Uint32
                | DataType::Uint64
                | DataType::Acc16
                | DataType::Acc32
                | DataType::Acc64
        )
    }

    /// Types whose reading is multiplied by a scale factor
    pub fn accepts_scale_factor(&self) -> bool {
        self.is_integer() || matches!(self, DataType::Float)
    }

    /// Types that need a label table in `constants`
    pub fn needs_labels(&self) -> bool {
        self.is_enum() || self.is_bitfield()
    }
}

impl From<String> for DataType {
    fn from(tag: String) -> Self {
        DataType::parse(&tag)
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte order within a register, or word order within a multi-register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Endian {
    #[default]
    #[serde(rename = "Big_Endian", alias = "big_endian", alias = "big")]
    Big,
    #[serde(rename = "Little_Endian", alias = "little_endian", alias = "little")]
    Little,
}

/// Where a point's scale factor comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScaleFactorRef {
    /// Fixed exponent written in the driver
    Literal(i32),
    /// Name of another point whose decoded value is the exponent
    Point(String),
}

/// One named point of a register table
#[derive(Debug, Clone, PartialEq)]
pub struct PointDefinition {
    pub name: String,
    /// Register address as declared, before the driver offset is applied
    pub address: u16,
    pub count: u16,
    pub data_type: DataType,
    pub byte_order: Endian,
    pub word_order: Endian,
    pub scale_factor: Option<ScaleFactorRef>,
    pub unit: String,
    /// Empty unless the point is an enum or bitfield
    pub labels: LabelTable,
}

impl PointDefinition {
    /// One past the last register of the point
    pub fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.count)
    }

    /// Scale factor reference, if the data type uses one
    pub fn scale_factor_ref(&self) -> Option<&ScaleFactorRef> {
        if self.data_type.accepts_scale_factor() {
            self.scale_factor.as_ref()
        } else {
            None
        }
    }

    /// Name of the point providing this point's scale factor
    pub fn scale_factor_point(&self) -> Option<&str> {
        match self.scale_factor_ref() {
            Some(ScaleFactorRef::Point(name)) => Some(name),
            _ => None,
        }
    }
}

/// Points of one register type in declaration order
#[derive(Debug, Clone)]
pub struct PointTable {
    kind: RegisterKind,
    points: Vec<PointDefinition>,
    index: HashMap<String, usize>,
}

impl PointTable {
    fn new(kind: RegisterKind) -> Self {
        Self {
            kind,
            points: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    pub fn get(&self, name: &str) -> Option<&PointDefinition> {
        self.index.get(name).map(|&i| &self.points[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Points in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &PointDefinition> {
        self.points.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.points.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Sentinel value per data type meaning "register not implemented"
#[derive(Debug, Clone, Default)]
pub struct SentinelTable(HashMap<DataType, u64>);

impl SentinelTable {
    pub fn get(&self, data_type: &DataType) -> Option<u64> {
        self.0.get(data_type).copied()
    }

    pub fn contains(&self, data_type: &DataType) -> bool {
        self.0.contains_key(data_type)
    }
}

/// Parsed and validated driver document
#[derive(Debug, Clone)]
pub struct DriverSchema {
    offset: u16,
    input: PointTable,
    holding: PointTable,
    sentinels: SentinelTable,
}

impl DriverSchema {
    /// Parse and validate a driver document
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let document: DriverDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, SchemaError> {
        let document: DriverDocument = serde_json::from_slice(bytes)?;
        Self::from_document(document)
    }

    fn from_document(document: DriverDocument) -> Result<Self, SchemaError> {
        let mut problems = Vec::new();

        let sentinels = SentinelTable(
            document
                .unimplemented
                .into_iter()
                .map(|(tag, value)| (DataType::parse(&tag), value))
                .collect(),
        );

        let input = build_table(
            RegisterKind::Input,
            document.points.input_registers,
            &document.constants,
            &mut problems,
        );
        let holding = build_table(
            RegisterKind::Holding,
            document.points.holding_registers,
            &document.constants,
            &mut problems,
        );

        let schema = Self {
            offset: document.offset,
            input,
            holding,
            sentinels,
        };
        problems.extend(schema.validate());

        if problems.is_empty() {
            debug!(
                "Driver loaded: {} input, {} holding",
                schema.input.len(),
                schema.holding.len()
            );
            Ok(schema)
        } else {
            Err(SchemaError::Invalid(problems))
        }
    }

    /// Register address bias
    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn points(&self, kind: RegisterKind) -> &PointTable {
        match kind {
            RegisterKind::Input => &self.input,
            RegisterKind::Holding => &self.holding,
        }
    }

    pub fn sentinel(&self, data_type: &DataType) -> Option<u64> {
        self.sentinels.get(data_type)
    }

    /// Address put on the wire for a declared register address
    pub fn wire_address(&self, address: u16) -> u16 {
        address.saturating_sub(self.offset)
    }

    /// Check the structural invariants and return every violation found
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for table in [&self.input, &self.holding] {
            for point in table.iter() {
                let at = format!("{}.{}", table.kind(), point.name);

                if !self.sentinels.contains(&point.data_type) {
                    problems.push(format!(
                        "{at}: no unimplemented value for data type '{}'",
                        point.data_type
                    ));
                }

                if point.address < self.offset {
                    problems.push(format!(
                        "{at}: registerAddr {} is below offset {}",
                        point.address, self.offset
                    ));
                }

                match point.data_type.word_count() {
                    Some(width) if usize::from(point.count) != width => {
                        problems.push(format!(
                            "{at}: count {} does not match {} ({width} registers)",
                            point.count, point.data_type
                        ));
                    },
                    None if point.count == 0 || point.count > MAX_READ_REGISTERS => {
                        problems.push(format!(
                            "{at}: count {} outside 1..={MAX_READ_REGISTERS}",
                            point.count
                        ));
                    },
                    _ => {},
                }

                if let DataType::Unknown(tag) = &point.data_type {
                    warn!("Unknown data type '{}' on {}", tag, at);
                }

                match point.scale_factor_ref() {
                    Some(ScaleFactorRef::Point(sf_name)) => match table.get(sf_name) {
                        None => problems.push(format!(
                            "{at}: scale factor '{sf_name}' is not declared in {}",
                            table.kind()
                        )),
                        Some(provider) if !provider.data_type.provides_scale_factor() => {
                            problems.push(format!(
                                "{at}: scale factor '{sf_name}' is {}, expected sunssf or int16",
                                provider.data_type
                            ));
                        },
                        Some(_) => {},
                    },
                    Some(ScaleFactorRef::Literal(sf)) if sf.abs() > MAX_SCALE_FACTOR => {
                        problems.push(format!(
                            "{at}: scale factor {sf} outside -{MAX_SCALE_FACTOR}..={MAX_SCALE_FACTOR}"
                        ));
                    },
                    _ => {},
                }
            }
        }
        problems
    }
}

fn build_table(
    kind: RegisterKind,
    entries: OrderedPoints,
    constants: &HashMap<String, HashMap<String, HashMap<String, String>>>,
    problems: &mut Vec<String>,
) -> PointTable {
    let mut table = PointTable::new(kind);
    for (name, spec) in entries.0 {
        if table.contains(&name) {
            problems.push(format!("{kind}.{name}: declared more than once"));
            continue;
        }

        let labels = if spec.datatype.needs_labels() {
            match constants
                .get(spec.datatype.as_str())
                .and_then(|by_point| by_point.get(&name))
            {
                Some(raw) => parse_labels(kind, &name, raw, problems),
                None => {
                    problems.push(format!(
                        "{kind}.{name}: no label table under constants.{}",
                        spec.datatype
                    ));
                    LabelTable::new()
                },
            }
        } else {
            LabelTable::new()
        };

        table.index.insert(name.clone(), table.points.len());
        table.points.push(PointDefinition {
            name,
            address: spec.register_addr,
            count: spec.count,
            data_type: spec.datatype,
            byte_order: spec.byte_order,
            word_order: spec.word_order,
            scale_factor: spec.scale_factor,
            unit: spec.unit.unwrap_or_default(),
            labels,
        });
    }
    table
}

fn parse_labels(
    kind: RegisterKind,
    name: &str,
    raw: &HashMap<String, String>,
    problems: &mut Vec<String>,
) -> LabelTable {
    let mut labels = LabelTable::new();
    for (key, label) in raw {
        match key.trim().parse::<u64>() {
            Ok(code) => {
                labels.insert(code, label.clone());
            },
            Err(_) => problems.push(format!("{kind}.{name}: label key '{key}' is not a number")),
        }
    }
    labels
}

// ============================================================================
// Document layout
// ============================================================================

#[derive(Debug, Deserialize)]
struct DriverDocument {
    #[serde(default)]
    offset: u16,
    #[serde(default)]
    points: PointsSection,
    #[serde(default)]
    constants: HashMap<String, HashMap<String, HashMap<String, String>>>,
    #[serde(default)]
    unimplemented: HashMap<String, u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PointsSection {
    #[serde(default)]
    input_registers: OrderedPoints,
    #[serde(default)]
    holding_registers: OrderedPoints,
}

#[derive(Debug, Deserialize)]
struct PointSpec {
    #[serde(rename = "registerAddr")]
    register_addr: u16,
    count: u16,
    datatype: DataType,
    #[serde(rename = "byteOrder", default)]
    byte_order: Endian,
    #[serde(rename = "wordOrder", default)]
    word_order: Endian,
    #[serde(rename = "scaleFactor", default)]
    scale_factor: Option<ScaleFactorRef>,
    #[serde(default)]
    unit: Option<String>,
}

/// Point map kept in document order
#[derive(Debug, Default)]
struct OrderedPoints(Vec<(String, PointSpec)>);

impl<'de> Deserialize<'de> for OrderedPoints {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedPointsVisitor;

        impl<'de> Visitor<'de> for OrderedPointsVisitor {
            type Value = OrderedPoints;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of point name to point definition")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut points = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, spec)) = map.next_entry::<String, PointSpec>()? {
                    points.push((name, spec));
                }
                Ok(OrderedPoints(points))
            }
        }

        deserializer.deserialize_map(OrderedPointsVisitor)
    }
}
