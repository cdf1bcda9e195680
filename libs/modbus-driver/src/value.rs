//! Decoded point values

use crate::schema::DataType;
use serde::Serialize;
use std::fmt;

/// Typed reading produced by a decode strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    /// Active bitfield flags, ascending mask order
    Labels(Vec<String>),
}

impl Value {
    /// Numeric view of the value, `None` for text and label lists
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) | Value::Labels(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Labels(labels) => write!(f, "[{}]", labels.join(", ")),
        }
    }
}

/// One decoded point: value, declared data type and unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueContainer {
    value: Value,
    data_type: DataType,
    unit: String,
}

impl ValueContainer {
    pub fn new(value: Value, data_type: DataType, unit: impl Into<String>) -> Self {
        Self {
            value,
            data_type,
            unit: unit.into(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}
