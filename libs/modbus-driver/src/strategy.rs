//! Decode strategies
//!
//! A strategy turns the raw words of one point into a [`Value`]. String,
//! integer, float and scale-factor conversion are shared by every strategy
//! through the trait's default methods; strategies differ in how enumerations
//! and bitfields are represented.

use crate::error::DecodeError;
use crate::preprocess::{normalize, pre_process};
use crate::schema::{DataType, Endian, LabelTable, PointDefinition};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Largest scale-factor exponent magnitude accepted by the decoders
pub const MAX_SCALE_FACTOR: i32 = 10;

/// Raw words of one point together with the declarations needed to decode them
#[derive(Debug, Clone, Copy)]
pub struct RawPoint<'a> {
    pub name: &'a str,
    pub words: &'a [u16],
    pub data_type: &'a DataType,
    pub byte_order: Endian,
    pub word_order: Endian,
    /// "Not implemented" value for the data type
    pub sentinel: Option<u64>,
}

impl<'a> RawPoint<'a> {
    pub fn new(definition: &'a PointDefinition, words: &'a [u16], sentinel: Option<u64>) -> Self {
        Self {
            name: &definition.name,
            words,
            data_type: &definition.data_type,
            byte_order: definition.byte_order,
            word_order: definition.word_order,
            sentinel,
        }
    }

    /// Normalized, assembled and sentinel-checked raw integer
    pub fn assemble(&self) -> Result<u64, DecodeError> {
        let raw = pre_process(
            self.name,
            self.words,
            self.data_type,
            self.byte_order,
            self.word_order,
        )?;
        if self.sentinel == Some(raw) {
            return Err(self.unimplemented());
        }
        trace!("{} raw={:#x}", self.name, raw);
        Ok(raw)
    }

    /// `scale_factor` if it lies within `MAX_SCALE_FACTOR`
    pub fn check_scale_factor(&self, scale_factor: i64) -> Result<i32, DecodeError> {
        match i32::try_from(scale_factor) {
            Ok(sf) if sf.abs() <= MAX_SCALE_FACTOR => Ok(sf),
            _ => Err(DecodeError::ScaleFactorOutOfRange {
                point: self.name.to_string(),
                value: scale_factor,
            }),
        }
    }

    fn unimplemented(&self) -> DecodeError {
        DecodeError::UnimplementedRegister {
            point: self.name.to_string(),
        }
    }
}

/// Conversion of raw point words into values
pub trait DecodeStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Register content as UTF-8 text with NUL characters removed
    fn decode_string(&self, point: &RawPoint<'_>) -> Result<Value, DecodeError> {
        let first = point
            .words
            .first()
            .ok_or_else(|| DecodeError::RegisterCountMismatch {
                point: point.name.to_string(),
                expected: 1,
                actual: 0,
            })?;
        if point.sentinel == Some(u64::from(*first)) {
            return Err(point.unimplemented());
        }

        let bytes: Vec<u8> = normalize(point.words, point.byte_order, point.word_order)
            .iter()
            .flat_map(|word| word.to_be_bytes())
            .filter(|&byte| byte != 0)
            .collect();
        String::from_utf8(bytes)
            .map(Value::Text)
            .map_err(|_| DecodeError::InvalidString {
                point: point.name.to_string(),
            })
    }

    /// Signed or unsigned integer multiplied by `10^scale_factor`
    fn decode_integer(&self, point: &RawPoint<'_>, scale_factor: i32) -> Result<Value, DecodeError> {
        let raw = point.assemble()?;
        let scale_factor = point.check_scale_factor(i64::from(scale_factor))?;
        let signed = point.data_type.is_signed();
        let value = if signed {
            i128::from(to_signed(raw, point.data_type))
        } else {
            i128::from(raw)
        };
        Ok(scale_integer(value, signed, scale_factor))
    }

    /// IEEE-754 binary32 multiplied by `10^scale_factor`
    fn decode_float(&self, point: &RawPoint<'_>, scale_factor: i32) -> Result<Value, DecodeError> {
        let raw = point.assemble()?;
        let scale_factor = point.check_scale_factor(i64::from(scale_factor))?;
        let value = f64::from(f32::from_bits(raw as u32));
        Ok(Value::Float(round5(value * 10f64.powi(scale_factor))))
    }

    /// Signed 16-bit exponent, at most `MAX_SCALE_FACTOR` in magnitude
    fn decode_scale_factor(&self, point: &RawPoint<'_>) -> Result<i32, DecodeError> {
        let raw = point.assemble()?;
        let value = if raw > 0x7FFF {
            raw as i64 - 0x1_0000
        } else {
            raw as i64
        };
        point.check_scale_factor(value)
    }

    fn decode_enum(&self, point: &RawPoint<'_>, labels: &LabelTable) -> Result<Value, DecodeError>;

    fn decode_bitfield(
        &self,
        point: &RawPoint<'_>,
        labels: &LabelTable,
    ) -> Result<Value, DecodeError>;
}

/// Enumerations as their label, bitfields as the list of active flag labels
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadableDecoder;

impl DecodeStrategy for ReadableDecoder {
    fn name(&self) -> &'static str {
        "readable"
    }

    fn decode_enum(&self, point: &RawPoint<'_>, labels: &LabelTable) -> Result<Value, DecodeError> {
        let raw = point.assemble()?;
        labels
            .get(&raw)
            .map(|label| Value::Text(label.clone()))
            .ok_or_else(|| DecodeError::UnknownLabel {
                point: point.name.to_string(),
                raw,
            })
    }

    fn decode_bitfield(
        &self,
        point: &RawPoint<'_>,
        labels: &LabelTable,
    ) -> Result<Value, DecodeError> {
        let raw = point.assemble()?;
        Ok(Value::Labels(
            labels
                .iter()
                .filter(|&(&mask, _)| raw & mask == mask)
                .map(|(_, label)| label.clone())
                .collect(),
        ))
    }
}

/// Enumerations and bitfields as their raw integer
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl DecodeStrategy for RawDecoder {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn decode_enum(&self, point: &RawPoint<'_>, _labels: &LabelTable) -> Result<Value, DecodeError> {
        point.assemble().map(Value::UInt)
    }

    fn decode_bitfield(
        &self,
        point: &RawPoint<'_>,
        _labels: &LabelTable,
    ) -> Result<Value, DecodeError> {
        point.assemble().map(Value::UInt)
    }
}

/// Strategy selector used in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    Readable,
    #[default]
    Raw,
}

impl DecoderKind {
    pub fn strategy(self) -> Arc<dyn DecodeStrategy> {
        match self {
            DecoderKind::Readable => Arc::new(ReadableDecoder),
            DecoderKind::Raw => Arc::new(RawDecoder),
        }
    }
}

fn to_signed(raw: u64, data_type: &DataType) -> i64 {
    match data_type.word_count() {
        Some(1) => i64::from(raw as u16 as i16),
        Some(2) => i64::from(raw as u32 as i32),
        _ => raw as i64,
    }
}

/// Exact integer when the scaled value fits, float otherwise
fn scale_integer(value: i128, signed: bool, scale_factor: i32) -> Value {
    if scale_factor >= 0 {
        let scaled = 10i128
            .checked_pow(scale_factor.unsigned_abs())
            .and_then(|factor| value.checked_mul(factor));
        if let Some(scaled) = scaled {
            if signed {
                if let Ok(v) = i64::try_from(scaled) {
                    return Value::Int(v);
                }
            } else if let Ok(v) = u64::try_from(scaled) {
                return Value::UInt(v);
            }
        }
    }
    Value::Float(round5(value as f64 * 10f64.powi(scale_factor)))
}

/// Round to 5 decimal places
fn round5(value: f64) -> f64 {
    if !value.is_finite() || value.abs() >= 1e15 {
        return value;
    }
    (value * 100_000.0).round() / 100_000.0
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn raw<'a>(words: &'a [u16], data_type: &'a DataType, sentinel: Option<u64>) -> RawPoint<'a> {
        RawPoint {
            name: "P",
            words,
            data_type,
            byte_order: Endian::Big,
            word_order: Endian::Big,
            sentinel,
        }
    }

    fn labels(entries: &[(u64, &str)]) -> LabelTable {
        entries.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    // ========== integer tests ==========

    #[test]
    fn test_int16_sign_conversion() {
        let dt = DataType::Int16;
        let value = ReadableDecoder
            .decode_integer(&raw(&[40000], &dt, Some(0x8000)), 0)
            .unwrap();
        assert_eq!(value, Value::Int(-25536));
    }

    #[test]
    fn test_int32_sign_conversion() {
        let dt = DataType::Int32;
        let value = RawDecoder
            .decode_integer(&raw(&[0xFFFF, 0xFFFE], &dt, None), 0)
            .unwrap();
        assert_eq!(value, Value::Int(-2));
    }

    #[test]
    fn test_uint_positive_scale_stays_integer() {
        let dt = DataType::Uint16;
        let value = RawDecoder
            .decode_integer(&raw(&[123], &dt, Some(0xFFFF)), 2)
            .unwrap();
        assert_eq!(value, Value::UInt(12300));
    }

    #[test]
    fn test_negative_scale_rounds_to_five_places() {
        let dt = DataType::Int16;
        let value = ReadableDecoder
            .decode_integer(&raw(&[1234], &dt, None), -2)
            .unwrap();
        assert_eq!(value, Value::Float(12.34));

        let value = ReadableDecoder
            .decode_integer(&raw(&[1], &dt, None), -7)
            .unwrap();
        assert_eq!(value, Value::Float(0.0));
    }

    #[test]
    fn test_acc64_overflowing_scale_falls_back_to_float() {
        let dt = DataType::Acc64;
        let value = RawDecoder
            .decode_integer(&raw(&[0xFFFF, 0xFFFF, 0xFFFF, 0xFFF0], &dt, None), 3)
            .unwrap();
        assert!(matches!(value, Value::Float(_)));
    }

    // ========== float tests ==========

    #[test]
    fn test_float_one_point_five() {
        let bits = 1.5f32.to_bits();
        let words = [(bits >> 16) as u16, bits as u16];
        let dt = DataType::Float;
        let value = ReadableDecoder
            .decode_float(&raw(&words, &dt, Some(0x7FC0_0000)), 0)
            .unwrap();
        assert_eq!(value, Value::Float(1.5));
    }

    #[test]
    fn test_float_scaled() {
        let bits = 2.5f32.to_bits();
        let words = [(bits >> 16) as u16, bits as u16];
        let dt = DataType::Float;
        let value = RawDecoder
            .decode_float(&raw(&words, &dt, None), 1)
            .unwrap();
        assert_eq!(value, Value::Float(25.0));
    }

    // ========== scale factor tests ==========

    #[test]
    fn test_scale_factor_negative() {
        let dt = DataType::Sunssf;
        let sf = ReadableDecoder
            .decode_scale_factor(&raw(&[0xFFFE], &dt, Some(0x8000)))
            .unwrap();
        assert_eq!(sf, -2);
    }

    #[test]
    fn test_scale_factor_sentinel() {
        let dt = DataType::Sunssf;
        let err = ReadableDecoder
            .decode_scale_factor(&raw(&[0x8000], &dt, Some(0x8000)))
            .unwrap_err();
        assert!(err.is_unimplemented());
    }

    #[test]
    fn test_scale_factor_out_of_range() {
        let dt = DataType::Sunssf;
        let err = ReadableDecoder
            .decode_scale_factor(&raw(&[0x7FFF], &dt, Some(0x8000)))
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::ScaleFactorOutOfRange {
                point: "P".to_string(),
                value: 32767,
            }
        );

        let sf = ReadableDecoder
            .decode_scale_factor(&raw(&[0xFFF6], &dt, Some(0x8000)))
            .unwrap();
        assert_eq!(sf, -MAX_SCALE_FACTOR);
    }

    #[test]
    fn test_numeric_decoders_reject_huge_exponent() {
        let dt = DataType::Uint16;
        let err = RawDecoder
            .decode_integer(&raw(&[5], &dt, None), 400)
            .unwrap_err();
        assert!(matches!(err, DecodeError::ScaleFactorOutOfRange { value: 400, .. }));

        let dt = DataType::Float;
        let err = RawDecoder
            .decode_float(&raw(&[0x3FC0, 0], &dt, None), -32768)
            .unwrap_err();
        assert!(matches!(err, DecodeError::ScaleFactorOutOfRange { .. }));
    }

    // ========== enum / bitfield tests ==========

    #[test]
    fn test_enum_readable_returns_label() {
        let dt = DataType::Enum16;
        let table = labels(&[(1, "OFF"), (4, "MPPT")]);
        let value = ReadableDecoder
            .decode_enum(&raw(&[4], &dt, Some(0xFFFF)), &table)
            .unwrap();
        assert_eq!(value, Value::Text("MPPT".to_string()));
    }

    #[test]
    fn test_enum_readable_unknown_label() {
        let dt = DataType::Enum16;
        let table = labels(&[(1, "OFF")]);
        let err = ReadableDecoder
            .decode_enum(&raw(&[9], &dt, None), &table)
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownLabel {
                point: "P".to_string(),
                raw: 9
            }
        );
    }

    #[test]
    fn test_enum_raw_returns_code() {
        let dt = DataType::Enum16;
        let table = labels(&[(1, "OFF")]);
        let value = RawDecoder
            .decode_enum(&raw(&[9], &dt, None), &table)
            .unwrap();
        assert_eq!(value, Value::UInt(9));
    }

    #[test]
    fn test_bitfield_readable_ascending_masks() {
        let dt = DataType::Bitfield16;
        let table = labels(&[(4, "B"), (1, "A"), (2, "C")]);
        let value = ReadableDecoder
            .decode_bitfield(&raw(&[0b0101], &dt, Some(0xFFFF)), &table)
            .unwrap();
        assert_eq!(value, Value::Labels(vec!["A".to_string(), "B".to_string()]));
    }

    #[test]
    fn test_bitfield_readable_no_flags() {
        let dt = DataType::Bitfield16;
        let table = labels(&[(1, "A")]);
        let value = ReadableDecoder
            .decode_bitfield(&raw(&[0b0010], &dt, None), &table)
            .unwrap();
        assert_eq!(value, Value::Labels(vec![]));
    }

    #[test]
    fn test_bitfield_raw_returns_integer() {
        let dt = DataType::Bitfield32;
        let value = RawDecoder
            .decode_bitfield(&raw(&[0, 5], &dt, None), &LabelTable::new())
            .unwrap();
        assert_eq!(value, Value::UInt(5));
    }

    // ========== string tests ==========

    #[test]
    fn test_string_strips_nul() {
        let dt = DataType::String;
        let words = [0x5346, 0x2D31, 0x3000, 0x0000];
        let value = ReadableDecoder
            .decode_string(&raw(&words, &dt, Some(0)))
            .unwrap();
        assert_eq!(value, Value::Text("SF-10".to_string()));
    }

    #[test]
    fn test_string_sentinel_checked_on_first_raw_word() {
        let dt = DataType::String;
        let err = RawDecoder
            .decode_string(&raw(&[0x0000, 0x4142], &dt, Some(0)))
            .unwrap_err();
        assert!(err.is_unimplemented());
    }

    #[test]
    fn test_string_invalid_utf8() {
        let dt = DataType::Utf8;
        let err = ReadableDecoder
            .decode_string(&raw(&[0xFFFE], &dt, None))
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidString { .. }));
    }

    // ========== sentinel tests ==========

    #[test]
    fn test_sentinel_short_circuits_every_numeric_decoder() {
        let strategies: [&dyn DecodeStrategy; 2] = [&ReadableDecoder, &RawDecoder];
        let table = labels(&[(0xFFFF, "ALL")]);
        for strategy in strategies {
            let dt = DataType::Uint16;
            let p = raw(&[0xFFFF], &dt, Some(0xFFFF));
            assert!(strategy.decode_integer(&p, 0).unwrap_err().is_unimplemented());

            let dt = DataType::Enum16;
            let p = raw(&[0xFFFF], &dt, Some(0xFFFF));
            assert!(strategy.decode_enum(&p, &table).unwrap_err().is_unimplemented());

            let dt = DataType::Bitfield16;
            let p = raw(&[0xFFFF], &dt, Some(0xFFFF));
            assert!(strategy
                .decode_bitfield(&p, &table)
                .unwrap_err()
                .is_unimplemented());

            let dt = DataType::Float;
            let p = raw(&[0x7FC0, 0x0000], &dt, Some(0x7FC0_0000));
            assert!(strategy.decode_float(&p, 0).unwrap_err().is_unimplemented());
        }
    }

    #[test]
    fn test_decoder_kind_selects_strategy() {
        assert_eq!(DecoderKind::Readable.strategy().name(), "readable");
        assert_eq!(DecoderKind::default().strategy().name(), "raw");
    }
}
