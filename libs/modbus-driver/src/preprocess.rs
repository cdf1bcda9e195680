//! Word normalization and integer assembly
//!
//! Byte order is applied first (swap the two bytes of every word), then word
//! order (reverse the word tuple). The normalized words are combined most
//! significant first.

use crate::error::DecodeError;
use crate::schema::{DataType, Endian};

/// Apply byte order then word order to a raw word tuple
pub fn normalize(words: &[u16], byte_order: Endian, word_order: Endian) -> Vec<u16> {
    let mut normalized = words.to_vec();
    if byte_order == Endian::Little {
        for word in &mut normalized {
            *word = word.swap_bytes();
        }
    }
    if word_order == Endian::Little {
        normalized.reverse();
    }
    normalized
}

/// Combine normalized words into one unsigned integer of the data type's width
pub fn assemble(point: &str, words: &[u16], data_type: &DataType) -> Result<u64, DecodeError> {
    let width = data_type
        .word_count()
        .ok_or_else(|| DecodeError::UnknownDataType {
            point: point.to_string(),
            data_type: data_type.to_string(),
        })?;

    if words.len() != width {
        return Err(DecodeError::RegisterCountMismatch {
            point: point.to_string(),
            expected: width,
            actual: words.len(),
        });
    }

    Ok(words
        .iter()
        .fold(0u64, |acc, &word| (acc << 16) | u64::from(word)))
}

/// Normalize and assemble in one step
pub fn pre_process(
    point: &str,
    words: &[u16],
    data_type: &DataType,
    byte_order: Endian,
    word_order: Endian,
) -> Result<u64, DecodeError> {
    assemble(point, &normalize(words, byte_order, word_order), data_type)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_big_big_two_words() {
        let raw = pre_process(
            "p",
            &[0x0001, 0x0002],
            &DataType::Uint32,
            Endian::Big,
            Endian::Big,
        )
        .unwrap();
        assert_eq!(raw, 65538);
    }

    #[test]
    fn test_little_byte_order_swaps_each_word() {
        let raw = pre_process(
            "p",
            &[0x0001, 0x0002],
            &DataType::Uint32,
            Endian::Little,
            Endian::Big,
        )
        .unwrap();
        assert_eq!(raw, 0x0100_0200);
    }

    #[test]
    fn test_little_word_order_reverses_words() {
        let raw = pre_process(
            "p",
            &[0x0001, 0x0002],
            &DataType::Uint32,
            Endian::Big,
            Endian::Little,
        )
        .unwrap();
        assert_eq!(raw, 0x0002_0001);
    }

    #[test]
    fn test_little_little_swaps_then_reverses() {
        let raw = pre_process(
            "p",
            &[0x1234, 0x5678],
            &DataType::Int32,
            Endian::Little,
            Endian::Little,
        )
        .unwrap();
        assert_eq!(raw, 0x7856_3412);
    }

    #[test]
    fn test_four_words_positional_weighting() {
        let raw = pre_process(
            "p",
            &[0x0001, 0x0002, 0x0003, 0x0004],
            &DataType::Acc64,
            Endian::Big,
            Endian::Big,
        )
        .unwrap();
        assert_eq!(raw, 0x0001_0002_0003_0004);
    }

    #[test]
    fn test_single_word_is_itself() {
        let raw = assemble("p", &[0xBEEF], &DataType::Uint16).unwrap();
        assert_eq!(raw, 0xBEEF);
    }

    #[test]
    fn test_string_type_has_no_width() {
        let err = assemble("Mn", &[0x4142], &DataType::String).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownDataType { .. }));
    }

    #[test]
    fn test_word_count_mismatch() {
        let err = assemble("W", &[1], &DataType::Uint32).unwrap_err();
        assert_eq!(
            err,
            DecodeError::RegisterCountMismatch {
                point: "W".to_string(),
                expected: 2,
                actual: 1
            }
        );
    }
}
