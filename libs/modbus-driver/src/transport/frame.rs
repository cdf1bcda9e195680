//! Modbus frame encoding and response parsing
//!
//! TCP: [Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][PDU(N)]
//! RTU: [Unit ID(1)][PDU(N)][CRC(2), little-endian]

use super::{FunctionCode, TransportError, WireRequest};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// MBAP bytes before the unit id
pub const MBAP_HEADER_LEN: usize = 6;

/// Largest MBAP length field: unit id + 253 byte PDU
pub const MAX_MBAP_LENGTH: usize = 254;

/// Largest RTU frame: unit id + 253 byte PDU + CRC
pub const MAX_RTU_FRAME: usize = 256;

/// Request PDU; all four supported function codes share the same layout
pub fn build_pdu(request: &WireRequest) -> Bytes {
    let mut pdu = BytesMut::with_capacity(5);
    pdu.put_u8(request.function.code());
    pdu.put_u16(request.address);
    pdu.put_u16(request.quantity_or_value);
    pdu.freeze()
}

pub fn encode_tcp(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
    frame.put_u16(transaction_id);
    frame.put_u16(0);
    frame.put_u16((pdu.len() + 1) as u16);
    frame.put_u8(unit_id);
    frame.put_slice(pdu);
    frame
}

pub fn encode_rtu(unit_id: u8, pdu: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(pdu.len() + 3);
    frame.put_u8(unit_id);
    frame.put_slice(pdu);
    let crc = crc16(&frame);
    frame.put_u16_le(crc);
    frame
}

/// CRC-16/Modbus
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Check the MBAP header of a complete TCP response and return its PDU
pub fn decode_tcp(frame: &[u8], transaction_id: u16, unit_id: u8) -> Result<&[u8], TransportError> {
    if frame.len() < MBAP_HEADER_LEN + 2 {
        return Err(TransportError::Protocol(format!(
            "TCP frame too short: {}B",
            frame.len()
        )));
    }

    let tid = u16::from_be_bytes([frame[0], frame[1]]);
    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
    let length = usize::from(u16::from_be_bytes([frame[4], frame[5]]));

    if protocol_id != 0 {
        return Err(TransportError::Protocol(format!(
            "Invalid protocol id: {protocol_id}"
        )));
    }
    if frame.len() != MBAP_HEADER_LEN + length {
        return Err(TransportError::Protocol(format!(
            "TCP length mismatch: header={length} actual={}",
            frame.len() - MBAP_HEADER_LEN
        )));
    }
    if tid != transaction_id {
        return Err(TransportError::Protocol(format!(
            "Transaction id mismatch: expected {transaction_id:04X}, got {tid:04X}"
        )));
    }
    if frame[MBAP_HEADER_LEN] != unit_id {
        return Err(TransportError::Protocol(format!(
            "Unit id mismatch: expected {unit_id}, got {}",
            frame[MBAP_HEADER_LEN]
        )));
    }

    Ok(&frame[MBAP_HEADER_LEN + 1..])
}

/// Check CRC and unit id of an RTU response and return its PDU
pub fn decode_rtu(frame: &[u8], unit_id: u8) -> Result<&[u8], TransportError> {
    if frame.len() < 4 {
        return Err(TransportError::Protocol(format!(
            "RTU frame too short: {}B",
            frame.len()
        )));
    }

    let body_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[body_len], frame[body_len + 1]]);
    let calculated = crc16(&frame[..body_len]);
    if received != calculated {
        return Err(TransportError::Protocol(format!(
            "CRC mismatch: expected 0x{calculated:04X}, got 0x{received:04X}"
        )));
    }
    if frame[0] != unit_id {
        return Err(TransportError::Protocol(format!(
            "Unexpected response from slave {}",
            frame[0]
        )));
    }

    Ok(&frame[1..body_len])
}

/// Full length of an RTU response once enough of it has arrived to tell
pub fn expected_rtu_len(partial: &[u8]) -> Option<usize> {
    let function = *partial.get(1)?;
    if function & 0x80 != 0 {
        return Some(5);
    }
    match FunctionCode::from_code(function) {
        Some(fc) if fc.is_read() => partial.get(2).map(|&count| 3 + usize::from(count) + 2),
        Some(_) => Some(8),
        None => Some(partial.len()),
    }
}

/// Extract register words (reads) or the echoed address and value (writes)
///
/// A read response carrying fewer registers than requested is returned as is;
/// the caller decides which points are still covered.
pub fn parse_response(pdu: &[u8], request: &WireRequest) -> Result<Vec<u16>, TransportError> {
    let function = *pdu
        .first()
        .ok_or_else(|| TransportError::Protocol("Empty response PDU".to_string()))?;
    let expected = request.function.code();

    if function & 0x80 != 0 {
        let code = pdu.get(1).copied().ok_or_else(|| {
            TransportError::Protocol("Invalid exception response".to_string())
        })?;
        debug!("Exception FC{:02X}: {:#04x}", function & 0x7F, code);
        return Err(TransportError::exception(function & 0x7F, code));
    }
    if function != expected {
        return Err(TransportError::Protocol(format!(
            "Function code mismatch: expected {expected:02X}, got {function:02X}"
        )));
    }

    if request.function.is_read() {
        let byte_count = usize::from(*pdu.get(1).ok_or_else(|| {
            TransportError::Protocol("Read response without byte count".to_string())
        })?);
        let data = &pdu[2..];
        let available = byte_count.min(data.len());
        if available != byte_count || byte_count % 2 != 0 {
            warn!(
                "Byte count mismatch: declared={} actual={}",
                byte_count,
                data.len()
            );
        }
        let words: Vec<u16> = data[..available]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        if words.len() < usize::from(request.quantity_or_value) {
            warn!(
                "Short read: requested={} got={}",
                request.quantity_or_value,
                words.len()
            );
        }
        Ok(words)
    } else {
        if pdu.len() < 5 {
            return Err(TransportError::Protocol(format!(
                "Write response too short: {}B",
                pdu.len()
            )));
        }
        let address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let value = u16::from_be_bytes([pdu[3], pdu[4]]);
        if address != request.address || value != request.quantity_or_value {
            return Err(TransportError::Protocol(format!(
                "Write echo mismatch: {address}={value}"
            )));
        }
        Ok(vec![address, value])
    }
}

pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

/// Response PDU for a request, as a device would answer it
pub fn response_pdu(request: &WireRequest, words: &[u16]) -> BytesMut {
    let mut pdu = BytesMut::with_capacity(2 + words.len() * 2);
    pdu.put_u8(request.function.code());
    if request.function.is_read() {
        pdu.put_u8((words.len() * 2) as u8);
        for &word in words {
            pdu.put_u16(word);
        }
    } else {
        pdu.put_u16(request.address);
        pdu.put_u16(request.quantity_or_value);
    }
    pdu
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn read_holding(address: u16, quantity: u16) -> WireRequest {
        WireRequest::read(1, FunctionCode::ReadHoldingRegisters, address, quantity)
    }

    // ========== encoding tests ==========

    #[test]
    fn test_build_pdu_read() {
        let pdu = build_pdu(&read_holding(0x006B, 3));
        assert_eq!(pdu.as_ref(), &[0x03, 0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn test_build_pdu_write_coil() {
        let pdu = build_pdu(&WireRequest::write_coil(1, 0x00AC, true));
        assert_eq!(pdu.as_ref(), &[0x05, 0x00, 0xAC, 0xFF, 0x00]);
    }

    #[test]
    fn test_encode_tcp_header() {
        let frame = encode_tcp(0x0102, 7, &[0x04, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(
            frame.as_ref(),
            &[0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x07, 0x04, 0x00, 0x00, 0x00, 0x02]
        );
    }

    #[test]
    fn test_crc16_known_vector() {
        // 01 03 00 00 00 0A -> C5 CD
        let frame = encode_rtu(1, &[0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(&frame[6..], &[0xC5, 0xCD]);
    }

    // ========== decoding tests ==========

    #[test]
    fn test_decode_tcp_checks_transaction_id() {
        let frame = encode_tcp(5, 1, &[0x03, 0x02, 0x00, 0x2A]);
        assert!(decode_tcp(&frame, 5, 1).is_ok());
        assert!(matches!(
            decode_tcp(&frame, 6, 1),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            decode_tcp(&frame, 5, 2),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_rtu_rejects_bad_crc() {
        let mut frame = encode_rtu(1, &[0x03, 0x02, 0x00, 0x2A]).to_vec();
        assert_eq!(decode_rtu(&frame, 1).unwrap(), &[0x03, 0x02, 0x00, 0x2A]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(decode_rtu(&frame, 1).is_err());
    }

    #[test]
    fn test_expected_rtu_len() {
        assert_eq!(expected_rtu_len(&[0x01]), None);
        assert_eq!(expected_rtu_len(&[0x01, 0x03]), None);
        assert_eq!(expected_rtu_len(&[0x01, 0x03, 0x04]), Some(9));
        assert_eq!(expected_rtu_len(&[0x01, 0x83]), Some(5));
        assert_eq!(expected_rtu_len(&[0x01, 0x06]), Some(8));
    }

    #[test]
    fn test_parse_read_response() {
        let request = read_holding(0, 2);
        let pdu = response_pdu(&request, &[0x1234, 0x5678]);
        assert_eq!(parse_response(&pdu, &request).unwrap(), vec![0x1234, 0x5678]);
    }

    #[test]
    fn test_parse_short_read_returns_available_words() {
        let request = read_holding(0, 4);
        let pdu = response_pdu(&request, &[1, 2]);
        assert_eq!(parse_response(&pdu, &request).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_parse_exception_response() {
        let request = read_holding(0, 1);
        let err = parse_response(&[0x83, 0x02], &request).unwrap_err();
        assert_eq!(err, TransportError::exception(0x03, 0x02));
    }

    #[test]
    fn test_parse_function_mismatch() {
        let request = read_holding(0, 1);
        let err = parse_response(&[0x04, 0x02, 0x00, 0x01], &request).unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn test_parse_write_echo() {
        let request = WireRequest::write_register(1, 10, 500);
        let pdu = response_pdu(&request, &[]);
        assert_eq!(parse_response(&pdu, &request).unwrap(), vec![10, 500]);

        let other = WireRequest::write_register(1, 10, 501);
        assert!(parse_response(&pdu, &other).is_err());
    }
}
