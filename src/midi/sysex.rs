//! System exclusive recognition
//!
//! Detects the GM, GM2, XG and GS reset handshakes. Everything else is left to
//! the voices.

use super::global_state::Dialect;
use crate::error::{Error, Result};
use crate::smf::decode::decode_vlq;

/// Universal non-real-time manufacturer id
pub const UNIVERSAL_NON_REALTIME: u8 = 0x7E;

/// Universal sub-id for General MIDI messages
pub const SUB_ID_GENERAL_MIDI: u8 = 0x09;

/// Yamaha manufacturer id
pub const YAMAHA: u8 = 0x43;

/// Yamaha XG model id
pub const XG_MODEL: u8 = 0x4C;

/// Roland manufacturer id
pub const ROLAND: u8 = 0x41;

/// Roland GS model id
pub const GS_MODEL: u8 = 0x42;

/// Roland data set command
pub const ROLAND_DT1: u8 = 0x12;

/// XG System On parameter address
pub const XG_SYSTEM_ON: [u8; 3] = [0x00, 0x00, 0x7E];

/// GS Reset parameter address
pub const GS_RESET: [u8; 3] = [0x40, 0x00, 0x7F];

/// End of exclusive marker
pub const EOX: u8 = 0xF7;

/// Outcome of parsing one system exclusive message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysEx<'a> {
    /// A recognized dialect handshake
    SetDialect(Dialect),
    /// Anything else, with the length prefix removed
    Other(&'a [u8]),
}

/// Roland checksum: the value that brings the 7-bit sum of `bytes` to zero
pub fn gs_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u32, |acc, &b| acc + b as u32);
    ((128 - sum % 128) % 128) as u8
}

fn malformed(kind: &str) -> Error {
    Error::InvalidMidiMessage(format!("Malformed {} system exclusive", kind))
}

/// Parse the payload of an 0xF0 or 0xF7 message as framed by the scheduler
pub fn parse_sysex(status: u8, payload: &[u8]) -> Result<SysEx<'_>> {
    let (length, prefix) =
        decode_vlq(payload).map_err(|_| malformed("length-prefixed"))?;
    let data = payload
        .get(prefix..prefix + length as usize)
        .ok_or_else(|| malformed("truncated"))?;
    if status == EOX {
        return Ok(SysEx::Other(data));
    }

    let body = data.strip_suffix(&[EOX]).unwrap_or(data);
    let dialect = match body.first() {
        Some(&UNIVERSAL_NON_REALTIME) => parse_universal(body)?,
        Some(&YAMAHA) => parse_xg(body)?,
        Some(&ROLAND) => parse_gs(body)?,
        _ => None,
    };
    Ok(match dialect {
        Some(dialect) => SysEx::SetDialect(dialect),
        None => SysEx::Other(data),
    })
}

/// `7E dev 09 sub`
fn parse_universal(body: &[u8]) -> Result<Option<Dialect>> {
    if body.len() < 4 {
        return Err(malformed("universal"));
    }
    if body[2] != SUB_ID_GENERAL_MIDI {
        return Ok(None);
    }
    Ok(match body[3] {
        0x01 | 0x02 => Some(Dialect::Gm),
        0x03 => Some(Dialect::Gm2),
        _ => None,
    })
}

/// `43 1n 4C aa aa aa data`
fn parse_xg(body: &[u8]) -> Result<Option<Dialect>> {
    if body.len() < 3 || body[1] & 0xF0 != 0x10 || body[2] != XG_MODEL {
        return Ok(None);
    }
    if body.len() < 7 {
        return Err(malformed("XG"));
    }
    if body[3..6] != XG_SYSTEM_ON {
        return Ok(None);
    }
    match &body[6..] {
        [0x00] => Ok(Some(Dialect::Xg)),
        _ => Err(malformed("XG System On")),
    }
}

/// `41 dev 42 12 aa aa aa data sum`
fn parse_gs(body: &[u8]) -> Result<Option<Dialect>> {
    if body.len() < 4 || body[2] != GS_MODEL || body[3] != ROLAND_DT1 {
        return Ok(None);
    }
    if body.len() < 9 {
        return Err(malformed("GS"));
    }
    let (checked, sum) = body[4..].split_at(body.len() - 5);
    if gs_checksum(checked) != sum[0] {
        return Err(Error::InvalidMidiMessage(format!(
            "GS checksum mismatch: expected {:#04x}, found {:#04x}",
            gs_checksum(checked),
            sum[0]
        )));
    }
    if checked[..3] != GS_RESET {
        return Ok(None);
    }
    match &checked[3..] {
        [0x00] => Ok(Some(Dialect::Gs)),
        [_] => Ok(None),
        _ => Err(malformed("GS Reset")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(data: &[u8]) -> Vec<u8> {
        let mut payload = vec![data.len() as u8];
        payload.extend_from_slice(data);
        payload
    }

    #[test]
    fn test_gm_handshakes() {
        let on = framed(&[0x7E, 0x7F, 0x09, 0x01, 0xF7]);
        assert_eq!(parse_sysex(0xF0, &on).unwrap(), SysEx::SetDialect(Dialect::Gm));
        let gm2 = framed(&[0x7E, 0x7F, 0x09, 0x03, 0xF7]);
        assert_eq!(parse_sysex(0xF0, &gm2).unwrap(), SysEx::SetDialect(Dialect::Gm2));
        assert!(parse_sysex(0xF0, &framed(&[0x7E, 0x7F, 0xF7])).is_err());
    }

    #[test]
    fn test_xg_system_on() {
        let on = framed(&[0x43, 0x10, 0x4C, 0x00, 0x00, 0x7E, 0x00, 0xF7]);
        assert_eq!(parse_sysex(0xF0, &on).unwrap(), SysEx::SetDialect(Dialect::Xg));
        let other = framed(&[0x43, 0x10, 0x4C, 0x08, 0x00, 0x07, 0x02, 0xF7]);
        assert!(matches!(parse_sysex(0xF0, &other).unwrap(), SysEx::Other(_)));
    }

    #[test]
    fn test_gs_reset_checksum() {
        assert_eq!(gs_checksum(&[0x40, 0x00, 0x7F, 0x00]), 0x41);
        let reset = framed(&[0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x41, 0xF7]);
        assert_eq!(parse_sysex(0xF0, &reset).unwrap(), SysEx::SetDialect(Dialect::Gs));

        let corrupt = framed(&[0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x40, 0xF7]);
        assert!(matches!(
            parse_sysex(0xF0, &corrupt),
            Err(Error::InvalidMidiMessage(_))
        ));
    }

    #[test]
    fn test_unrecognized_forwarded() {
        let data = [0x7D, 0x01, 0x02, 0xF7];
        assert_eq!(parse_sysex(0xF0, &framed(&data)).unwrap(), SysEx::Other(&data[..]));
        let escape = framed(&[0xF3, 0x01]);
        assert_eq!(parse_sysex(0xF7, &escape).unwrap(), SysEx::Other(&[0xF3, 0x01][..]));
    }

    #[test]
    fn test_truncated_payload() {
        assert!(parse_sysex(0xF0, &[0x05, 0x7E]).is_err());
        assert!(parse_sysex(0xF0, &[]).is_err());
    }
}
