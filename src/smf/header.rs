//! SMF header chunk decoding

use super::decode::SmfReader;
use crate::error::{Error, Result};
use serde::Serialize;

/// `MThd` followed by the fixed header length of 6
pub const HEADER_MAGIC: [u8; 8] = *b"MThd\0\0\0\x06";

/// Total header chunk size in bytes
pub const HEADER_SIZE: usize = 14;

/// SMF format field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmfFormat {
    /// Format 0: one multi-channel track
    SingleTrack = 0,
    /// Format 1: simultaneous tracks
    Simultaneous = 1,
    /// Format 2: sequentially independent tracks
    Sequential = 2,
}

/// Time division policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDivision {
    /// Metrical time
    TicksPerQuarter(u32),
    /// SMPTE time code
    Smpte {
        frame_rate: u32,
        subdivision: u32,
        ns_per_tick: u64,
    },
}

/// Parsed SMF header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SmfHeader {
    pub format: SmfFormat,
    pub ntrks: u16,
    pub division: TimeDivision,
}

impl SmfHeader {
    /// Ticks per quarter note for metrical files
    pub fn ticks_per_quarter(&self) -> Option<u32> {
        match self.division {
            TimeDivision::TicksPerQuarter(tpq) => Some(tpq),
            TimeDivision::Smpte { .. } => None,
        }
    }
}

/// Decode the 14-byte header chunk at the start of `data`
pub fn decode_header(data: &[u8]) -> Result<SmfHeader> {
    if data.len() < HEADER_SIZE {
        return Err(Error::InvalidHeader("File too small for SMF header".into()));
    }
    if data[..HEADER_MAGIC.len()] != HEADER_MAGIC {
        return Err(Error::InvalidHeader("Invalid MThd magic or length".into()));
    }

    let mut reader = SmfReader::new(&data[HEADER_MAGIC.len()..HEADER_SIZE]);
    let format = match reader.read_u16()? {
        0 => SmfFormat::SingleTrack,
        1 => SmfFormat::Simultaneous,
        2 => SmfFormat::Sequential,
        other => return Err(Error::InvalidHeader(format!("Unknown format {}", other))),
    };
    let ntrks = reader.read_u16()?;
    let division = decode_division(reader.read_u16()?)?;

    Ok(SmfHeader {
        format,
        ntrks,
        division,
    })
}

fn decode_division(division: u16) -> Result<TimeDivision> {
    if division & 0x8000 == 0 {
        if division == 0 {
            return Err(Error::InvalidHeader("Division is zero".into()));
        }
        return Ok(TimeDivision::TicksPerQuarter(division as u32));
    }

    // Top byte holds the negated frame rate as a 7-bit two's-complement value
    let code = ((division >> 8) & 0x7F) as u32;
    let frame_rate = if code == 0 { 0 } else { 0x80 - code };
    let subdivision = (division & 0x7F) as u32;

    // 29 stands for 30000/1001 drop-frame
    let ns_per_tick = match frame_rate {
        24 | 25 | 30 if subdivision != 0 => {
            1_000_000_000u64 / (frame_rate as u64 * subdivision as u64)
        }
        29 if subdivision != 0 => 1_001_000_000_000u64 / (30_000 * subdivision as u64),
        24 | 25 | 29 | 30 => {
            return Err(Error::InvalidHeader("SMPTE subdivision is zero".into()));
        }
        _ => {
            return Err(Error::InvalidHeader(format!(
                "Invalid SMPTE frame rate {}",
                frame_rate
            )));
        }
    };

    Ok(TimeDivision::Smpte {
        frame_rate,
        subdivision,
        ns_per_tick,
    })
}
