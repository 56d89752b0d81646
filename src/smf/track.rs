//! Multi-track event scheduler
//!
//! Merges the delta-time encoded tracks of a Standard MIDI File into a single
//! time-ordered feed and converts wall-clock advances into ticks.

use std::time::Duration;

use super::decode::{decode_vlq, SmfReader};
use super::header::{decode_header, SmfHeader, TimeDivision, HEADER_SIZE};
use crate::error::{Error, Result};

/// Maximum number of tracks a scheduler accepts
pub const MAX_TRACKS: usize = 32;

/// Tempo in effect until the first Set Tempo meta event (120 BPM)
pub const DEFAULT_TEMPO: u32 = 500_000;

/// Track chunk magic
pub const TRACK_MAGIC: [u8; 4] = *b"MTrk";

/// Meta event type for Set Tempo
pub const META_TEMPO: u8 = 0x51;

/// Meta event type for End of Track
pub const META_END_OF_TRACK: u8 = 0x2F;

/// Downstream consumer of scheduled messages
pub trait MidiEventHandler {
    /// Handle one message; `payload` holds the bytes following the status byte
    fn handle(&mut self, status: u8, payload: &[u8]) -> Result<()>;
}

/// Read position within one track chunk
#[derive(Debug)]
struct TrackCursor<'a> {
    index: usize,
    data: &'a [u8],
    pos: usize,
    /// Ticks until the next message
    left: i64,
    running_status: Option<u8>,
}

impl<'a> TrackCursor<'a> {
    fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Decode the delay preceding the next message
    fn prime(&mut self) -> Result<()> {
        let (delay, len) = decode_vlq(&self.data[self.pos..])?;
        self.pos += len;
        self.left = delay as i64;
        Ok(())
    }

    /// Resolve the status byte of the next message, applying running status
    fn next_status(&mut self) -> Result<u8> {
        let head = self.data[self.pos];
        if head & 0x80 != 0 {
            self.pos += 1;
            if head < 0xF0 {
                self.running_status = Some(head);
            } else {
                self.running_status = None;
            }
            return Ok(head);
        }
        self.running_status.ok_or_else(|| {
            Error::InvalidMidiMessage(format!(
                "Data byte {:#04x} without running status in track {}",
                head, self.index
            ))
        })
    }

    /// Length of the message body following `status`
    fn message_len(&self, status: u8) -> Result<usize> {
        let rest = &self.data[self.pos..];
        let len = match status {
            0x80..=0xBF | 0xE0..=0xEF => 2,
            0xC0..=0xDF => 1,
            0xF0 | 0xF7 => {
                let (length, prefix) = decode_vlq(rest)
                    .map_err(|_| Error::InvalidMidiMessage("Bad SysEx length".into()))?;
                prefix + length as usize
            }
            0xFF => {
                if rest.is_empty() {
                    return Err(Error::InvalidMidiMessage("Missing meta event type".into()));
                }
                let (length, prefix) = decode_vlq(&rest[1..])
                    .map_err(|_| Error::InvalidMidiMessage("Bad meta event length".into()))?;
                1 + prefix + length as usize
            }
            0xF1 | 0xF3 => 1,
            0xF2 => 2,
            0xF6 | 0xF8 | 0xFA..=0xFC | 0xFE => 0,
            other => {
                return Err(Error::InvalidMidiMessage(format!(
                    "Unknown status byte {:#04x}",
                    other
                )));
            }
        };
        if rest.len() < len {
            return Err(Error::InvalidMidiMessage(format!(
                "Message {:#04x} runs past the end of track {}",
                status, self.index
            )));
        }
        Ok(len)
    }
}

/// Merges all tracks of one file into a single ordered event stream
#[derive(Debug)]
pub struct TrackScheduler<'a> {
    header: SmfHeader,
    /// Ascending by remaining delay
    run_list: Vec<TrackCursor<'a>>,
    /// Microseconds per quarter note
    tempo: u32,
    /// Elapsed time not yet converted to ticks, in ns × ticks-per-quarter
    /// units for metrical files and in ns for SMPTE files
    overrun: u128,
}

impl<'a> TrackScheduler<'a> {
    /// Parse the header and every track chunk of `data`
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let header = decode_header(data)?;
        let ntrks = header.ntrks as usize;
        if ntrks > MAX_TRACKS {
            return Err(Error::InvalidTrackChunk {
                index: MAX_TRACKS,
                message: format!("{} tracks declared, at most {} supported", ntrks, MAX_TRACKS),
            });
        }

        let mut reader = SmfReader::new(&data[HEADER_SIZE..]);
        let mut scheduler = Self {
            header,
            run_list: Vec::with_capacity(ntrks),
            tempo: DEFAULT_TEMPO,
            overrun: 0,
        };

        for index in 0..ntrks {
            let chunk_err = |message: &str| Error::InvalidTrackChunk {
                index,
                message: message.to_string(),
            };
            let magic = reader
                .read_bytes(TRACK_MAGIC.len())
                .map_err(|_| chunk_err("Truncated chunk header"))?;
            if magic != TRACK_MAGIC {
                return Err(chunk_err("Invalid MTrk magic"));
            }
            let length = reader
                .read_u32()
                .map_err(|_| chunk_err("Truncated chunk length"))?;
            let body = reader
                .read_bytes(length as usize)
                .map_err(|_| chunk_err("Chunk length exceeds file size"))?;

            let mut track = TrackCursor {
                index,
                data: body,
                pos: 0,
                left: 0,
                running_status: None,
            };
            if track.is_exhausted() {
                continue;
            }
            track.prime()?;
            scheduler.insert(track);
        }

        tracing::debug!(
            format = ?header.format,
            tracks = scheduler.run_list.len(),
            division = ?header.division,
            "Loaded SMF"
        );
        Ok(scheduler)
    }

    /// Parsed file header
    pub fn header(&self) -> &SmfHeader {
        &self.header
    }

    /// Current tempo in microseconds per quarter note
    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    /// Whether every track has been played to its end
    pub fn is_finished(&self) -> bool {
        self.run_list.is_empty()
    }

    /// Insert after every track with an equal or smaller delay
    fn insert(&mut self, track: TrackCursor<'a>) {
        let at = self
            .run_list
            .iter()
            .position(|t| t.left > track.left)
            .unwrap_or(self.run_list.len());
        self.run_list.insert(at, track);
    }

    /// Numerator multiplier and denominator converting ns to ticks
    fn tick_ratio(&self) -> (u128, u128) {
        match self.header.division {
            TimeDivision::TicksPerQuarter(tpq) => (tpq as u128, self.tempo as u128 * 1000),
            TimeDivision::Smpte { ns_per_tick, .. } => (1, ns_per_tick as u128),
        }
    }

    /// Wall-clock time until the head event becomes due
    pub fn time_until_next_event(&self) -> Option<Duration> {
        let head = self.run_list.first()?;
        let (mul, div) = self.tick_ratio();
        let needed = (head.left.max(0) as u128 * div).saturating_sub(self.overrun);
        let ns = needed.div_ceil(mul);
        Some(Duration::from_nanos(ns as u64))
    }

    /// Advance playback by `elapsed`, dispatching every event that becomes due
    pub fn advance<H: MidiEventHandler>(&mut self, elapsed: Duration, handler: &mut H) -> Result<()> {
        let (mul, div) = self.tick_ratio();
        let total = elapsed.as_nanos() * mul + self.overrun;
        let mut available = (total / div) as i64;
        self.overrun = total % div;

        loop {
            let Some(head) = self.run_list.first() else {
                break;
            };
            if head.left > available {
                for track in &mut self.run_list {
                    track.left -= available;
                }
                break;
            }

            let delta = head.left;
            available -= delta;
            for track in &mut self.run_list {
                track.left -= delta;
            }

            let mut track = self.run_list.remove(0);
            if self.dispatch(&mut track, handler)? && !track.is_exhausted() {
                track.prime()?;
                self.insert(track);
            }
        }
        Ok(())
    }

    /// Dispatch the track's next message; false once the track has ended
    fn dispatch<H: MidiEventHandler>(&mut self, track: &mut TrackCursor<'a>, handler: &mut H) -> Result<bool> {
        if track.is_exhausted() {
            return Ok(false);
        }
        let status = track.next_status()?;
        let len = track.message_len(status)?;
        let payload = &track.data[track.pos..track.pos + len];
        track.pos += len;

        if status == 0xFF {
            match payload[0] {
                META_TEMPO => {
                    self.set_tempo(payload)?;
                    return Ok(true);
                }
                META_END_OF_TRACK => {
                    handler.handle(status, payload)?;
                    tracing::trace!(track = track.index, "End of track");
                    return Ok(false);
                }
                _ => {}
            }
        }
        handler.handle(status, payload)?;
        Ok(true)
    }

    fn set_tempo(&mut self, payload: &[u8]) -> Result<()> {
        let (length, prefix) = decode_vlq(&payload[1..])?;
        let body = &payload[1 + prefix..];
        if length != 3 {
            return Err(Error::InvalidMidiMessage(format!(
                "Set Tempo length {} is not 3",
                length
            )));
        }
        let tempo = (body[0] as u32) << 16 | (body[1] as u32) << 8 | body[2] as u32;
        if tempo == 0 {
            return Err(Error::InvalidMidiMessage("Set Tempo of zero".into()));
        }
        tracing::debug!(tempo, "Tempo change");
        self.tempo = tempo;
        Ok(())
    }
}
