//! Record of a note that occupies a voice slot

use serde::Serialize;

/// Index of a voice slot
pub type Slot = usize;

/// Channel and note packed as `channel << 8 | note`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NoteKey(pub u16);

impl NoteKey {
    pub fn new(channel: u8, note: u8) -> Self {
        Self((channel as u16) << 8 | note as u16)
    }

    pub fn channel(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn note(self) -> u8 {
        self.0 as u8
    }

    /// Key range covering every note of `channel`
    pub fn channel_range(channel: u8) -> std::ops::Range<NoteKey> {
        NoteKey::new(channel, 0)..NoteKey((channel as u16 + 1) << 8)
    }
}

/// A note bound to a voice slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveNote {
    pub key: NoteKey,
    /// Monotonic creation order, lower is older
    pub order: u64,
    pub slot: Slot,
    pub velocity: u8,
    /// Polyphonic key pressure, 127 until an aftertouch message arrives
    pub key_pressure: u8,
}

impl ActiveNote {
    pub fn channel(&self) -> u8 {
        self.key.channel()
    }

    pub fn note(&self) -> u8 {
        self.key.note()
    }
}
