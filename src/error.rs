use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    #[error("Malformed variable-length quantity")]
    MalformedVlq,

    #[error("Invalid SMF header: {0}")]
    InvalidHeader(String),

    #[error("Invalid track chunk {index}: {message}")]
    InvalidTrackChunk { index: usize, message: String },

    #[error("Invalid MIDI message: {0}")]
    InvalidMidiMessage(String),

    #[error("Invalid MIDI operation: {0}")]
    InvalidMidiOperation(String),

    #[error("No voice available for channel {channel} note {note}")]
    NoVoiceAvailable { channel: u8, note: u8 },

    #[error("Invalid instrument config: {0}")]
    InvalidInstrumentConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
