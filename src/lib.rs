pub mod error;
pub mod midi;
pub mod player;
pub mod sink;
pub mod smf;
pub mod synth;

pub use error::{Error, Result};
pub use midi::{EventDispatcher, VoiceHandler};
pub use player::{Player, PlayerOptions};
pub use sink::{AudioSink, WavSink};
pub use smf::{MidiEventHandler, TrackScheduler};
pub use synth::{load_voices, FmVoice, Mixer};
