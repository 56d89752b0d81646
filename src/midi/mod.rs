//! MIDI channel state, note tracking and event dispatch

pub mod active_note;
pub mod channel_state;
pub mod dispatcher;
pub mod global_state;
pub mod handler;
pub mod pitch;
pub mod recorder;
pub mod registry;
pub mod sysex;

pub use active_note::{ActiveNote, NoteKey, Slot};
pub use channel_state::{ChannelState, Controller};
pub use dispatcher::{EventDispatcher, CHANNELS};
pub use global_state::{Dialect, GlobalState};
pub use handler::VoiceHandler;
pub use recorder::{Recorded, RecordingVoice, VoiceCall, VoiceLog};
pub use registry::{NoteRegistry, NoteState};
