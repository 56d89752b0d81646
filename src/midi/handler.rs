//! Voice handler interface driven by the event dispatcher

use super::active_note::ActiveNote;
use super::channel_state::{ChannelState, Controller};

/// One slot of polyphony
///
/// The dispatcher owns one handler per slot and forwards every note and
/// controller event that affects the note bound to that slot.
pub trait VoiceHandler {
    /// Start a note
    fn note_on(&mut self, state: &ChannelState, note: &ActiveNote);

    /// Release the current note
    fn note_off(&mut self, state: &ChannelState);

    /// Silence the voice immediately
    fn clear(&mut self, state: &ChannelState);

    /// Program change on the note's channel
    fn set_program(&mut self, _state: &ChannelState, _program: u8) {
        // Default: do nothing
    }

    /// A controller of the note's channel changed; `aux` is the drum note for
    /// drum bank controllers and 0 otherwise
    fn set_variable(&mut self, _controller: Controller, _aux: u8, _state: &ChannelState) {
        // Default: do nothing
    }

    /// New note volume in dB
    fn set_volume(&mut self, state: &ChannelState, volume_db: f32);

    /// New note frequency in Hz
    fn set_frequency(&mut self, state: &ChannelState, frequency: f32);

    /// Unrecognized system exclusive message
    fn system_exclusive(&mut self, _state: &ChannelState, _data: &[u8]) {
        // Default: do nothing
    }

    /// Produce one sample `step` seconds after the previous one
    ///
    /// Returns the envelope level in dB and the sample value.
    fn next_sample(&mut self, step: f32) -> (f32, f32);

    /// Whether the voice has fallen permanently silent
    fn is_end(&self) -> bool;
}
