//! Note frequency and volume derived from channel state

use super::active_note::ActiveNote;
use super::channel_state::ChannelState;

/// Frequency of A4 in Hz
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI note number of A4
pub const A4_NOTE: f32 = 69.0;

/// Pitch bend offset in semitones
pub fn bend_semitones(state: &ChannelState) -> f32 {
    state.pitch_bend() as f32 / 8192.0 * state.pitch_bend_sensitivity()
}

/// Frequency in Hz of a note on a channel, including bend and master tuning
pub fn frequency(state: &ChannelState, note: &ActiveNote) -> f32 {
    let semitones = note.note() as f32 - A4_NOTE + bend_semitones(state) + state.master_tune();
    A4_FREQUENCY * (semitones / 12.0).exp2()
}

/// Note volume in dB: channel volume plus velocity and key pressure
pub fn volume_db(state: &ChannelState, note: &ActiveNote) -> f32 {
    if note.velocity == 0 || note.key_pressure == 0 {
        return f32::NEG_INFINITY;
    }
    state.effective_volume_db()
        + 40.0 * (note.velocity as f32 / 127.0).log10()
        + 40.0 * (note.key_pressure as f32 / 127.0).log10()
}
