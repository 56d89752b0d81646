//! Voice allocation and MIDI event dispatch
//!
//! The dispatcher owns one voice per slot of polyphony together with the
//! channel and session state. Each scheduled message mutates that state and is
//! forwarded as structured calls to the voices of the notes it affects.

use super::active_note::{ActiveNote, NoteKey, Slot};
use super::channel_state::{
    ChannelState, Controller, Half, DATA_ENTRY_EMPTY, DATA_ENTRY_LSB_PENDING,
    DATA_ENTRY_MSB_PENDING, MAX_14BIT, NULL_PARAMETER,
};
use super::global_state::{Dialect, GlobalState};
use super::handler::VoiceHandler;
use super::pitch;
use super::registry::{NoteRegistry, NoteState};
use super::sysex::{parse_sysex, SysEx};
use crate::error::{Error, Result};
use crate::smf::track::MidiEventHandler;

/// Number of MIDI channels
pub const CHANNELS: usize = 16;

/// RPN whose completed data entry deselects every parameter
pub const RPN_RESET: u16 = 7;

/// Routes MIDI messages to a fixed pool of voices
#[derive(Debug)]
pub struct EventDispatcher<V> {
    voices: Vec<V>,
    free_slots: Vec<Slot>,
    channels: Vec<ChannelState>,
    global: GlobalState,
    registry: NoteRegistry,
    note_count: u64,
}

impl<V: VoiceHandler> EventDispatcher<V> {
    /// Create a dispatcher whose polyphony equals the number of voices
    pub fn new(voices: Vec<V>) -> Self {
        let free_slots = (0..voices.len()).rev().collect();
        Self {
            voices,
            free_slots,
            channels: (0..CHANNELS as u8).map(ChannelState::new).collect(),
            global: GlobalState::new(),
            registry: NoteRegistry::new(),
            note_count: 0,
        }
    }

    pub fn polyphony(&self) -> usize {
        self.voices.len()
    }

    pub fn voices(&self) -> &[V] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [V] {
        &mut self.voices
    }

    pub fn channel(&self, channel: u8) -> &ChannelState {
        &self.channels[channel as usize & 0x0F]
    }

    pub fn global_state(&self) -> &GlobalState {
        &self.global
    }

    pub fn registry(&self) -> &NoteRegistry {
        &self.registry
    }

    /// Number of slots not bound to any note
    pub fn free_slot_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Whether every voice has fallen silent
    pub fn is_silent(&self) -> bool {
        self.voices.iter().all(|v| v.is_end())
    }

    /// Return the slots of notes whose voice has ended to the free pool
    pub fn reclaim_finished_voices(&mut self) -> usize {
        let finished: Vec<Slot> = self
            .registry
            .notes()
            .into_iter()
            .map(|note| note.slot)
            .filter(|&slot| self.voices[slot].is_end())
            .collect();
        for &slot in &finished {
            self.registry.remove_slot(slot);
            self.free_slots.push(slot);
        }
        finished.len()
    }

    /// Handle one message; `payload` holds the bytes after the status byte
    pub fn dispatch(&mut self, status: u8, payload: &[u8]) -> Result<()> {
        match status {
            0x80..=0xEF => self.channel_message(status, payload),
            0xF0 | 0xF7 => self.system_exclusive(status, payload),
            0xF1..=0xF3 | 0xF6 | 0xF8 | 0xFA..=0xFC | 0xFE | 0xFF => {
                tracing::trace!(status, "Ignoring system message");
                Ok(())
            }
            _ => Err(Error::InvalidMidiMessage(format!(
                "Unexpected status byte {:#04x}",
                status
            ))),
        }
    }

    fn channel_message(&mut self, status: u8, payload: &[u8]) -> Result<()> {
        let kind = status & 0xF0;
        let expected = if matches!(kind, 0xC0 | 0xD0) { 1 } else { 2 };
        if payload.len() != expected || payload.iter().any(|&b| b & 0x80 != 0) {
            return Err(Error::InvalidMidiMessage(format!(
                "Bad payload {:02x?} for status {:#04x}",
                payload, status
            )));
        }
        let channel = status & 0x0F;
        match kind {
            0x80 => self.note_off(channel, payload[0]),
            0x90 if payload[1] == 0 => self.note_off(channel, payload[0]),
            0x90 => self.note_on(channel, payload[0], payload[1]),
            0xA0 => self.key_pressure(channel, payload[0], payload[1]),
            0xB0 => self.control_change(channel, payload[0], payload[1]),
            0xC0 => self.program_change(channel, payload[0]),
            0xD0 => self.channel_pressure(channel, payload[0]),
            _ => {
                let raw = (payload[1] as i16) << 7 | payload[0] as i16;
                self.pitch_bend(channel, raw - 0x2000)
            }
        }
    }

    /// Find a slot for a new note, releasing whatever occupied it
    fn acquire_slot(&mut self, key: NoteKey) -> Result<Slot> {
        if let Some((state, existing)) = self.registry.find_any(key) {
            self.registry.remove(state, key);
            self.voices[existing.slot].clear(&self.channels[existing.channel() as usize]);
            return Ok(existing.slot);
        }
        if let Some(slot) = self.free_slots.pop() {
            return Ok(slot);
        }
        if let Some((state, oldest)) = self.registry.oldest() {
            tracing::debug!(
                slot = oldest.slot,
                channel = oldest.channel(),
                note = oldest.note(),
                ?state,
                "Stealing voice"
            );
            self.registry.remove(state, oldest.key);
            self.voices[oldest.slot].clear(&self.channels[oldest.channel() as usize]);
            return Ok(oldest.slot);
        }
        Err(Error::NoVoiceAvailable {
            channel: key.channel(),
            note: key.note(),
        })
    }

    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        let key = NoteKey::new(channel, note);
        let slot = self.acquire_slot(key)?;
        self.note_count += 1;
        let active = ActiveNote {
            key,
            order: self.note_count,
            slot,
            velocity,
            key_pressure: 127,
        };
        self.registry.insert(NoteState::Sounding, active)?;
        self.voices[slot].note_on(&self.channels[channel as usize], &active);
        Ok(())
    }

    fn note_off(&mut self, channel: u8, note: u8) -> Result<()> {
        let key = NoteKey::new(channel, note);
        let state = &self.channels[channel as usize];
        if state.is_on(Controller::Hold1) {
            self.registry.transfer(key, NoteState::Sounding, NoteState::Held);
        } else if let Some(released) =
            self.registry.transfer(key, NoteState::Sounding, NoteState::Released)
        {
            self.voices[released.slot].note_off(state);
        }
        Ok(())
    }

    /// Move every held note of `channel` to released and send its note off
    fn release_held(&mut self, channel: u8) {
        let state = &self.channels[channel as usize];
        for key in self.registry.keys_in_channel(NoteState::Held, channel) {
            if let Some(note) = self.registry.transfer(key, NoteState::Held, NoteState::Released) {
                self.voices[note.slot].note_off(state);
            }
        }
    }

    fn broadcast_variable(&mut self, channel: u8, controller: Controller, aux: u8) {
        let state = &self.channels[channel as usize];
        for note in self.registry.notes_in_channel(channel) {
            self.voices[note.slot].set_variable(controller, aux, state);
        }
    }

    fn recalculate_volume(&mut self, channel: u8) {
        let state = &self.channels[channel as usize];
        for note in self.registry.notes_in_channel(channel) {
            self.voices[note.slot].set_volume(state, pitch::volume_db(state, &note));
        }
    }

    fn recalculate_frequency(&mut self, channel: u8) {
        let state = &self.channels[channel as usize];
        for note in self.registry.notes_in_channel(channel) {
            self.voices[note.slot].set_frequency(state, pitch::frequency(state, &note));
        }
    }

    fn control_change(&mut self, channel: u8, cc: u8, value: u8) -> Result<()> {
        match cc {
            120 => return self.all_sound_off(channel),
            121 => return self.reset_all_controllers(channel),
            123..=127 => return self.all_notes_off(channel),
            _ => {}
        }
        let Some((controller, half)) = Controller::from_control_change(cc) else {
            tracing::trace!(channel, cc, value, "Ignoring unknown controller");
            return Ok(());
        };
        if controller == Controller::DataEntry {
            return self.data_entry(channel, half, value);
        }

        let state = &mut self.channels[channel as usize];
        let old = state.raw(controller, 0);
        let new = match half {
            Half::Msb => (value as u16) << 7 | (old & 0x7F),
            Half::Lsb => (old & 0x3F80) | value as u16,
        };
        if matches!(controller, Controller::Rpn | Controller::Nrpn) {
            state.set_raw(controller, 0, new);
            self.select_parameter(channel, controller, new);
            return Ok(());
        }
        if old == new {
            return Ok(());
        }
        state.set_raw(controller, 0, new);

        match controller {
            Controller::Volume
            | Controller::Expression
            | Controller::Breath
            | Controller::Foot
            | Controller::Soft => self.recalculate_volume(channel),
            Controller::Hold1 => {
                self.broadcast_variable(channel, controller, 0);
                if old >= super::channel_state::SWITCH_THRESHOLD
                    && new < super::channel_state::SWITCH_THRESHOLD
                {
                    self.release_held(channel);
                }
            }
            Controller::PortamentoTime => {
                if self.channels[channel as usize].is_on(Controller::PortamentoSwitch) {
                    self.broadcast_variable(channel, controller, 0);
                }
            }
            _ => self.broadcast_variable(channel, controller, 0),
        }
        Ok(())
    }

    /// Apply an RPN/NRPN selection; selecting the null parameter resets both
    fn select_parameter(&mut self, channel: u8, register: Controller, value: u16) {
        let state = &mut self.channels[channel as usize];
        if value == MAX_14BIT {
            state.set_raw(Controller::Rpn, 0, NULL_PARAMETER);
            state.set_raw(Controller::Nrpn, 0, NULL_PARAMETER);
        } else {
            let other = if register == Controller::Rpn {
                Controller::Nrpn
            } else {
                Controller::Rpn
            };
            state.set_raw(other, 0, NULL_PARAMETER);
        }
        state.set_raw(Controller::DataEntry, 0, DATA_ENTRY_EMPTY);
    }

    /// Parameter addressed by the current RPN or NRPN selection
    fn parameter_target(&self, channel: u8) -> Option<(Controller, u8)> {
        let state = &self.channels[channel as usize];
        let rpn = state.raw(Controller::Rpn, 0);
        if rpn != NULL_PARAMETER {
            return match rpn {
                0 => Some((Controller::PitchBendSensitivity, 0)),
                1 => Some((Controller::MasterFineTune, 0)),
                2 => Some((Controller::MasterCoarseTune, 0)),
                5 => Some((Controller::ModulationDepthRange, 0)),
                _ => None,
            };
        }
        let nrpn = state.raw(Controller::Nrpn, 0);
        if nrpn == NULL_PARAMETER {
            return None;
        }
        nrpn_target(self.global.dialect(), nrpn)
    }

    /// Accumulate one data entry half; the selected parameter is written
    /// once both halves have arrived
    fn data_entry(&mut self, channel: u8, half: Half, value: u8) -> Result<()> {
        let state = &mut self.channels[channel as usize];
        let mut old = state.raw(Controller::DataEntry, 0);
        if old & DATA_ENTRY_EMPTY == 0 {
            old = DATA_ENTRY_EMPTY;
        }
        let new = match half {
            Half::Msb => (value as u16) << 7 | (old & (DATA_ENTRY_LSB_PENDING | 0x7F)),
            Half::Lsb => value as u16 | (old & (DATA_ENTRY_MSB_PENDING | 0x3F80)),
        };
        if old == new {
            return Ok(());
        }
        state.set_raw(Controller::DataEntry, 0, new);
        if new & DATA_ENTRY_EMPTY != 0 {
            return Ok(());
        }

        if state.raw(Controller::Rpn, 0) == RPN_RESET {
            state.set_raw(Controller::Rpn, 0, NULL_PARAMETER);
            state.set_raw(Controller::Nrpn, 0, NULL_PARAMETER);
            state.set_raw(Controller::DataEntry, 0, DATA_ENTRY_EMPTY);
            return Ok(());
        }
        let Some((controller, aux)) = self.parameter_target(channel) else {
            tracing::trace!(channel, "Data entry without a known parameter");
            return Ok(());
        };
        self.channels[channel as usize].set_raw(controller, aux, new);
        self.broadcast_variable(channel, controller, aux);
        if matches!(
            controller,
            Controller::PitchBendSensitivity
                | Controller::MasterFineTune
                | Controller::MasterCoarseTune
        ) {
            self.recalculate_frequency(channel);
        }
        Ok(())
    }

    fn all_sound_off(&mut self, channel: u8) -> Result<()> {
        let state = &self.channels[channel as usize];
        for note in self.registry.notes_in_channel(channel) {
            self.registry.remove_slot(note.slot);
            self.voices[note.slot].clear(state);
            self.free_slots.push(note.slot);
        }
        Ok(())
    }

    fn all_notes_off(&mut self, channel: u8) -> Result<()> {
        for key in self.registry.keys_in_channel(NoteState::Sounding, channel) {
            self.note_off(channel, key.note())?;
        }
        Ok(())
    }

    fn reset_all_controllers(&mut self, channel: u8) -> Result<()> {
        let state = &mut self.channels[channel as usize];
        let was_held = state.is_on(Controller::Hold1);
        state.reset_controllers();
        if was_held {
            self.release_held(channel);
        }
        self.recalculate_volume(channel);
        self.recalculate_frequency(channel);
        Ok(())
    }

    fn program_change(&mut self, channel: u8, program: u8) -> Result<()> {
        let state = &mut self.channels[channel as usize];
        if state.program() == program {
            return Ok(());
        }
        state.set_program(program);
        let state = &self.channels[channel as usize];
        for note in self.registry.notes_in_channel(channel) {
            self.voices[note.slot].set_program(state, program);
        }
        Ok(())
    }

    fn channel_pressure(&mut self, channel: u8, pressure: u8) -> Result<()> {
        let state = &mut self.channels[channel as usize];
        if state.pressure() == pressure {
            return Ok(());
        }
        state.set_pressure(pressure);
        self.recalculate_volume(channel);
        Ok(())
    }

    fn key_pressure(&mut self, channel: u8, note: u8, pressure: u8) -> Result<()> {
        let key = NoteKey::new(channel, note);
        match self.registry.find_any(key) {
            Some((_, existing)) if existing.key_pressure != pressure => {}
            _ => return Ok(()),
        }
        if let Some(updated) = self.registry.set_key_pressure(key, pressure) {
            let state = &self.channels[channel as usize];
            self.voices[updated.slot].set_volume(state, pitch::volume_db(state, &updated));
        }
        Ok(())
    }

    fn pitch_bend(&mut self, channel: u8, value: i16) -> Result<()> {
        let state = &mut self.channels[channel as usize];
        if state.pitch_bend() == value {
            return Ok(());
        }
        state.set_pitch_bend(value);
        self.recalculate_frequency(channel);
        Ok(())
    }

    fn system_exclusive(&mut self, status: u8, payload: &[u8]) -> Result<()> {
        match parse_sysex(status, payload)? {
            SysEx::SetDialect(dialect) => {
                if self.global.set_dialect(dialect) {
                    for note in self.registry.notes() {
                        self.voices[note.slot].clear(&self.channels[note.channel() as usize]);
                    }
                }
            }
            SysEx::Other(data) => {
                for note in self.registry.notes() {
                    self.voices[note.slot]
                        .system_exclusive(&self.channels[note.channel() as usize], data);
                }
            }
        }
        Ok(())
    }
}

/// Dialect-specific NRPN parameter map
fn nrpn_target(dialect: Dialect, nrpn: u16) -> Option<(Controller, u8)> {
    use Controller::*;
    let xg = match dialect {
        Dialect::Gs => false,
        Dialect::Xg => true,
        Dialect::Gm | Dialect::Gm2 => return None,
    };
    let aux = (nrpn & 0x7F) as u8;
    let target = match (nrpn, xg) {
        (0x88, false) => VibratoRateGs,
        (0x89, false) => VibratoDepthGs,
        (0x8A, false) => VibratoDelayGs,
        (0x88, true) => VibratoRateXg,
        (0x89, true) => VibratoDepthXg,
        (0x8A, true) => VibratoDelayXg,
        (0xA0, _) => TvfCutoffFreq,
        (0xA1, _) => TvfResonance,
        (0xA4, true) => HpfCutoffFreq,
        (0xA5, true) => HpfResonance,
        (0xB0, true) => EqBass,
        (0xB1, true) => EqTreble,
        (0xB2, true) => EqMidBass,
        (0xB3, true) => EqMidTreble,
        (0xB4, true) => EqBassFrequency,
        (0xB5, true) => EqTrebleFrequency,
        (0xB6, true) => EqMidBassFrequency,
        (0xB7, true) => EqMidTrebleFrequency,
        (0xE3, _) => TvfTvaEnvelopeAttackTime,
        (0xE4, _) => TvfTvaEnvelopeDecayTime,
        (0xE6, _) => TvfTvaEnvelopeReleaseTime,
        _ => {
            let bank = match nrpn >> 7 {
                0x18 => DrumPitch,
                0x1A => DrumTva,
                0x1C => DrumPan,
                0x1D => DrumReverb,
                0x1E => DrumChorus,
                _ => return None,
            };
            return Some((bank, aux));
        }
    };
    Some((target, 0))
}

impl<V: VoiceHandler> MidiEventHandler for EventDispatcher<V> {
    fn handle(&mut self, status: u8, payload: &[u8]) -> Result<()> {
        self.dispatch(status, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::recorder::{RecordingVoice, VoiceCall, VoiceLog};

    fn dispatcher(polyphony: usize) -> (EventDispatcher<RecordingVoice>, VoiceLog) {
        let (voices, log) = RecordingVoice::pool(polyphony);
        (EventDispatcher::new(voices), log)
    }

    fn calls(log: &VoiceLog) -> Vec<VoiceCall> {
        log.borrow_mut().drain(..).map(|r| r.call).collect()
    }

    fn count<F: Fn(&VoiceCall) -> bool>(calls: &[VoiceCall], f: F) -> usize {
        calls.iter().filter(|c| f(c)).count()
    }

    #[test]
    fn test_note_on_off() {
        let (mut d, log) = dispatcher(4);
        d.dispatch(0x90, &[60, 100]).unwrap();
        d.dispatch(0x80, &[60, 0]).unwrap();
        let calls = calls(&log);
        assert!(matches!(calls[0], VoiceCall::NoteOn { note: 60, velocity: 100, .. }));
        assert_eq!(calls[1], VoiceCall::NoteOff { channel: 0 });
        assert_eq!(d.registry().count(NoteState::Released), 1);
    }

    #[test]
    fn test_velocity_zero_is_note_off() {
        let (mut d, log) = dispatcher(4);
        d.dispatch(0x93, &[60, 100]).unwrap();
        d.dispatch(0x93, &[60, 0]).unwrap();
        assert_eq!(calls(&log)[1], VoiceCall::NoteOff { channel: 3 });
    }

    #[test]
    fn test_same_key_reuses_slot() {
        let (mut d, log) = dispatcher(4);
        d.dispatch(0x90, &[60, 100]).unwrap();
        d.dispatch(0x90, &[60, 90]).unwrap();
        let recorded = log.borrow().clone();
        assert_eq!(recorded[1].call, VoiceCall::Clear { channel: 0 });
        assert_eq!(recorded[0].slot, recorded[2].slot);
        assert_eq!(d.registry().len(), 1);
        assert_eq!(d.free_slot_count(), 3);
    }

    #[test]
    fn test_steals_oldest() {
        let (mut d, log) = dispatcher(2);
        d.dispatch(0x90, &[60, 100]).unwrap();
        d.dispatch(0x91, &[62, 100]).unwrap();
        d.dispatch(0x80, &[60, 0]).unwrap();
        d.dispatch(0x90, &[64, 100]).unwrap();
        assert!(d.registry().find_any(NoteKey::new(0, 60)).is_none());
        assert!(d.registry().find_any(NoteKey::new(1, 62)).is_some());
        assert!(d.registry().find_any(NoteKey::new(0, 64)).is_some());
        let calls = calls(&log);
        assert_eq!(count(&calls, |c| matches!(c, VoiceCall::Clear { .. })), 1);
    }

    #[test]
    fn test_zero_polyphony() {
        let (mut d, _) = dispatcher(0);
        assert!(matches!(
            d.dispatch(0x90, &[60, 100]),
            Err(Error::NoVoiceAvailable { channel: 0, note: 60 })
        ));
    }

    #[test]
    fn test_hold_pedal() {
        let (mut d, log) = dispatcher(4);
        d.dispatch(0xB0, &[64, 127]).unwrap();
        d.dispatch(0x90, &[60, 100]).unwrap();
        d.dispatch(0x90, &[64, 100]).unwrap();
        d.dispatch(0x80, &[60, 0]).unwrap();
        d.dispatch(0x80, &[64, 0]).unwrap();
        assert_eq!(d.registry().count(NoteState::Held), 2);
        assert_eq!(count(&calls(&log), |c| matches!(c, VoiceCall::NoteOff { .. })), 0);

        // Still above the threshold
        d.dispatch(0xB0, &[64, 0x60]).unwrap();
        assert_eq!(count(&calls(&log), |c| matches!(c, VoiceCall::NoteOff { .. })), 0);

        d.dispatch(0xB0, &[64, 0]).unwrap();
        assert_eq!(count(&calls(&log), |c| matches!(c, VoiceCall::NoteOff { .. })), 2);
        assert_eq!(d.registry().count(NoteState::Released), 2);

        d.dispatch(0xB0, &[64, 0]).unwrap();
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn test_control_change_idempotent() {
        let (mut d, log) = dispatcher(4);
        d.dispatch(0x90, &[60, 100]).unwrap();
        calls(&log);
        d.dispatch(0xB0, &[10, 20]).unwrap();
        d.dispatch(0xB0, &[10, 20]).unwrap();
        let calls = calls(&log);
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            calls[0],
            VoiceCall::SetVariable { controller: Controller::Pan, .. }
        ));
    }

    #[test]
    fn test_volume_recomputes() {
        let (mut d, log) = dispatcher(4);
        d.dispatch(0x90, &[60, 100]).unwrap();
        calls(&log);
        d.dispatch(0xB0, &[7, 50]).unwrap();
        d.dispatch(0xB0, &[7, 50]).unwrap();
        let calls = calls(&log);
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], VoiceCall::SetVolume { .. }));
    }

    #[test]
    fn test_rpn_pitch_bend_sensitivity() {
        let (mut d, log) = dispatcher(4);
        d.dispatch(0x90, &[60, 100]).unwrap();
        d.dispatch(0xB0, &[101, 0]).unwrap();
        d.dispatch(0xB0, &[100, 0]).unwrap();
        calls(&log);
        d.dispatch(0xB0, &[6, 12]).unwrap();
        assert_eq!(d.channel(0).pitch_bend_sensitivity(), 2.0);
        assert!(calls(&log).is_empty());
        d.dispatch(0xB0, &[38, 0]).unwrap();
        assert_eq!(d.channel(0).pitch_bend_sensitivity(), 12.0);
        let calls = calls(&log);
        assert!(matches!(
            calls[0],
            VoiceCall::SetVariable { controller: Controller::PitchBendSensitivity, .. }
        ));
        assert!(matches!(calls[1], VoiceCall::SetFrequency { .. }));
    }

    #[test]
    fn test_null_rpn_resets_registers() {
        let (mut d, _) = dispatcher(1);
        d.dispatch(0xB0, &[101, 0]).unwrap();
        d.dispatch(0xB0, &[100, 0]).unwrap();
        d.dispatch(0xB0, &[101, 0x7F]).unwrap();
        d.dispatch(0xB0, &[100, 0x7F]).unwrap();
        assert_eq!(d.channel(0).raw(Controller::Rpn, 0), NULL_PARAMETER);
        assert_eq!(d.channel(0).raw(Controller::Nrpn, 0), NULL_PARAMETER);
        d.dispatch(0xB0, &[6, 12]).unwrap();
        d.dispatch(0xB0, &[38, 0]).unwrap();
        assert_eq!(d.channel(0).pitch_bend_sensitivity(), 2.0);
    }

    #[test]
    fn test_data_entry_combines_both_halves() {
        let (mut d, log) = dispatcher(1);
        d.dispatch(0x90, &[60, 100]).unwrap();
        for cc in [[101u8, 0], [100, 1]] {
            d.dispatch(0xB0, &cc).unwrap();
        }
        calls(&log);
        let fine = |d: &EventDispatcher<RecordingVoice>| d.channel(0).raw(Controller::MasterFineTune, 0);
        let centered = Controller::MasterFineTune.default_value();

        d.dispatch(0xB0, &[6, 0x41]).unwrap();
        assert_eq!(fine(&d), centered);
        d.dispatch(0xB0, &[38, 0x20]).unwrap();
        assert_eq!(fine(&d), 0x20A0);
        let calls = calls(&log);
        assert_eq!(
            count(&calls, |c| matches!(
                c,
                VoiceCall::SetVariable { controller: Controller::MasterFineTune, .. }
            )),
            1
        );

        // A new pair starts after each completed one
        d.dispatch(0xB0, &[6, 0x42]).unwrap();
        assert_eq!(fine(&d), 0x20A0);
        d.dispatch(0xB0, &[38, 0x20]).unwrap();
        assert_eq!(fine(&d), 0x2120);

        // Halves may arrive in either order
        d.dispatch(0xB0, &[38, 0x01]).unwrap();
        d.dispatch(0xB0, &[6, 0x40]).unwrap();
        assert_eq!(fine(&d), 0x2001);
    }

    #[test]
    fn test_reselecting_parameter_resets_data_entry() {
        let (mut d, _) = dispatcher(1);
        for cc in [[101u8, 0], [100, 0], [6, 5]] {
            d.dispatch(0xB0, &cc).unwrap();
        }
        // Same RPN again discards the pending MSB
        d.dispatch(0xB0, &[100, 0]).unwrap();
        assert_eq!(d.channel(0).raw(Controller::DataEntry, 0), DATA_ENTRY_EMPTY);
        d.dispatch(0xB0, &[38, 0]).unwrap();
        assert_eq!(d.channel(0).pitch_bend_sensitivity(), 2.0);
        d.dispatch(0xB0, &[6, 5]).unwrap();
        assert_eq!(d.channel(0).pitch_bend_sensitivity(), 5.0);
    }

    #[test]
    fn test_rpn_reset_deselects_parameters() {
        let (mut d, log) = dispatcher(1);
        d.dispatch(0x90, &[60, 100]).unwrap();
        for cc in [[101u8, 0], [100, 7]] {
            d.dispatch(0xB0, &cc).unwrap();
        }
        calls(&log);
        d.dispatch(0xB0, &[6, 0]).unwrap();
        d.dispatch(0xB0, &[38, 0]).unwrap();
        assert_eq!(d.channel(0).raw(Controller::Rpn, 0), NULL_PARAMETER);
        assert_eq!(d.channel(0).raw(Controller::Nrpn, 0), NULL_PARAMETER);
        assert_eq!(d.channel(0).raw(Controller::DataEntry, 0), DATA_ENTRY_EMPTY);
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn test_nrpn_needs_dialect() {
        let (mut d, _) = dispatcher(1);
        let attack = [[99u8, 0x01], [98, 0x63], [6, 0x50], [38, 0]];
        for cc in attack {
            d.dispatch(0xB0, &cc).unwrap();
        }
        let centered = Controller::TvfTvaEnvelopeAttackTime.default_value();
        assert_eq!(d.channel(0).raw(Controller::TvfTvaEnvelopeAttackTime, 0), centered);

        let gs_reset = [0x0A, 0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x41, 0xF7];
        d.dispatch(0xF0, &gs_reset).unwrap();
        assert_eq!(d.global_state().dialect(), Dialect::Gs);
        for cc in attack {
            d.dispatch(0xB0, &cc).unwrap();
        }
        assert_eq!(d.channel(0).raw(Controller::TvfTvaEnvelopeAttackTime, 0), 0x50 << 7);
    }

    #[test]
    fn test_drum_bank_nrpn() {
        let (mut d, log) = dispatcher(2);
        let xg_on = [0x08, 0x43, 0x10, 0x4C, 0x00, 0x00, 0x7E, 0x00, 0xF7];
        d.dispatch(0xF0, &xg_on).unwrap();
        d.dispatch(0x99, &[36, 100]).unwrap();
        calls(&log);
        for cc in [[99u8, 0x1A], [98, 36], [6, 0x20], [38, 0]] {
            d.dispatch(0xB9, &cc).unwrap();
        }
        assert_eq!(d.channel(9).raw(Controller::DrumTva, 36), 0x20 << 7);
        assert_eq!(
            calls(&log),
            vec![VoiceCall::SetVariable {
                channel: 9,
                controller: Controller::DrumTva,
                aux: 36,
                value: (0x20 << 7) as f32 / MAX_14BIT as f32,
            }]
        );
    }

    #[test]
    fn test_dialect_change_clears_voices() {
        let (mut d, log) = dispatcher(2);
        d.dispatch(0x90, &[60, 100]).unwrap();
        calls(&log);
        let gm2 = [0x05, 0x7E, 0x7F, 0x09, 0x03, 0xF7];
        d.dispatch(0xF0, &gm2).unwrap();
        assert_eq!(calls(&log), vec![VoiceCall::Clear { channel: 0 }]);
        d.dispatch(0xF0, &gm2).unwrap();
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn test_unknown_sysex_forwarded() {
        let (mut d, log) = dispatcher(2);
        d.dispatch(0x90, &[60, 100]).unwrap();
        calls(&log);
        d.dispatch(0xF0, &[0x03, 0x7D, 0x01, 0xF7]).unwrap();
        assert_eq!(
            calls(&log),
            vec![VoiceCall::SystemExclusive {
                channel: 0,
                data: vec![0x7D, 0x01, 0xF7],
            }]
        );
    }

    #[test]
    fn test_pitch_bend_pushes_frequency() {
        let (mut d, log) = dispatcher(2);
        d.dispatch(0x90, &[69, 100]).unwrap();
        calls(&log);
        d.dispatch(0xE0, &[0x00, 0x40]).unwrap();
        assert!(calls(&log).is_empty());
        d.dispatch(0xE0, &[0x7F, 0x7F]).unwrap();
        let calls = calls(&log);
        match calls[0] {
            VoiceCall::SetFrequency { frequency, .. } => assert!(frequency > 490.0),
            ref other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_program_change() {
        let (mut d, log) = dispatcher(2);
        d.dispatch(0x90, &[60, 100]).unwrap();
        calls(&log);
        d.dispatch(0xC0, &[5]).unwrap();
        d.dispatch(0xC0, &[5]).unwrap();
        assert_eq!(
            calls(&log),
            vec![VoiceCall::SetProgram { channel: 0, program: 5 }]
        );
    }

    #[test]
    fn test_pressure() {
        let (mut d, log) = dispatcher(2);
        d.dispatch(0x90, &[60, 100]).unwrap();
        calls(&log);
        d.dispatch(0xA0, &[60, 64]).unwrap();
        d.dispatch(0xA0, &[61, 64]).unwrap();
        d.dispatch(0xD0, &[90]).unwrap();
        let calls = calls(&log);
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| matches!(c, VoiceCall::SetVolume { .. })));
    }

    #[test]
    fn test_channel_mode_messages() {
        let (mut d, log) = dispatcher(4);
        d.dispatch(0x90, &[60, 100]).unwrap();
        d.dispatch(0x90, &[62, 100]).unwrap();
        d.dispatch(0xB0, &[123, 0]).unwrap();
        assert_eq!(d.registry().count(NoteState::Released), 2);
        d.dispatch(0xB0, &[120, 0]).unwrap();
        assert!(d.registry().is_empty());
        assert_eq!(d.free_slot_count(), 4);
        let calls = calls(&log);
        assert_eq!(count(&calls, |c| matches!(c, VoiceCall::Clear { .. })), 2);
    }

    #[test]
    fn test_reclaim_finished() {
        let (mut d, _) = dispatcher(2);
        d.dispatch(0x90, &[60, 100]).unwrap();
        d.dispatch(0x90, &[62, 100]).unwrap();
        d.dispatch(0x80, &[60, 0]).unwrap();
        assert_eq!(d.free_slot_count(), 0);
        assert_eq!(d.reclaim_finished_voices(), 1);
        assert_eq!(d.free_slot_count(), 1);
        assert_eq!(d.registry().len(), 1);
    }

    #[test]
    fn test_invalid_messages() {
        let (mut d, _) = dispatcher(2);
        assert!(matches!(d.dispatch(0x90, &[60]), Err(Error::InvalidMidiMessage(_))));
        assert!(matches!(d.dispatch(0x90, &[60, 0x80]), Err(Error::InvalidMidiMessage(_))));
        assert!(matches!(d.dispatch(0xF4, &[]), Err(Error::InvalidMidiMessage(_))));
        assert!(matches!(d.dispatch(0x40, &[]), Err(Error::InvalidMidiMessage(_))));
        assert!(d.dispatch(0xF8, &[]).is_ok());
        assert!(d.dispatch(0xB0, &[3, 1]).is_ok());
    }
}
