//! Voice handler that records every call, for diagnostics and tests

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use super::active_note::{ActiveNote, Slot};
use super::channel_state::{ChannelState, Controller};
use super::handler::VoiceHandler;
use super::pitch;

/// One call received by a voice
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum VoiceCall {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
        frequency: f32,
        volume_db: f32,
    },
    NoteOff {
        channel: u8,
    },
    Clear {
        channel: u8,
    },
    SetProgram {
        channel: u8,
        program: u8,
    },
    SetVariable {
        channel: u8,
        controller: Controller,
        aux: u8,
        value: f32,
    },
    SetVolume {
        channel: u8,
        volume_db: f32,
    },
    SetFrequency {
        channel: u8,
        frequency: f32,
    },
    SystemExclusive {
        channel: u8,
        data: Vec<u8>,
    },
}

/// A call tagged with the slot that received it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recorded {
    pub slot: Slot,
    #[serde(flatten)]
    pub call: VoiceCall,
}

/// Log shared by every recording voice of a session
pub type VoiceLog = Rc<RefCell<Vec<Recorded>>>;

/// Voice that appends each call to a shared [`VoiceLog`]
#[derive(Debug)]
pub struct RecordingVoice {
    slot: Slot,
    log: VoiceLog,
    sounding: bool,
}

impl RecordingVoice {
    pub fn new(slot: Slot, log: VoiceLog) -> Self {
        Self {
            slot,
            log,
            sounding: false,
        }
    }

    /// Create `polyphony` voices sharing one new log
    pub fn pool(polyphony: usize) -> (Vec<RecordingVoice>, VoiceLog) {
        let log = VoiceLog::default();
        let voices = (0..polyphony)
            .map(|slot| RecordingVoice::new(slot, log.clone()))
            .collect();
        (voices, log)
    }

    fn record(&self, call: VoiceCall) {
        self.log.borrow_mut().push(Recorded {
            slot: self.slot,
            call,
        });
    }
}

impl VoiceHandler for RecordingVoice {
    fn note_on(&mut self, state: &ChannelState, note: &ActiveNote) {
        self.sounding = true;
        self.record(VoiceCall::NoteOn {
            channel: state.channel(),
            note: note.note(),
            velocity: note.velocity,
            frequency: pitch::frequency(state, note),
            volume_db: pitch::volume_db(state, note),
        });
    }

    fn note_off(&mut self, state: &ChannelState) {
        self.sounding = false;
        self.record(VoiceCall::NoteOff {
            channel: state.channel(),
        });
    }

    fn clear(&mut self, state: &ChannelState) {
        self.sounding = false;
        self.record(VoiceCall::Clear {
            channel: state.channel(),
        });
    }

    fn set_program(&mut self, state: &ChannelState, program: u8) {
        self.record(VoiceCall::SetProgram {
            channel: state.channel(),
            program,
        });
    }

    fn set_variable(&mut self, controller: Controller, aux: u8, state: &ChannelState) {
        self.record(VoiceCall::SetVariable {
            channel: state.channel(),
            controller,
            aux,
            value: state.get(controller, aux),
        });
    }

    fn set_volume(&mut self, state: &ChannelState, volume_db: f32) {
        self.record(VoiceCall::SetVolume {
            channel: state.channel(),
            volume_db,
        });
    }

    fn set_frequency(&mut self, state: &ChannelState, frequency: f32) {
        self.record(VoiceCall::SetFrequency {
            channel: state.channel(),
            frequency,
        });
    }

    fn system_exclusive(&mut self, state: &ChannelState, data: &[u8]) {
        self.record(VoiceCall::SystemExclusive {
            channel: state.channel(),
            data: data.to_vec(),
        });
    }

    fn next_sample(&mut self, _step: f32) -> (f32, f32) {
        if self.sounding {
            (0.0, 0.0)
        } else {
            (f32::NEG_INFINITY, 0.0)
        }
    }

    fn is_end(&self) -> bool {
        !self.sounding
    }
}
