//! Two-operator FM voice without feedback
//!
//! The upper operator takes no inputs and modulates the lower one. Only the
//! lower operator is heard and carries the note volume.

use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use super::config::{get_node, FromConfig, Lerp};
use super::operator::{Operator, OperatorConfig};
use super::Patch;
use crate::error::Result;
use crate::midi::active_note::ActiveNote;
use crate::midi::channel_state::ChannelState;
use crate::midi::handler::VoiceHandler;
use crate::midi::pitch;

/// General MIDI percussion channel (channel 10, index 9)
pub const PERCUSSION_CHANNEL: u8 = 9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwoOpConfig {
    pub upper: OperatorConfig,
    pub lower: OperatorConfig,
}

impl Default for TwoOpConfig {
    fn default() -> Self {
        Self {
            upper: OperatorConfig::with_inputs(0),
            lower: OperatorConfig::with_inputs(1),
        }
    }
}

impl FromConfig for TwoOpConfig {
    fn from_config(config: &Value) -> Result<Self> {
        Ok(Self {
            upper: OperatorConfig::from_config(get_node(config, "upper", "2op")?, 0)?,
            lower: OperatorConfig::from_config(get_node(config, "lower", "2op")?, 1)?,
        })
    }
}

impl Lerp for TwoOpConfig {
    fn lerp(&self, other: &Self, pos: f32) -> Self {
        Self {
            upper: self.upper.lerp(&other.upper, pos),
            lower: self.lower.lerp(&other.lower, pos),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TwoOperator {
    upper: Operator,
    lower: Operator,
}

impl Default for TwoOperator {
    fn default() -> Self {
        Self::new(TwoOpConfig::default())
    }
}

impl TwoOperator {
    pub fn new(config: TwoOpConfig) -> Self {
        Self {
            upper: Operator::new(config.upper),
            lower: Operator::new(config.lower),
        }
    }

    pub fn lower(&self) -> &Operator {
        &self.lower
    }

    pub fn upper(&self) -> &Operator {
        &self.upper
    }
}

impl Patch for TwoOperator {
    type Config = TwoOpConfig;

    fn set_config(&mut self, _state: &ChannelState, config: Rc<TwoOpConfig>) {
        self.upper.set_config(config.upper.clone());
        self.lower.set_config(config.lower.clone());
    }
}

impl VoiceHandler for TwoOperator {
    fn note_on(&mut self, state: &ChannelState, note: &ActiveNote) {
        if state.channel() == PERCUSSION_CHANNEL {
            self.upper.clear();
            self.lower.clear();
            return;
        }
        let frequency = pitch::frequency(state, note);
        self.upper.note_on(state, frequency);
        self.lower.note_on(state, frequency);
        self.upper.set_volume(0.0);
        self.lower.set_volume(pitch::volume_db(state, note));
    }

    fn note_off(&mut self, _state: &ChannelState) {
        self.upper.note_off();
        self.lower.note_off();
    }

    fn clear(&mut self, _state: &ChannelState) {
        self.upper.clear();
        self.lower.clear();
    }

    fn set_volume(&mut self, _state: &ChannelState, volume_db: f32) {
        self.lower.set_volume(volume_db);
    }

    fn set_frequency(&mut self, _state: &ChannelState, frequency: f32) {
        self.upper.set_frequency(frequency);
        self.lower.set_frequency(frequency);
    }

    fn next_sample(&mut self, step: f32) -> (f32, f32) {
        let (_, modulator) = self.upper.next_sample(step, &[]);
        self.lower.next_sample(step, &[modulator])
    }

    fn is_end(&self) -> bool {
        self.lower.is_end()
    }
}
