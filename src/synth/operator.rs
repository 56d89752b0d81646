//! FM operator: an envelope-shaped oscillator

use serde::Serialize;
use serde_json::Value;

use super::config::{get_node, FromConfig, Lerp};
use super::envelope::{Envelope, EnvelopeConfig};
use super::fm::{FmConfig, FmOscillator};
use crate::error::Result;
use crate::midi::channel_state::ChannelState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorConfig {
    pub eg: EnvelopeConfig,
    pub fm: FmConfig,
}

impl OperatorConfig {
    pub fn with_inputs(inputs: usize) -> Self {
        Self {
            eg: EnvelopeConfig::default(),
            fm: FmConfig::with_inputs(inputs),
        }
    }

    pub fn from_config(config: &Value, inputs: usize) -> Result<Self> {
        Ok(Self {
            eg: EnvelopeConfig::from_config(get_node(config, "eg", "operator")?)?,
            fm: FmConfig::from_config(get_node(config, "fm", "operator")?, inputs)?,
        })
    }
}

impl Lerp for OperatorConfig {
    fn lerp(&self, other: &Self, pos: f32) -> Self {
        Self {
            eg: self.eg.lerp(&other.eg, pos),
            fm: self.fm.lerp(&other.fm, pos),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Operator {
    envelope: Envelope,
    oscillator: FmOscillator,
}

impl Operator {
    pub fn new(config: OperatorConfig) -> Self {
        Self {
            envelope: Envelope::new(config.eg),
            oscillator: FmOscillator::new(config.fm),
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn set_config(&mut self, config: OperatorConfig) {
        self.envelope.set_config(config.eg);
        self.oscillator.set_config(config.fm);
    }

    pub fn note_on(&mut self, state: &ChannelState, frequency: f32) {
        self.envelope.note_on(state);
        self.oscillator.note_on(frequency);
    }

    pub fn note_off(&mut self) {
        self.envelope.note_off();
    }

    pub fn clear(&mut self) {
        self.envelope.clear();
    }

    pub fn set_volume(&mut self, volume_db: f32) {
        self.envelope.set_volume(volume_db);
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.oscillator.set_frequency(frequency);
    }

    pub fn is_end(&self) -> bool {
        self.envelope.is_end()
    }

    /// Returns the envelope level in dB and the scaled oscillator output
    pub fn next_sample(&mut self, step: f32, inputs: &[f32]) -> (f32, f32) {
        let env = self.envelope.next_db(step);
        if env == f32::NEG_INFINITY {
            return (env, 0.0);
        }
        let value = 10f32.powf(env / 40.0) * self.oscillator.next(step, inputs);
        (env, value)
    }
}
