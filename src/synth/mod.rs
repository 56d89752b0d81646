//! Two-operator FM synthesizer voices and the output mixer

pub mod bank;
pub mod config;
pub mod envelope;
pub mod fm;
pub mod keyframe;
pub mod mixer;
pub mod operator;
pub mod two_op;

use std::fmt::Debug;
use std::rc::Rc;

use crate::midi::channel_state::ChannelState;
use crate::midi::handler::VoiceHandler;

pub use bank::{load_voices, Bank, BankSelector, FmBank, FmVoice};
pub use config::{FromConfig, Lerp};
pub use envelope::{Envelope, EnvelopeConfig, Stage};
pub use fm::{FmConfig, FmOscillator};
pub use keyframe::{KeyframeMap, Keyframed};
pub use mixer::Mixer;
pub use operator::{Operator, OperatorConfig};
pub use two_op::{TwoOpConfig, TwoOperator};

/// A voice that can be reconfigured between notes
///
/// Configurations are shared between voices, so they are handed over as
/// reference-counted values.
pub trait Patch: VoiceHandler {
    type Config: Debug;

    /// Replace the configuration used from the next note on
    fn set_config(&mut self, state: &ChannelState, config: Rc<Self::Config>);
}
