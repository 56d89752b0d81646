//! Bank and program selection
//!
//! The configuration document has three sections:
//!
//! ```json
//! {
//!   "instruments": { "<name>": <instrument config> },
//!   "sets": { "<set>": { "<program>": "<name>" } },
//!   "bank": { "<bank>": "<set>" }
//! }
//! ```
//!
//! Banks are 14-bit numbers (MSB << 7 | LSB) and programs are 0..=127.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use super::config::{get_node, invalid, parse_key, require_object, FromConfig};
use super::keyframe::{KeyframeMap, Keyframed};
use super::two_op::{TwoOpConfig, TwoOperator};
use super::Patch;
use crate::error::Result;
use crate::midi::active_note::ActiveNote;
use crate::midi::channel_state::{ChannelState, Controller};
use crate::midi::handler::VoiceHandler;

const CONTEXT: &str = "bank";

/// Instrument configurations indexed by bank and program
#[derive(Debug, Clone)]
pub struct Bank<C> {
    entries: BTreeMap<(u16, u8), Rc<C>>,
}

impl<C> Bank<C> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `(bank, program)`, then `(0, program)`, then the first entry
    pub fn select(&self, bank: u16, program: u8) -> Option<&Rc<C>> {
        self.entries
            .get(&(bank, program))
            .or_else(|| self.entries.get(&(0, program)))
            .or_else(|| self.entries.values().next())
    }
}

impl<C: FromConfig> FromConfig for Bank<C> {
    fn from_config(config: &Value) -> Result<Self> {
        let mut instruments = BTreeMap::new();
        for (name, value) in require_object(get_node(config, "instruments", CONTEXT)?, "instruments")? {
            instruments.insert(name.as_str(), Rc::new(C::from_config(value)?));
        }

        let mut sets = BTreeMap::new();
        for (set_name, programs) in require_object(get_node(config, "sets", CONTEXT)?, "sets")? {
            let mut set = BTreeMap::new();
            for (key, instrument) in require_object(programs, "sets")? {
                let program = parse_key(key, 0x7F, "program", "sets")? as u8;
                let name = instrument
                    .as_str()
                    .ok_or_else(|| invalid("sets", format_args!("program {} is not a name", program)))?;
                let instrument = instruments.get(name).ok_or_else(|| {
                    invalid("sets", format_args!("instrument {:?} is not defined", name))
                })?;
                set.insert(program, instrument.clone());
            }
            sets.insert(set_name.as_str(), set);
        }

        let mut entries = BTreeMap::new();
        for (key, set_name) in require_object(get_node(config, "bank", CONTEXT)?, CONTEXT)? {
            let bank = parse_key(key, 0x3FFF, "bank", CONTEXT)? as u16;
            let set_name = set_name
                .as_str()
                .ok_or_else(|| invalid(CONTEXT, format_args!("bank {} is not a set name", bank)))?;
            let set = sets
                .get(set_name)
                .ok_or_else(|| invalid(CONTEXT, format_args!("set {:?} is not defined", set_name)))?;
            for (&program, instrument) in set {
                entries.insert((bank, program), instrument.clone());
            }
        }

        if entries.is_empty() {
            return Err(invalid(CONTEXT, "no instruments are assigned"));
        }
        Ok(Self { entries })
    }
}

impl<C: Serialize> Serialize for Bank<C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for ((bank, program), config) in &self.entries {
            map.serialize_entry(&format!("{}:{}", bank, program), config.as_ref())?;
        }
        map.end()
    }
}

/// Voice that loads the configuration for its channel's bank and program
#[derive(Debug, Clone)]
pub struct BankSelector<P: Patch> {
    backend: P,
    bank: Rc<Bank<P::Config>>,
}

impl<P: Patch> BankSelector<P> {
    pub fn new(backend: P, bank: Rc<Bank<P::Config>>) -> Self {
        Self { backend, bank }
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    fn load(&mut self, state: &ChannelState, program: u8) {
        if let Some(config) = self.bank.select(state.bank(), program) {
            self.backend.set_config(state, config.clone());
        }
    }
}

impl<P: Patch> VoiceHandler for BankSelector<P> {
    fn note_on(&mut self, state: &ChannelState, note: &ActiveNote) {
        self.load(state, state.program());
        self.backend.note_on(state, note);
    }

    fn note_off(&mut self, state: &ChannelState) {
        self.backend.note_off(state);
    }

    fn clear(&mut self, state: &ChannelState) {
        self.backend.clear(state);
    }

    fn set_program(&mut self, state: &ChannelState, program: u8) {
        self.load(state, program);
        self.backend.clear(state);
        self.backend.set_program(state, program);
    }

    fn set_variable(&mut self, controller: Controller, aux: u8, state: &ChannelState) {
        self.backend.set_variable(controller, aux, state);
    }

    fn set_volume(&mut self, state: &ChannelState, volume_db: f32) {
        self.backend.set_volume(state, volume_db);
    }

    fn set_frequency(&mut self, state: &ChannelState, frequency: f32) {
        self.backend.set_frequency(state, frequency);
    }

    fn system_exclusive(&mut self, state: &ChannelState, data: &[u8]) {
        self.backend.system_exclusive(state, data);
    }

    fn next_sample(&mut self, step: f32) -> (f32, f32) {
        self.backend.next_sample(step)
    }

    fn is_end(&self) -> bool {
        self.backend.is_end()
    }
}

/// The complete FM voice: bank selection, then keyframes, then two operators
pub type FmVoice = BankSelector<Keyframed<TwoOperator>>;

/// Instrument bank for [`FmVoice`]
pub type FmBank = Bank<KeyframeMap<TwoOpConfig>>;

/// Parse an instrument document and build `polyphony` voices sharing it
pub fn load_voices(config: &Value, polyphony: usize) -> Result<Vec<FmVoice>> {
    let bank = Rc::new(FmBank::from_config(config)?);
    tracing::info!(entries = bank.len(), polyphony, "loaded instrument bank");
    Ok((0..polyphony)
        .map(|_| BankSelector::new(Keyframed::new(TwoOperator::default()), bank.clone()))
        .collect())
}
