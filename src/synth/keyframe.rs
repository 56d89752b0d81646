//! Per-note configuration keyframes
//!
//! A keyframe map assigns configurations to a few note numbers. Notes in
//! between get a linear blend of their neighbours; notes outside the range
//! take the nearest keyframe.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use super::config::{parse_key, require_object, FromConfig, Lerp};
use super::Patch;
use crate::error::Result;
use crate::midi::active_note::ActiveNote;
use crate::midi::channel_state::{ChannelState, Controller};
use crate::midi::handler::VoiceHandler;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct KeyframeMap<C> {
    keyframes: BTreeMap<u8, C>,
}

impl<C> Default for KeyframeMap<C> {
    fn default() -> Self {
        Self {
            keyframes: BTreeMap::new(),
        }
    }
}

impl<C> KeyframeMap<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, note: u8, config: C) {
        self.keyframes.insert(note, config);
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }
}

impl<C: Lerp + Clone + Default> KeyframeMap<C> {
    /// Configuration for `note`
    pub fn get(&self, note: u8) -> C {
        let below = self.keyframes.range(..=note).next_back();
        let above = self.keyframes.range(note..).next();
        match (below, above) {
            (None, None) => C::default(),
            (Some((_, config)), None) | (None, Some((_, config))) => config.clone(),
            (Some((&low, config)), Some(_)) if low == note => config.clone(),
            (Some((&low, from)), Some((&high, to))) => {
                let pos = (note - low) as f32 / (high - low) as f32;
                from.lerp(to, pos)
            }
        }
    }
}

impl<C: FromConfig> FromConfig for KeyframeMap<C> {
    fn from_config(config: &Value) -> Result<Self> {
        let object = require_object(config, "keyframes")?;
        let mut keyframes = BTreeMap::new();
        for (key, value) in object {
            let note = parse_key(key, 0x7F, "note", "keyframes")? as u8;
            keyframes.insert(note, C::from_config(value)?);
        }
        Ok(Self { keyframes })
    }
}

/// Voice whose configuration is picked from a keyframe map at each note on
#[derive(Debug, Clone)]
pub struct Keyframed<P: Patch> {
    backend: P,
    keyframes: Rc<KeyframeMap<P::Config>>,
    note: u8,
}

impl<P: Patch> Keyframed<P> {
    pub fn new(backend: P) -> Self {
        Self {
            backend,
            keyframes: Rc::new(KeyframeMap::new()),
            note: 0,
        }
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }
}

impl<P> Patch for Keyframed<P>
where
    P: Patch,
    P::Config: Lerp + Clone + Default,
{
    type Config = KeyframeMap<P::Config>;

    fn set_config(&mut self, state: &ChannelState, config: Rc<Self::Config>) {
        self.keyframes = config;
        self.backend
            .set_config(state, Rc::new(self.keyframes.get(self.note)));
    }
}

impl<P> VoiceHandler for Keyframed<P>
where
    P: Patch,
    P::Config: Lerp + Clone + Default,
{
    fn note_on(&mut self, state: &ChannelState, note: &ActiveNote) {
        self.note = note.note();
        self.backend
            .set_config(state, Rc::new(self.keyframes.get(self.note)));
        self.backend.note_on(state, note);
    }

    fn note_off(&mut self, state: &ChannelState) {
        self.backend.note_off(state);
    }

    fn clear(&mut self, state: &ChannelState) {
        self.backend.clear(state);
    }

    fn set_program(&mut self, state: &ChannelState, program: u8) {
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
