//! Multi-segment envelope generator
//!
//! Levels are kept in a normalized unit where 1.0 is full scale and
//! [`LOWEST`] is silence. The output in dB is `(level - 1) * 48 + volume`.

use serde::Serialize;
use serde_json::Value;

use super::config::{number_or, require_object, FromConfig, Lerp};
use crate::error::Result;
use crate::midi::channel_state::{ChannelState, Controller};

/// Normalized level treated as silence
pub const LOWEST: f32 = -4.0;

/// dB per normalized level unit
pub const DB_PER_LEVEL: f32 = 48.0;

/// Envelope timing and level parameters; times are in seconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeConfig {
    pub delay: f32,
    pub default_attack1: f32,
    pub default_attack2: f32,
    pub attack_mid: f32,
    pub hold: f32,
    pub default_decay1: f32,
    pub default_decay2: f32,
    pub decay_mid: f32,
    pub sustain: f32,
    pub default_release: f32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            delay: 0.0,
            default_attack1: 0.0,
            default_attack2: 0.0,
            attack_mid: 0.0,
            hold: 0.0,
            default_decay1: 0.0,
            default_decay2: 0.0,
            decay_mid: 0.0,
            sustain: -4.01,
            default_release: 0.0,
        }
    }
}

impl FromConfig for EnvelopeConfig {
    fn from_config(config: &Value) -> Result<Self> {
        const CONTEXT: &str = "envelope";
        let object = require_object(config, CONTEXT)?;
        let d = Self::default();
        Ok(Self {
            delay: number_or(object, "delay", d.delay, CONTEXT)?,
            default_attack1: number_or(object, "default_attack1", d.default_attack1, CONTEXT)?,
            default_attack2: number_or(object, "default_attack2", d.default_attack2, CONTEXT)?,
            attack_mid: number_or(object, "attack_mid", d.attack_mid, CONTEXT)?,
            hold: number_or(object, "hold", d.hold, CONTEXT)?,
            default_decay1: number_or(object, "default_decay1", d.default_decay1, CONTEXT)?,
            default_decay2: number_or(object, "default_decay2", d.default_decay2, CONTEXT)?,
            decay_mid: number_or(object, "decay_mid", d.decay_mid, CONTEXT)?,
            sustain: number_or(object, "sustain", d.sustain, CONTEXT)?,
            default_release: number_or(object, "default_release", d.default_release, CONTEXT)?,
        })
    }
}

impl Lerp for EnvelopeConfig {
    fn lerp(&self, other: &Self, pos: f32) -> Self {
        Self {
            delay: self.delay.lerp(&other.delay, pos),
            default_attack1: self.default_attack1.lerp(&other.default_attack1, pos),
            default_attack2: self.default_attack2.lerp(&other.default_attack2, pos),
            attack_mid: self.attack_mid.lerp(&other.attack_mid, pos),
            hold: self.hold.lerp(&other.hold, pos),
            default_decay1: self.default_decay1.lerp(&other.default_decay1, pos),
            default_decay2: self.default_decay2.lerp(&other.default_decay2, pos),
            decay_mid: self.decay_mid.lerp(&other.decay_mid, pos),
            sustain: self.sustain.lerp(&other.sustain, pos),
            default_release: self.default_release.lerp(&other.default_release, pos),
        }
    }
}

/// Envelope stages in playback order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Delay,
    Attack1,
    Attack2,
    Hold,
    Decay1,
    Decay2,
    Sustain,
    Release,
    End,
}

/// Per-voice envelope generator
#[derive(Debug, Clone)]
pub struct Envelope {
    config: EnvelopeConfig,
    stage: Stage,
    level: f32,
    tangent: f32,
    /// Seconds spent in the current stage
    at: f32,
    /// Target level that ends the current stage
    target: f32,
    attack1: f32,
    attack2: f32,
    decay1: f32,
    decay2: f32,
    release: f32,
    volume: f32,
}

impl Envelope {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self {
            config,
            stage: Stage::End,
            level: LOWEST,
            tangent: 0.0,
            at: 0.0,
            target: LOWEST,
            attack1: 0.0,
            attack2: 0.0,
            decay1: 0.0,
            decay2: 0.0,
            release: 0.0,
            volume: 0.0,
        }
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// Replace the configuration; takes effect at the next note on
    pub fn set_config(&mut self, config: EnvelopeConfig) {
        self.config = config;
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_end(&self) -> bool {
        self.stage == Stage::End
    }

    pub fn set_volume(&mut self, volume_db: f32) {
        self.volume = volume_db;
    }

    /// Recompute stage durations and restart from the delay stage
    pub fn note_on(&mut self, state: &ChannelState) {
        let attack = state.get(Controller::TvfTvaEnvelopeAttackTime, 0) + 1.0;
        let decay = state.get(Controller::TvfTvaEnvelopeDecayTime, 0) + 1.0;
        let release = state.get(Controller::TvfTvaEnvelopeReleaseTime, 0) + 1.0;
        self.attack1 = self.config.default_attack1 * attack;
        self.attack2 = self.config.default_attack2 * attack;
        self.decay1 = self.config.default_decay1 * decay;
        self.decay2 = self.config.default_decay2 * decay;
        self.release = self.config.default_release * release;
        self.enter_delay();
    }

    /// Jump to the release stage from the current level
    pub fn note_off(&mut self) {
        if matches!(self.stage, Stage::Release | Stage::End) {
            return;
        }
        self.enter_release();
    }

    /// Fall silent immediately
    pub fn clear(&mut self) {
        self.enter_end();
    }

    fn begin(&mut self, stage: Stage, level: f32, target: f32, tangent: f32) {
        self.stage = stage;
        self.level = level;
        self.target = target;
        self.tangent = tangent;
        self.at = 0.0;
    }

    fn enter_delay(&mut self) {
        if self.config.delay > 0.0 {
            self.begin(Stage::Delay, LOWEST, LOWEST, 0.0);
        } else {
            self.enter_attack1();
        }
    }

    fn enter_attack1(&mut self) {
        if self.attack1 > 0.0 {
            let mid = self.config.attack_mid;
            self.begin(Stage::Attack1, LOWEST, mid, (mid - LOWEST) / self.attack1);
        } else {
            self.enter_attack2();
        }
    }

    fn enter_attack2(&mut self) {
        if self.attack2 > 0.0 {
            let mid = self.config.attack_mid;
            self.begin(Stage::Attack2, mid, 1.0, (1.0 - mid) / self.attack2);
        } else {
            self.enter_hold();
        }
    }

    fn enter_hold(&mut self) {
        if self.config.hold > 0.0 {
            self.begin(Stage::Hold, 1.0, 1.0, 0.0);
        } else {
            self.enter_decay1();
        }
    }

    fn enter_decay1(&mut self) {
        if self.decay1 > 0.0 {
            let mid = self.config.decay_mid;
            self.begin(Stage::Decay1, 1.0, mid, -(1.0 - mid) / self.decay1);
        } else {
            self.enter_decay2();
        }
    }

    fn enter_decay2(&mut self) {
        if self.decay2 > 0.0 {
            let (mid, sustain) = (self.config.decay_mid, self.config.sustain);
            self.begin(Stage::Decay2, mid, sustain, -(mid - sustain) / self.decay2);
        } else {
            self.enter_sustain();
        }
    }

    fn enter_sustain(&mut self) {
        let sustain = self.config.sustain;
        if sustain > LOWEST {
            self.begin(Stage::Sustain, sustain, sustain, 0.0);
        } else {
            self.enter_end();
        }
    }

    fn enter_release(&mut self) {
        if self.release <= 0.0 || self.level <= LOWEST {
            self.enter_end();
            return;
        }
        let reference = [self.config.sustain, self.config.decay_mid]
            .into_iter()
            .find(|&level| level > LOWEST)
            .unwrap_or(1.0);
        let level = self.level;
        self.begin(Stage::Release, level, LOWEST, -(reference - LOWEST) / self.release);
    }

    fn enter_end(&mut self) {
        self.begin(Stage::End, LOWEST, LOWEST, 0.0);
    }

    fn duration(&self) -> f32 {
        match self.stage {
            Stage::Delay => self.config.delay,
            Stage::Attack1 => self.attack1,
            Stage::Attack2 => self.attack2,
            Stage::Hold => self.config.hold,
            Stage::Decay1 => self.decay1,
            Stage::Decay2 => self.decay2,
            Stage::Sustain | Stage::Release | Stage::End => f32::INFINITY,
        }
    }

    fn enter_next(&mut self) {
        match self.stage {
            Stage::Delay => self.enter_attack1(),
            Stage::Attack1 => self.enter_attack2(),
            Stage::Attack2 => self.enter_hold(),
            Stage::Hold => self.enter_decay1(),
            Stage::Decay1 => self.enter_decay2(),
            Stage::Decay2 => self.enter_sustain(),
            Stage::Release => self.enter_end(),
            Stage::Sustain | Stage::End => {}
        }
    }

    /// Advance by `step` seconds and return the output in dB
    pub fn next_db(&mut self, step: f32) -> f32 {
        if self.stage == Stage::End {
            return f32::NEG_INFINITY;
        }
        if self.stage != Stage::Sustain {
            self.level += self.tangent * step;
            // Never overshoot the stage's exit level
            self.level = if self.tangent >= 0.0 {
                self.level.min(self.target)
            } else {
                self.level.max(self.target)
            };
            self.at += step;
        }
        let output = (self.level - 1.0) * DB_PER_LEVEL + self.volume;

        let finished = match self.stage {
            Stage::Release => self.level <= LOWEST,
            _ => self.at >= self.duration(),
        };
        if finished {
            self.enter_next();
        }
        output
    }
}
