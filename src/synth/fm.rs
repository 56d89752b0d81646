//! Sine oscillator with phase modulation inputs

use std::f32::consts::TAU;

use serde::Serialize;
use serde_json::Value;

use super::config::{invalid, number_or, require_object, Lerp};
use crate::error::Result;

/// Oscillator parameters
///
/// `scale` multiplies the note frequency. `modulation` holds one weight
/// per modulator input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FmConfig {
    pub scale: f32,
    pub modulation: Vec<f32>,
}

impl FmConfig {
    /// Unmodulated oscillator at the note frequency
    pub fn with_inputs(inputs: usize) -> Self {
        Self {
            scale: 1.0,
            modulation: vec![0.0; inputs],
        }
    }

    /// Parse a config that must take exactly `inputs` modulator inputs
    pub fn from_config(config: &Value, inputs: usize) -> Result<Self> {
        const CONTEXT: &str = "fm";
        let object = require_object(config, CONTEXT)?;
        let scale = number_or(object, "scale", 1.0, CONTEXT)?;
        let array = object
            .get("modulation")
            .ok_or_else(|| invalid(CONTEXT, "modulation is missing"))?
            .as_array()
            .ok_or_else(|| invalid(CONTEXT, "modulation is not an array"))?;
        if array.len() != inputs {
            return Err(invalid(
                CONTEXT,
                format_args!("modulation needs {} entries, got {}", inputs, array.len()),
            ));
        }
        let modulation = array
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|v| v as f32)
                    .ok_or_else(|| invalid(CONTEXT, "modulation entry is not a number"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { scale, modulation })
    }
}

impl Lerp for FmConfig {
    fn lerp(&self, other: &Self, pos: f32) -> Self {
        Self {
            scale: self.scale.lerp(&other.scale, pos),
            modulation: self
                .modulation
                .iter()
                .zip(&other.modulation)
                .map(|(a, b)| a.lerp(b, pos))
                .collect(),
        }
    }
}

/// Phase-accumulating sine oscillator
///
/// The phase is kept in cycles within `[0, 1)` so a frequency change never
/// produces a discontinuity.
#[derive(Debug, Clone)]
pub struct FmOscillator {
    config: FmConfig,
    /// Cycles per second
    tangent: f32,
    phase: f32,
}

impl FmOscillator {
    pub fn new(config: FmConfig) -> Self {
        Self {
            config,
            tangent: 0.0,
            phase: 0.0,
        }
    }

    pub fn config(&self) -> &FmConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FmConfig) {
        self.config = config;
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Restart at phase zero
    pub fn note_on(&mut self, frequency: f32) {
        self.phase = 0.0;
        self.tangent = frequency * self.config.scale;
    }

    /// Change frequency while keeping the phase
    pub fn set_frequency(&mut self, frequency: f32) {
        self.tangent = frequency * self.config.scale;
    }

    /// Produce one sample, then advance by `step` seconds
    pub fn next(&mut self, step: f32, inputs: &[f32]) -> f32 {
        let modulation: f32 = self
            .config
            .modulation
            .iter()
            .zip(inputs)
            .map(|(w, x)| w * x)
            .sum();
        let value = (TAU * (modulation + self.phase)).sin();
        self.phase = (self.phase + self.tangent * step).rem_euclid(1.0);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_parse() {
        let config = FmConfig::from_config(&json!({ "scale": 2, "modulation": [0.5] }), 1).unwrap();
        assert_eq!(config.scale, 2.0);
        assert_eq!(config.modulation, vec![0.5]);

        let config = FmConfig::from_config(&json!({ "modulation": [] }), 0).unwrap();
        assert_eq!(config.scale, 1.0);

        assert!(FmConfig::from_config(&json!({ "modulation": [] }), 1).is_err());
        assert!(FmConfig::from_config(&json!({ "scale": 1 }), 0).is_err());
        assert!(FmConfig::from_config(&json!({ "modulation": ["x"] }), 1).is_err());
        let err = FmConfig::from_config(&json!({ "scale": "x", "modulation": [] }), 0).unwrap_err();
        assert!(err.to_string().contains("scale"));
    }

    #[test]
    fn test_sine_period() {
        let mut osc = FmOscillator::new(FmConfig::with_inputs(0));
        osc.note_on(1000.0);
        let step = 1.0 / 8000.0;
        let samples: Vec<f32> = (0..8).map(|_| osc.next(step, &[])).collect();
        assert!(samples[0].abs() < 1e-6);
        assert!((samples[2] - 1.0).abs() < 1e-5);
        assert!((samples[6] + 1.0).abs() < 1e-5);
        assert!(osc.phase().abs() < 1e-5 || (osc.phase() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_frequency_change_keeps_phase() {
        let mut osc = FmOscillator::new(FmConfig::with_inputs(0));
        osc.note_on(440.0);
        for _ in 0..37 {
            osc.next(1.0 / 44100.0, &[]);
        }
        let phase = osc.phase();
        osc.set_frequency(880.0);
        assert_eq!(osc.phase(), phase);
        let expected = (TAU * phase).sin();
        assert!((osc.next(1.0 / 44100.0, &[]) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_modulation_input() {
        let mut osc = FmOscillator::new(FmConfig {
            scale: 1.0,
            modulation: vec![0.25],
        });
        osc.note_on(0.0);
        assert!((osc.next(0.001, &[1.0]) - 1.0).abs() < 1e-6);
        assert!(osc.next(0.001, &[0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_lerp() {
        let a = FmConfig {
            scale: 1.0,
            modulation: vec![0.0],
        };
        let b = FmConfig {
            scale: 3.0,
            modulation: vec![2.0],
        };
        let mid = a.lerp(&b, 0.5);
        assert_eq!(mid.scale, 2.0);
        assert_eq!(mid.modulation, vec![1.0]);
    }
}
