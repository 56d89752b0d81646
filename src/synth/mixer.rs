//! Automatic gain mixer
//!
//! Voices are summed and divided by a scale that follows the summed voice
//! energy. The scale rises quickly and falls slowly, and snaps up whenever
//! the output would clip.

use crate::midi::handler::VoiceHandler;

#[derive(Debug, Clone)]
pub struct Mixer {
    /// Seconds per sample
    step: f32,
    /// Milliseconds per sample
    spms: f32,
    current_scale: f32,
}

impl Mixer {
    pub fn new(step: f32) -> Self {
        Self {
            step,
            spms: step * 1000.0,
            current_scale: 0.0,
        }
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    /// Current attenuation in dB
    pub fn current_scale(&self) -> f32 {
        self.current_scale
    }

    /// Target attenuation for a summed energy of `db`
    pub fn get_scale(db: f32) -> f32 {
        if db < -20.0 {
            0.0
        } else if db < 0.0 {
            db * db / 40.0 + db + 10.0
        } else {
            db + 10.0
        }
    }

    /// Advance every voice by one sample and return the mixed value
    pub fn mix<V: VoiceHandler>(&mut self, voices: &mut [V]) -> f32 {
        let mut value_sum = 0.0f32;
        let mut energy = 0.0f32;
        for voice in voices.iter_mut() {
            let (env, value) = voice.next_sample(self.step);
            value_sum += value;
            if env.is_finite() {
                energy += 10f32.powf(env / 40.0);
            }
        }
        let energy_db = 40.0 * energy.log10();

        let requested = Self::get_scale(energy_db);
        let rate = if self.current_scale < requested {
            self.spms
        } else {
            self.spms / 100.0
        };
        self.current_scale += (requested - self.current_scale) * rate;

        let mut value = value_sum * 10f32.powf(-self.current_scale / 40.0);
        if value.abs() > 1.0 && energy_db > self.current_scale {
            self.current_scale = energy_db;
            value = value_sum * 10f32.powf(-self.current_scale / 40.0);
        }
        value.clamp(-1.0, 1.0)
    }

    /// Fill `out` with consecutive mixed samples
    pub fn mix_block<V: VoiceHandler>(&mut self, voices: &mut [V], out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.mix(voices);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::active_note::ActiveNote;
    use crate::midi::channel_state::ChannelState;

    /// Voice producing a fixed envelope and value
    struct Constant {
        env: f32,
        value: f32,
    }

    impl VoiceHandler for Constant {
        fn note_on(&mut self, _state: &ChannelState, _note: &ActiveNote) {}
        fn note_off(&mut self, _state: &ChannelState) {}
        fn clear(&mut self, _state: &ChannelState) {}
        fn set_volume(&mut self, _state: &ChannelState, _volume_db: f32) {}
        fn set_frequency(&mut self, _state: &ChannelState, _frequency: f32) {}
        fn next_sample(&mut self, _step: f32) -> (f32, f32) {
            (self.env, self.value)
        }
        fn is_end(&self) -> bool {
            self.env == f32::NEG_INFINITY
        }
    }

    #[test]
    fn test_scale_curve() {
        assert_eq!(Mixer::get_scale(-30.0), 0.0);
        assert_eq!(Mixer::get_scale(-20.0), 0.0);
        assert_eq!(Mixer::get_scale(-10.0), 2.5);
        assert_eq!(Mixer::get_scale(0.0), 10.0);
        assert_eq!(Mixer::get_scale(6.0), 16.0);
    }

    #[test]
    fn test_silence() {
        let mut mixer = Mixer::new(1.0 / 44100.0);
        let mut voices = vec![Constant {
            env: f32::NEG_INFINITY,
            value: 0.0,
        }];
        assert_eq!(mixer.mix(&mut voices), 0.0);
        assert_eq!(mixer.current_scale(), 0.0);
    }

    #[test]
    fn test_quiet_voice_passes_through() {
        let mut mixer = Mixer::new(1.0 / 44100.0);
        let mut voices = vec![Constant {
            env: -40.0,
            value: 0.1,
        }];
        assert!((mixer.mix(&mut voices) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_never_clips() {
        let mut mixer = Mixer::new(1.0 / 44100.0);
        let mut voices: Vec<Constant> = (0..32)
            .map(|i| Constant {
                env: 0.0,
                value: if i % 2 == 0 { 1.0 } else { 0.9 },
            })
            .collect();
        let mut out = vec![0.0f32; 4410];
        mixer.mix_block(&mut voices, &mut out);
        assert!(out.iter().all(|v| (-1.0..=1.0).contains(v)));
        // The scale snapped up to the summed energy
        assert!(mixer.current_scale() > 0.0);
    }

    #[test]
    fn test_scale_rises_faster_than_it_falls() {
        let step = 1.0 / 1000.0;
        let mut mixer = Mixer::new(step);
        let mut loud = vec![Constant { env: 0.0, value: 0.0 }];
        mixer.mix(&mut loud);
        let risen = mixer.current_scale();
        assert!((risen - 10.0).abs() < 1e-4);

        let mut quiet = vec![Constant {
            env: f32::NEG_INFINITY,
            value: 0.0,
        }];
        mixer.mix(&mut quiet);
        let fallen = risen - mixer.current_scale();
        assert!((fallen - 0.1).abs() < 1e-4);
    }
}
