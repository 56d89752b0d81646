//! Playback session: scheduler, dispatcher and mixer driven block by block

use std::time::Duration;

use crate::error::Result;
use crate::midi::dispatcher::EventDispatcher;
use crate::midi::handler::VoiceHandler;
use crate::sink::AudioSink;
use crate::smf::track::TrackScheduler;
use crate::synth::mixer::Mixer;

/// Default output sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default samples per block (10 ms at 44.1 kHz)
pub const DEFAULT_BLOCK_SIZE: usize = 441;

/// Default number of voices
pub const DEFAULT_POLYPHONY: usize = 64;

/// Default limit on rendering after the last event
pub const DEFAULT_MAX_TAIL: Duration = Duration::from_secs(10);

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Rendering parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerOptions {
    pub sample_rate: u32,
    pub block_size: usize,
    /// How long to keep rendering released notes once every track has ended
    pub max_tail: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            max_tail: DEFAULT_MAX_TAIL,
        }
    }
}

/// One SMF playback session
///
/// Each call to [`Player::render_block`] first mixes the block from the
/// current voice state and then advances the scheduler by the block's exact
/// duration. Events at time zero are dispatched on construction.
pub struct Player<'a, V> {
    scheduler: TrackScheduler<'a>,
    dispatcher: EventDispatcher<V>,
    mixer: Mixer,
    options: PlayerOptions,
    /// Nanoseconds × sample rate not yet handed to the scheduler
    carry: u64,
    samples: u64,
    /// Samples rendered after the scheduler finished
    tail_samples: u64,
}

impl<'a, V: VoiceHandler> Player<'a, V> {
    pub fn new(data: &'a [u8], voices: Vec<V>, options: PlayerOptions) -> Result<Self> {
        let mut scheduler = TrackScheduler::new(data)?;
        let mut dispatcher = EventDispatcher::new(voices);
        scheduler.advance(Duration::ZERO, &mut dispatcher)?;
        tracing::info!(
            sample_rate = options.sample_rate,
            block_size = options.block_size,
            polyphony = dispatcher.polyphony(),
            "Starting playback"
        );
        Ok(Self {
            scheduler,
            dispatcher,
            mixer: Mixer::new(1.0 / options.sample_rate as f32),
            options,
            carry: 0,
            samples: 0,
            tail_samples: 0,
        })
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    pub fn scheduler(&self) -> &TrackScheduler<'a> {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &EventDispatcher<V> {
        &self.dispatcher
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Samples rendered so far
    pub fn samples_rendered(&self) -> u64 {
        self.samples
    }

    /// Playback position
    pub fn position(&self) -> Duration {
        let rate = self.options.sample_rate as u128;
        let nanos = self.samples as u128 * NANOS_PER_SECOND as u128 / rate;
        Duration::from_nanos(nanos as u64)
    }

    /// Whether playback is over
    ///
    /// True once every track has ended and every voice is silent, or once the
    /// tail limit is reached.
    pub fn is_finished(&self) -> bool {
        if !self.scheduler.is_finished() {
            return false;
        }
        let rate = self.options.sample_rate as u128;
        let tail_limit = self.options.max_tail.as_nanos() * rate / NANOS_PER_SECOND as u128;
        self.dispatcher.is_silent() || self.tail_samples as u128 >= tail_limit
    }

    /// Exact duration of `samples` samples, carrying the sub-nanosecond rest
    fn block_duration(&mut self, samples: usize) -> Duration {
        let rate = self.options.sample_rate as u64;
        let total = samples as u64 * NANOS_PER_SECOND + self.carry;
        self.carry = total % rate;
        Duration::from_nanos(total / rate)
    }

    /// Render `out.len()` samples and dispatch the events they cover
    pub fn render_block(&mut self, out: &mut [f32]) -> Result<()> {
        let finished = self.scheduler.is_finished();
        self.mixer.mix_block(self.dispatcher.voices_mut(), out);
        self.samples += out.len() as u64;
        if finished {
            self.tail_samples += out.len() as u64;
        }

        let elapsed = self.block_duration(out.len());
        self.scheduler.advance(elapsed, &mut self.dispatcher)?;
        let reclaimed = self.dispatcher.reclaim_finished_voices();
        if reclaimed > 0 {
            tracing::trace!(reclaimed, "Reclaimed finished voices");
        }
        Ok(())
    }

    /// Render the whole file into `sink` and finish it
    ///
    /// Returns the number of samples written.
    pub fn render<S: AudioSink>(&mut self, sink: &mut S) -> Result<u64> {
        let mut block = vec![0.0f32; self.options.block_size.max(1)];
        while !self.is_finished() {
            self.render_block(&mut block)?;
            sink.write(&block)?;
        }
        sink.finish()?;
        tracing::info!(
            samples = self.samples,
            seconds = self.position().as_secs_f64(),
            "Finished playback"
        );
        Ok(self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::recorder::{RecordingVoice, VoiceCall};
    use crate::smf::decode::encode_vlq;
    use crate::smf::header::HEADER_MAGIC;
    use crate::smf::track::TRACK_MAGIC;

    fn smf(division: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut data = HEADER_MAGIC.to_vec();
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        data.extend_from_slice(&division.to_be_bytes());
        for track in tracks {
            data.extend_from_slice(&TRACK_MAGIC);
            data.extend_from_slice(&(track.len() as u32).to_be_bytes());
            data.extend_from_slice(track);
        }
        data
    }

    fn event(delay: u32, bytes: &[u8]) -> Vec<u8> {
        let mut out = encode_vlq(delay);
        out.extend_from_slice(bytes);
        out
    }

    fn options(block_size: usize) -> PlayerOptions {
        PlayerOptions {
            sample_rate: 1000,
            block_size,
            max_tail: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_time_zero_events_before_first_block() {
        let track = [event(0, &[0x90, 60, 100]), event(480, &[0x80, 60, 0])].concat();
        let data = smf(480, &[track]);
        let (voices, log) = RecordingVoice::pool(4);
        let player = Player::new(&data, voices, options(10)).unwrap();
        assert_eq!(log.borrow().len(), 1);
        assert!(!player.is_finished());
    }

    #[test]
    fn test_events_land_on_block_boundaries() {
        // Note off at 500 ms
        let track = [event(0, &[0x90, 60, 100]), event(480, &[0x80, 60, 0])].concat();
        let data = smf(480, &[track]);
        let (voices, log) = RecordingVoice::pool(4);
        let mut player = Player::new(&data, voices, options(10)).unwrap();
        let mut block = vec![0.0; 10];
        for _ in 0..49 {
            player.render_block(&mut block).unwrap();
        }
        assert_eq!(log.borrow().len(), 1);
        player.render_block(&mut block).unwrap();
        let calls: Vec<VoiceCall> = log.borrow().iter().map(|r| r.call.clone()).collect();
        assert!(matches!(calls[1], VoiceCall::NoteOff { channel: 0 }));
        assert_eq!(player.position(), Duration::from_millis(500));
        assert_eq!(player.dispatcher().free_slot_count(), 4);
        assert!(player.is_finished());
    }

    #[test]
    fn test_block_duration_carry() {
        let data = smf(480, &[event(0, &[0xFF, 0x2F, 0x00])]);
        let (voices, _) = RecordingVoice::pool(1);
        let mut player = Player::new(
            &data,
            voices,
            PlayerOptions {
                sample_rate: 44_100,
                block_size: 100,
                max_tail: Duration::ZERO,
            },
        )
        .unwrap();
        // 100 samples at 44.1 kHz is not a whole number of nanoseconds
        let total: u128 = (0..441).map(|_| player.block_duration(100).as_nanos()).sum();
        assert_eq!(total, 1_000_000_000);
    }

    #[test]
    fn test_render_stops_at_tail_limit() {
        // The note is never released
        let track = event(0, &[0x90, 60, 100]);
        let data = smf(480, &[track]);
        let (voices, _) = RecordingVoice::pool(2);
        let mut player = Player::new(&data, voices, options(100)).unwrap();
        let mut out: Vec<f32> = Vec::new();
        let written = player.render(&mut out).unwrap();
        assert_eq!(written, 1000);
        assert_eq!(out.len(), 1000);
    }

    #[test]
    fn test_invalid_file() {
        let (voices, _) = RecordingVoice::pool(1);
        assert!(Player::new(b"RIFF", voices, PlayerOptions::default()).is_err());
    }
}
