//! Audio output sinks

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::Result;

/// Destination for mixed mono samples in `[-1.0, 1.0]`
pub trait AudioSink {
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Flush and close the output
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory sink
impl AudioSink for Vec<f32> {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.extend_from_slice(samples);
        Ok(())
    }
}

/// Convert a sample to 16-bit PCM
pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// 16-bit mono PCM WAV file
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    frames: u64,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self {
            writer: Some(writer),
            frames: 0,
        })
    }

    /// Samples written so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl AudioSink for WavSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for &sample in samples {
            writer.write_sample(to_pcm16(sample))?;
        }
        self.frames += samples.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            tracing::debug!(frames = self.frames, "Finalized WAV output");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pcm_conversion() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), 32767);
        assert_eq!(to_pcm16(-1.0), -32767);
        assert_eq!(to_pcm16(2.0), 32767);
        assert_eq!(to_pcm16(0.5), 16383);
    }

    #[test]
    fn test_vec_sink() {
        let mut sink: Vec<f32> = Vec::new();
        sink.write(&[0.1, 0.2]).unwrap();
        sink.write(&[0.3]).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_wav_sink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut sink = WavSink::create(&path, 22050).unwrap();
        sink.write(&[0.0, 0.5, -0.5, 1.0]).unwrap();
        assert_eq!(sink.frames(), 4);
        sink.finish().unwrap();
        // A second finish is a no-op
        sink.finish().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, -16383, 32767]);
    }
}
