//! Sample buffers and WAV encode/decode.

use crate::{Error, Result};
use std::io::Cursor;
use std::path::Path;

/// Decoded stereo sample data.
///
/// Mono sources duplicate into both sides at load so the render path
/// never branches on channel count. The buffer keeps its source rate;
/// playback resamples against the context rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn from_channels(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if left.is_empty() && right.is_empty() {
            return Err(Error::EmptySample);
        }
        let (left, right) = match (left.is_empty(), right.is_empty()) {
            (false, true) => {
                let right = left.clone();
                (left, right)
            }
            (true, false) => {
                let left = right.clone();
                (left, right)
            }
            _ => (left, right),
        };
        debug_assert_eq!(left.len(), right.len());
        Ok(Self {
            left,
            right,
            sample_rate,
        })
    }

    pub fn from_frames(frames: &[(f32, f32)], sample_rate: u32) -> Result<Self> {
        if frames.is_empty() {
            return Err(Error::EmptySample);
        }
        Ok(Self {
            left: frames.iter().map(|f| f.0).collect(),
            right: frames.iter().map(|f| f.1).collect(),
            sample_rate,
        })
    }

    /// A short all-zero buffer, used when a recording captured nothing.
    pub fn silent(frames: usize, sample_rate: u32) -> Self {
        Self {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
            sample_rate,
        }
    }

    /// Decode WAV bytes (16/24/32-bit int or 32-bit float).
    pub fn decode_wav(bytes: &[u8]) -> Result<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => {
                reader.samples::<f32>().collect::<hound::Result<_>>()?
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<hound::Result<_>>()?
            }
        };

        let frames = interleaved.len() / channels;
        if frames == 0 {
            return Err(Error::EmptySample);
        }
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for frame in interleaved.chunks(channels) {
            let l = frame[0];
            let r = if channels >= 2 { frame[1] } else { l };
            left.push(l);
            right.push(r);
        }
        Ok(Self {
            left,
            right,
            sample_rate: spec.sample_rate,
        })
    }

    pub fn load_wav_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::decode_wav(&bytes)
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Frame at an integer index; out of range reads silence.
    #[inline]
    pub fn frame(&self, index: usize) -> (f32, f32) {
        match (self.left.get(index), self.right.get(index)) {
            (Some(&l), Some(&r)) => (l, r),
            _ => (0.0, 0.0),
        }
    }

    /// Linear interpolation at a fractional frame position.
    #[inline]
    pub fn frame_lerp(&self, pos: f64) -> (f32, f32) {
        if pos < 0.0 {
            return (0.0, 0.0);
        }
        let i0 = pos.floor() as usize;
        let frac = (pos - pos.floor()) as f32;
        let (l0, r0) = self.frame(i0);
        let (l1, r1) = self.frame(i0 + 1);
        (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
    }

    pub fn channels(&self) -> (&[f32], &[f32]) {
        (&self.left, &self.right)
    }
}

/// Encode stereo channels as a 32-bit float WAV in memory.
pub fn encode_wav_f32(left: &[f32], right: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for (l, r) in left.iter().zip(right.iter()) {
            writer.write_sample(*l)?;
            writer.write_sample(*r)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Encode stereo channels as a 16-bit int WAV in memory.
pub fn encode_wav_i16(left: &[f32], right: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for (l, r) in left.iter().zip(right.iter()) {
            writer.write_sample((l.clamp(-1.0, 1.0) * 32_767.0) as i16)?;
            writer.write_sample((r.clamp(-1.0, 1.0) * 32_767.0) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
