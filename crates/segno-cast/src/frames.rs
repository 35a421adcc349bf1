//! Fixed-size frame assembly and the PCM wire encoding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use segno_core::db_to_linear;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Samples per channel in one cast frame.
pub const CAST_FRAME_SAMPLES: usize = 4096;

/// Attenuation applied before quantization so casts never sit at 0 dBFS.
pub const CAST_HEADROOM_DB: f32 = -1.0;

const INT24_FULL_SCALE: f32 = 8_388_607.0;

/// Wire sample format of a cast chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmFormat {
    /// Interleaved 24-bit little-endian integers, 3 bytes per sample.
    Int24,
    /// Interleaved IEEE 754 little-endian floats.
    Float32,
}

/// One encoded audio chunk on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastChunk {
    pub seq: u64,
    pub format: PcmFormat,
    pub sample_rate: u32,
    /// Stereo frames carried in `payload`.
    pub frames: usize,
    /// Base64 of the interleaved samples.
    pub payload: String,
}

/// Assembles incoming stereo audio into fixed [`CAST_FRAME_SAMPLES`]
/// chunks: clamp, headroom, quantize, base64.
pub struct FramePacker {
    format: PcmFormat,
    sample_rate: u32,
    headroom: f32,
    pending: Vec<(f32, f32)>,
    seq: u64,
}

impl FramePacker {
    pub fn new(format: PcmFormat, sample_rate: u32) -> Self {
        Self {
            format,
            sample_rate,
            headroom: db_to_linear(CAST_HEADROOM_DB),
            pending: Vec::with_capacity(CAST_FRAME_SAMPLES),
            seq: 0,
        }
    }

    /// Feed frames; completed chunks are appended to `out`. Partial
    /// frames stay buffered until the next call fills them.
    pub fn push_frames(&mut self, frames: &[(f32, f32)], out: &mut Vec<CastChunk>) {
        for &frame in frames {
            self.pending.push(frame);
            if self.pending.len() == CAST_FRAME_SAMPLES {
                out.push(self.seal());
            }
        }
    }

    /// Frames buffered toward the next chunk.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    /// Drop buffered audio and restart the sequence at zero.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.seq = 0;
    }

    fn seal(&mut self) -> CastChunk {
        let bytes = match self.format {
            PcmFormat::Int24 => pack_int24(&self.pending, self.headroom),
            PcmFormat::Float32 => pack_float32(&self.pending, self.headroom),
        };
        let chunk = CastChunk {
            seq: self.seq,
            format: self.format,
            sample_rate: self.sample_rate,
            frames: self.pending.len(),
            payload: BASE64.encode(&bytes),
        };
        self.seq += 1;
        self.pending.clear();
        chunk
    }
}

fn pack_int24(frames: &[(f32, f32)], headroom: f32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames.len() * 6);
    for &(left, right) in frames {
        for sample in [left, right] {
            let value = (sample.clamp(-1.0, 1.0) * headroom * INT24_FULL_SCALE).round() as i32;
            let [b0, b1, b2, _] = value.to_le_bytes();
            bytes.extend_from_slice(&[b0, b1, b2]);
        }
    }
    bytes
}

fn pack_float32(frames: &[(f32, f32)], headroom: f32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames.len() * 8);
    for &(left, right) in frames {
        bytes.extend_from_slice(&(left.clamp(-1.0, 1.0) * headroom).to_le_bytes());
        bytes.extend_from_slice(&(right.clamp(-1.0, 1.0) * headroom).to_le_bytes());
    }
    bytes
}

/// Decode a chunk back to stereo frames, undoing the headroom. Serves
/// in-process clients and the tests.
pub fn decode_chunk(chunk: &CastChunk) -> Result<Vec<(f32, f32)>> {
    let bytes = BASE64.decode(&chunk.payload)?;
    let undo = 1.0 / db_to_linear(CAST_HEADROOM_DB);
    let mut frames = Vec::with_capacity(chunk.frames);
    match chunk.format {
        PcmFormat::Int24 => {
            for pair in bytes.chunks_exact(6) {
                let left = int24_le(&pair[0..3]) * undo;
                let right = int24_le(&pair[3..6]) * undo;
                frames.push((left, right));
            }
        }
        PcmFormat::Float32 => {
            for pair in bytes.chunks_exact(8) {
                let left = f32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]) * undo;
                let right = f32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]) * undo;
                frames.push((left, right));
            }
        }
    }
    Ok(frames)
}

fn int24_le(bytes: &[u8]) -> f32 {
    let raw = i32::from(bytes[0]) | i32::from(bytes[1]) << 8 | i32::from(bytes[2]) << 16;
    let signed = if raw & 0x80_0000 != 0 {
        raw | !0xFF_FFFF
    } else {
        raw
    };
    signed as f32 / INT24_FULL_SCALE
}
