//! Per-voice color processing.
//!
//! A [`CharacterChain`] runs bitcrush, a pair of color filters, soft
//! saturation and a safety limiter in that order. Chains are small and
//! allocation-free, so the renderer rebuilds one in place whenever the
//! selected profile changes.

use segno_track::fx::{
    high_shelf_coefficients, low_shelf_coefficients, peaking_coefficients, StereoBiquad,
};
use smallvec::SmallVec;

/// Output ceiling of the safety limiter at the end of every chain.
pub const LIMITER_CEILING: f32 = 0.98;

/// Limiter gain recovery time constant.
const LIMITER_RELEASE_SECS: f32 = 0.05;

/// Q shared by the peaking color filters.
const COLOR_PEAK_Q: f32 = 0.9;

/// A named color preset for a pad voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterProfile {
    /// Coarse bitcrush into a pushed low-mid shelf and hard drive.
    Grit,
    /// Gentle low lift, rolled-off top, mild saturation.
    Tape,
    /// Heavy downsample with a telephone-band tilt.
    Lofi,
    /// Safety limiter only.
    Clean,
}

impl CharacterProfile {
    /// Profile for a user-facing name. Matching is case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "grit" => Some(Self::Grit),
            "tape" => Some(Self::Tape),
            "lofi" => Some(Self::Lofi),
            "clean" => Some(Self::Clean),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grit => "grit",
            Self::Tape => "tape",
            Self::Lofi => "lofi",
            Self::Clean => "clean",
        }
    }

    /// Nonzero id stored in the voice's profile cell; 0 means no chain.
    pub(crate) fn id(self) -> u64 {
        match self {
            Self::Grit => 1,
            Self::Tape => 2,
            Self::Lofi => 3,
            Self::Clean => 4,
        }
    }

    pub(crate) fn from_id(id: u64) -> Option<Self> {
        match id {
            1 => Some(Self::Grit),
            2 => Some(Self::Tape),
            3 => Some(Self::Lofi),
            4 => Some(Self::Clean),
            _ => None,
        }
    }
}

/// Mid-tread quantizer with zero-order hold resampling.
struct Bitcrusher {
    levels: f32,
    /// Input samples held per output sample.
    hold: u32,
    counter: u32,
    held: (f32, f32),
}

impl Bitcrusher {
    fn new(bits: u32, downsample: u32) -> Self {
        Self {
            levels: (1u32 << bits) as f32,
            hold: downsample.max(1),
            counter: 0,
            held: (0.0, 0.0),
        }
    }

    fn quantize(&self, x: f32) -> f32 {
        (x * self.levels + 0.5).floor() / self.levels
    }

    fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        if self.counter == 0 {
            self.held = (self.quantize(left), self.quantize(right));
        }
        self.counter += 1;
        if self.counter >= self.hold {
            self.counter = 0;
        }
        self.held
    }
}

/// tanh waveshaper normalized so full scale maps to full scale.
struct SoftClip {
    drive: f32,
    norm: f32,
}

impl SoftClip {
    fn new(drive: f32) -> Self {
        Self {
            drive,
            norm: drive.tanh(),
        }
    }

    fn shape(&self, x: f32) -> f32 {
        (x * self.drive).tanh() / self.norm
    }

    fn process(&self, left: f32, right: f32) -> (f32, f32) {
        (self.shape(left), self.shape(right))
    }
}

/// Instant-attack peak limiter with exponential gain recovery.
struct SafetyLimiter {
    ceiling: f32,
    release: f32,
    gain: f32,
}

impl SafetyLimiter {
    fn new(sample_rate: f32) -> Self {
        Self {
            ceiling: LIMITER_CEILING,
            release: (-1.0 / (sample_rate.max(1.0) * LIMITER_RELEASE_SECS)).exp(),
            gain: 1.0,
        }
    }

    fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let peak = left.abs().max(right.abs()) * self.gain;
        if peak > self.ceiling {
            self.gain *= self.ceiling / peak;
        } else {
            self.gain = 1.0 - (1.0 - self.gain) * self.release;
        }
        (left * self.gain, right * self.gain)
    }
}

/// The full per-voice color chain for one [`CharacterProfile`].
pub struct CharacterChain {
    crush: Option<Bitcrusher>,
    colors: SmallVec<[StereoBiquad; 2]>,
    clip: Option<SoftClip>,
    limiter: SafetyLimiter,
}

impl CharacterChain {
    pub fn new(profile: CharacterProfile, sample_rate: f32) -> Self {
        let mut colors: SmallVec<[StereoBiquad; 2]> = SmallVec::new();
        let mut color = |coeffs| {
            let mut biquad = StereoBiquad::new();
            biquad.set_coefficients(coeffs);
            colors.push(biquad);
        };

        let (crush, clip) = match profile {
            CharacterProfile::Grit => {
                color(low_shelf_coefficients(150.0, 4.0, sample_rate));
                color(peaking_coefficients(2_500.0, COLOR_PEAK_Q, 3.0, sample_rate));
                (Some(Bitcrusher::new(6, 2)), Some(SoftClip::new(3.0)))
            }
            CharacterProfile::Tape => {
                color(low_shelf_coefficients(120.0, 2.0, sample_rate));
                color(high_shelf_coefficients(8_000.0, -4.0, sample_rate));
                (None, Some(SoftClip::new(1.6)))
            }
            CharacterProfile::Lofi => {
                color(peaking_coefficients(400.0, COLOR_PEAK_Q, 2.0, sample_rate));
                color(high_shelf_coefficients(4_000.0, -8.0, sample_rate));
                (Some(Bitcrusher::new(8, 4)), Some(SoftClip::new(1.2)))
            }
            CharacterProfile::Clean => (None, None),
        };

        Self {
            crush,
            colors,
            clip,
            limiter: SafetyLimiter::new(sample_rate),
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let (mut left, mut right) = match &mut self.crush {
            Some(crush) => crush.process(left, right),
            None => (left, right),
        };
        for filter in &mut self.colors {
            let filtered = filter.process(left, right);
            left = filtered.0;
            right = filtered.1;
        }
        if let Some(clip) = &self.clip {
            let shaped = clip.process(left, right);
            left = shaped.0;
            right = shaped.1;
        }
        self.limiter.process(left, right)
    }
}
