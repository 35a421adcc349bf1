//! Fixed 3-band track EQ.
//!
//! Low shelf at 200 Hz, peaking mid at 1 kHz, high shelf at 4 kHz.
//! Coefficients come from the RBJ Audio EQ Cookbook; the biquads run
//! Direct Form I with independent state per channel, so the bands stay
//! true dual-mono.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

pub const EQ_LOW_HZ: f32 = 200.0;
pub const EQ_MID_HZ: f32 = 1_000.0;
pub const EQ_MID_Q: f32 = 0.9;
pub const EQ_HIGH_HZ: f32 = 4_000.0;
pub const EQ_GAIN_DB_MIN: f32 = -24.0;
pub const EQ_GAIN_DB_MAX: f32 = 24.0;

/// RBJ low shelf (shelf slope 1).
pub fn low_shelf_coefficients(
    frequency: f32,
    gain_db: f32,
    sample_rate: f32,
) -> (f32, f32, f32, f32, f32, f32) {
    let a = 10.0f32.powf(gain_db / 40.0);
    let omega = 2.0 * PI * frequency / sample_rate;
    let cos_omega = omega.cos();
    // alpha for shelf slope S = 1.
    let alpha = omega.sin() / 2.0 * std::f32::consts::SQRT_2;
    let beta = 2.0 * a.sqrt() * alpha;

    let b0 = a * ((a + 1.0) - (a - 1.0) * cos_omega + beta);
    let b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega);
    let b2 = a * ((a + 1.0) - (a - 1.0) * cos_omega - beta);
    let a0 = (a + 1.0) + (a - 1.0) * cos_omega + beta;
    let a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega);
    let a2 = (a + 1.0) + (a - 1.0) * cos_omega - beta;

    (b0, b1, b2, a0, a1, a2)
}

/// RBJ high shelf (shelf slope 1).
pub fn high_shelf_coefficients(
    frequency: f32,
    gain_db: f32,
    sample_rate: f32,
) -> (f32, f32, f32, f32, f32, f32) {
    let a = 10.0f32.powf(gain_db / 40.0);
    let omega = 2.0 * PI * frequency / sample_rate;
    let cos_omega = omega.cos();
    let alpha = omega.sin() / 2.0 * std::f32::consts::SQRT_2;
    let beta = 2.0 * a.sqrt() * alpha;

    let b0 = a * ((a + 1.0) + (a - 1.0) * cos_omega + beta);
    let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega);
    let b2 = a * ((a + 1.0) + (a - 1.0) * cos_omega - beta);
    let a0 = (a + 1.0) - (a - 1.0) * cos_omega + beta;
    let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_omega);
    let a2 = (a + 1.0) - (a - 1.0) * cos_omega - beta;

    (b0, b1, b2, a0, a1, a2)
}

/// RBJ peaking EQ.
pub fn peaking_coefficients(
    frequency: f32,
    q: f32,
    gain_db: f32,
    sample_rate: f32,
) -> (f32, f32, f32, f32, f32, f32) {
    let a = 10.0f32.powf(gain_db / 40.0);
    let omega = 2.0 * PI * frequency / sample_rate;
    let cos_omega = omega.cos();
    let alpha = omega.sin() / (2.0 * q);

    let b0 = 1.0 + alpha * a;
    let b1 = -2.0 * cos_omega;
    let b2 = 1.0 - alpha * a;
    let a0 = 1.0 + alpha / a;
    let a1 = -2.0 * cos_omega;
    let a2 = 1.0 - alpha / a;

    (b0, b1, b2, a0, a1, a2)
}

/// Direct Form I biquad with separate state per channel.
#[derive(Debug, Clone)]
pub struct StereoBiquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: (f32, f32),
    x2: (f32, f32),
    y1: (f32, f32),
    y2: (f32, f32),
}

impl StereoBiquad {
    pub fn new() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: (0.0, 0.0),
            x2: (0.0, 0.0),
            y1: (0.0, 0.0),
            y2: (0.0, 0.0),
        }
    }

    /// Install coefficients, normalizing by `a0`.
    pub fn set_coefficients(&mut self, coeffs: (f32, f32, f32, f32, f32, f32)) {
        let (b0, b1, b2, a0, a1, a2) = coeffs;
        let a0_inv = 1.0 / a0;
        self.b0 = b0 * a0_inv;
        self.b1 = b1 * a0_inv;
        self.b2 = b2 * a0_inv;
        self.a1 = a1 * a0_inv;
        self.a2 = a2 * a0_inv;
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let out_l = self.b0 * left + self.b1 * self.x1.0 + self.b2 * self.x2.0
            - self.a1 * self.y1.0
            - self.a2 * self.y2.0;
        let out_r = self.b0 * right + self.b1 * self.x1.1 + self.b2 * self.x2.1
            - self.a1 * self.y1.1
            - self.a2 * self.y2.1;

        self.x2 = self.x1;
        self.x1 = (left, right);
        self.y2 = self.y1;
        self.y1 = (out_l, out_r);

        (out_l, out_r)
    }

    pub fn clear(&mut self) {
        self.x1 = (0.0, 0.0);
        self.x2 = (0.0, 0.0);
        self.y1 = (0.0, 0.0);
        self.y2 = (0.0, 0.0);
    }
}

impl Default for StereoBiquad {
    fn default() -> Self {
        Self::new()
    }
}

/// User-facing EQ gains in dB, one value per band.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EqParams {
    pub low_db: f32,
    pub mid_db: f32,
    pub high_db: f32,
}

impl EqParams {
    /// Every band clamped to the legal gain range.
    pub fn clamped(self) -> Self {
        Self {
            low_db: self.low_db.clamp(EQ_GAIN_DB_MIN, EQ_GAIN_DB_MAX),
            mid_db: self.mid_db.clamp(EQ_GAIN_DB_MIN, EQ_GAIN_DB_MAX),
            high_db: self.high_db.clamp(EQ_GAIN_DB_MIN, EQ_GAIN_DB_MAX),
        }
    }
}

/// The per-track 3-band EQ.
///
/// Gains clamp to [-24, +24] dB and coefficients recompute only when a
/// band's gain actually changes, so per-block re-assertion from the
/// binding layer stays cheap.
#[derive(Debug, Clone)]
pub struct TrackEq {
    low: StereoBiquad,
    mid: StereoBiquad,
    high: StereoBiquad,
    low_db: f32,
    mid_db: f32,
    high_db: f32,
    sample_rate: f32,
}

impl TrackEq {
    pub fn new(sample_rate: f32) -> Self {
        let mut eq = Self {
            low: StereoBiquad::new(),
            mid: StereoBiquad::new(),
            high: StereoBiquad::new(),
            low_db: 0.0,
            mid_db: 0.0,
            high_db: 0.0,
            sample_rate,
        };
        eq.update_all();
        eq
    }

    pub fn set_gains(&mut self, low_db: f32, mid_db: f32, high_db: f32) {
        let low_db = low_db.clamp(EQ_GAIN_DB_MIN, EQ_GAIN_DB_MAX);
        let mid_db = mid_db.clamp(EQ_GAIN_DB_MIN, EQ_GAIN_DB_MAX);
        let high_db = high_db.clamp(EQ_GAIN_DB_MIN, EQ_GAIN_DB_MAX);
        if low_db != self.low_db {
            self.low_db = low_db;
            self.low
                .set_coefficients(low_shelf_coefficients(EQ_LOW_HZ, low_db, self.sample_rate));
        }
        if mid_db != self.mid_db {
            self.mid_db = mid_db;
            self.mid.set_coefficients(peaking_coefficients(
                EQ_MID_HZ,
                EQ_MID_Q,
                mid_db,
                self.sample_rate,
            ));
        }
        if high_db != self.high_db {
            self.high_db = high_db;
            self.high.set_coefficients(high_shelf_coefficients(
                EQ_HIGH_HZ,
                high_db,
                self.sample_rate,
            ));
        }
    }

    pub fn gains(&self) -> (f32, f32, f32) {
        (self.low_db, self.mid_db, self.high_db)
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.update_all();
    }

    fn update_all(&mut self) {
        self.low
            .set_coefficients(low_shelf_coefficients(EQ_LOW_HZ, self.low_db, self.sample_rate));
        self.mid.set_coefficients(peaking_coefficients(
            EQ_MID_HZ,
            EQ_MID_Q,
            self.mid_db,
            self.sample_rate,
        ));
        self.high.set_coefficients(high_shelf_coefficients(
            EQ_HIGH_HZ,
            self.high_db,
            self.sample_rate,
        ));
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let (l, r) = self.low.process(left, right);
        let (l, r) = self.mid.process(l, r);
        self.high.process(l, r)
    }

    pub fn reset(&mut self) {
        self.low.clear();
        self.mid.clear();
        self.high.clear();
    }
}
