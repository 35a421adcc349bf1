//! Per-track effect slots.
//!
//! The control side owns a [`SlotBank`] (what the user configured) and
//! builds a [`SlotChain`] of live instances whenever the bank changes.
//! Chains cross to the render thread over a command channel; displaced
//! chains come back through a trash channel so drops never happen in
//! the callback.

mod eq;

pub use eq::{
    high_shelf_coefficients, low_shelf_coefficients, peaking_coefficients, EqParams, StereoBiquad,
    TrackEq, EQ_GAIN_DB_MAX, EQ_GAIN_DB_MIN, EQ_HIGH_HZ, EQ_LOW_HZ, EQ_MID_HZ, EQ_MID_Q,
};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Number of ordered effect slots per track (the audition slot is extra).
pub const SLOT_COUNT: usize = 7;

/// Stereo insert effect.
///
/// Implementations are built on the control thread and then owned by
/// the render thread, so `process` must not allocate, lock, or block.
pub trait Effect: Send {
    fn process(&mut self, left: f32, right: f32) -> (f32, f32);

    fn process_block(&mut self, frames: &mut [(f32, f32)]) {
        for frame in frames.iter_mut() {
            *frame = self.process(frame.0, frame.1);
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32);

    /// Clear internal state without touching parameters.
    fn reset(&mut self);

    /// Parameter names, indexed by position.
    fn params(&self) -> &'static [&'static str] {
        &[]
    }

    fn set_param(&mut self, _index: usize, _value: f32) {}

    fn get_param(&self, _index: usize) -> f32 {
        0.0
    }
}

/// No-op effect, also what unknown registry names render as.
pub struct Passthrough;

impl Effect for Passthrough {
    #[inline]
    fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        (left, right)
    }

    fn set_sample_rate(&mut self, _sample_rate: f32) {}

    fn reset(&mut self) {}
}

/// Stereo gain trim in dB.
pub struct GainFx {
    gain_db: f32,
    gain: f32,
}

impl GainFx {
    pub fn new() -> Self {
        Self {
            gain_db: 0.0,
            gain: 1.0,
        }
    }
}

impl Default for GainFx {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for GainFx {
    #[inline]
    fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        (left * self.gain, right * self.gain)
    }

    fn set_sample_rate(&mut self, _sample_rate: f32) {}

    fn reset(&mut self) {}

    fn params(&self) -> &'static [&'static str] {
        &["gain_db"]
    }

    fn set_param(&mut self, index: usize, value: f32) {
        if index == 0 {
            let db = value.clamp(-24.0, 24.0);
            if db != self.gain_db {
                self.gain_db = db;
                self.gain = 10.0f32.powf(db / 20.0);
            }
        }
    }

    fn get_param(&self, index: usize) -> f32 {
        if index == 0 {
            self.gain_db
        } else {
            0.0
        }
    }
}

/// Mid/side stereo width. 0 collapses to mono, 1 is unchanged, 2 is wide.
pub struct WidthFx {
    width: f32,
}

impl WidthFx {
    pub fn new() -> Self {
        Self { width: 1.0 }
    }
}

impl Default for WidthFx {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for WidthFx {
    #[inline]
    fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mid = (left + right) * 0.5;
        let side = (left - right) * 0.5 * self.width;
        (mid + side, mid - side)
    }

    fn set_sample_rate(&mut self, _sample_rate: f32) {}

    fn reset(&mut self) {}

    fn params(&self) -> &'static [&'static str] {
        &["width"]
    }

    fn set_param(&mut self, index: usize, value: f32) {
        if index == 0 {
            self.width = value.clamp(0.0, 2.0);
        }
    }

    fn get_param(&self, index: usize) -> f32 {
        if index == 0 {
            self.width
        } else {
            0.0
        }
    }
}

/// One configured slot: effect name plus named parameter overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub effect: String,
    #[serde(default)]
    pub params: Vec<(String, f32)>,
}

impl SlotSpec {
    pub fn new(effect: impl Into<String>) -> Self {
        Self {
            effect: effect.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f32) -> Self {
        self.params.push((name.into(), value));
        self
    }
}

/// The user-facing slot layout: seven ordered inserts plus audition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotBank {
    slots: [Option<SlotSpec>; SLOT_COUNT],
    audition: Option<SlotSpec>,
}

impl SlotBank {
    pub fn set_slot(&mut self, index: usize, spec: Option<SlotSpec>) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::SlotOutOfRange(index))?;
        *slot = spec;
        Ok(())
    }

    pub fn swap_slots(&mut self, a: usize, b: usize) -> Result<()> {
        if a >= SLOT_COUNT {
            return Err(Error::SlotOutOfRange(a));
        }
        if b >= SLOT_COUNT {
            return Err(Error::SlotOutOfRange(b));
        }
        self.slots.swap(a, b);
        Ok(())
    }

    pub fn set_audition(&mut self, spec: Option<SlotSpec>) {
        self.audition = spec;
    }

    pub fn slot(&self, index: usize) -> Option<&SlotSpec> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn audition(&self) -> Option<&SlotSpec> {
        self.audition.as_ref()
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
        self.audition = None;
    }

    pub fn is_empty(&self) -> bool {
        self.audition.is_none() && self.slots.iter().all(|s| s.is_none())
    }
}

type EffectFactory = Arc<dyn Fn(f32) -> Box<dyn Effect> + Send + Sync>;

/// Maps effect names to constructors.
pub struct EffectRegistry {
    factories: HashMap<String, EffectFactory>,
}

impl EffectRegistry {
    /// Registry with the built-in effects ("gain", "width").
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("gain", |_sr| Box::new(GainFx::new()));
        registry.register("width", |_sr| Box::new(WidthFx::new()));
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(f32) -> Box<dyn Effect> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build one slot instance. Unknown names render as passthrough.
    pub fn build(&self, spec: &SlotSpec, sample_rate: f32) -> Box<dyn Effect> {
        let mut effect = match self.factories.get(&spec.effect) {
            Some(factory) => factory(sample_rate),
            None => {
                warn!(effect = %spec.effect, "unknown effect name, rendering as passthrough");
                Box::new(Passthrough)
            }
        };
        effect.set_sample_rate(sample_rate);
        for (name, value) in &spec.params {
            match effect.params().iter().position(|p| p == name) {
                Some(index) => effect.set_param(index, *value),
                None => {
                    warn!(effect = %spec.effect, param = %name, "unknown effect parameter, ignoring")
                }
            }
        }
        effect
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// A built slot instance plus the base values bindings restore to.
pub struct ChainSlot {
    /// Slot position, or [`SLOT_COUNT`] for the audition slot.
    slot_index: usize,
    effect: Box<dyn Effect>,
    base: SmallVec<[f32; 4]>,
}

impl ChainSlot {
    fn build(slot_index: usize, spec: &SlotSpec, registry: &EffectRegistry, sample_rate: f32) -> Self {
        let effect = registry.build(spec, sample_rate);
        let base = (0..effect.params().len())
            .map(|i| effect.get_param(i))
            .collect();
        Self {
            slot_index,
            effect,
            base,
        }
    }
}

/// Ordered live instances, processed after the EQ and before gain/pan.
pub struct SlotChain {
    slots: SmallVec<[ChainSlot; 8]>,
}

impl SlotChain {
    pub fn build(bank: &SlotBank, registry: &EffectRegistry, sample_rate: f32) -> Self {
        let mut slots = SmallVec::new();
        for index in 0..SLOT_COUNT {
            if let Some(spec) = bank.slot(index) {
                slots.push(ChainSlot::build(index, spec, registry, sample_rate));
            }
        }
        if let Some(spec) = bank.audition() {
            slots.push(ChainSlot::build(SLOT_COUNT, spec, registry, sample_rate));
        }
        Self { slots }
    }

    pub fn empty() -> Self {
        Self {
            slots: SmallVec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Re-assert every parameter: bound ones from `resolve(slot, param)`,
    /// the rest from their base values. Called once per block.
    pub fn apply_params(&mut self, resolve: impl Fn(usize, usize) -> Option<f32>) {
        for slot in self.slots.iter_mut() {
            for (param, base) in slot.base.iter().copied().enumerate() {
                let value = resolve(slot.slot_index, param).unwrap_or(base);
                slot.effect.set_param(param, value);
            }
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mut frame = (left, right);
        for slot in self.slots.iter_mut() {
            frame = slot.effect.process(frame.0, frame.1);
        }
        frame
    }

    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.effect.reset();
        }
    }
}
