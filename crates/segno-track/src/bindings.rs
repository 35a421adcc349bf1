//! Parameter-to-LFO bindings.
//!
//! The control side mutates a map under a mutex and commits an
//! immutable snapshot through `ArcSwap`; the render thread loads the
//! snapshot once per block and resolves bound values against the live
//! LFO outputs. A disabled LFO resolves to nothing, so the parameter
//! falls back to its base value.

use crate::fx::SLOT_COUNT;
use crate::{Error, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use segno_core::LFO_COUNT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Bindable per-track parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamTarget {
    Volume,
    Pan,
    Rate,
    EqLow,
    EqMid,
    EqHigh,
    SlotParam { slot: usize, index: usize },
}

/// One LFO connection with its output range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LfoBinding {
    pub lfo: usize,
    pub min: f32,
    pub max: f32,
    pub reversed: bool,
}

impl LfoBinding {
    /// Map a bipolar LFO value (-1..1) into the binding's range.
    #[inline]
    pub fn scaled(&self, lfo_value: f32) -> f32 {
        let unipolar = (lfo_value + 1.0) * 0.5;
        let span = self.max - self.min;
        if self.reversed {
            self.max - unipolar * span
        } else {
            self.min + unipolar * span
        }
    }
}

/// Snapshot the render side resolves against each block.
pub type BindingSnapshot = HashMap<ParamTarget, LfoBinding>;

/// Control-side binding state.
///
/// At most one binding exists per target; re-binding a target replaces
/// its previous connection, whichever LFO it pointed at.
pub struct BindingTable {
    control: Mutex<BindingSnapshot>,
    snapshot: Arc<ArcSwap<BindingSnapshot>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self {
            control: Mutex::new(HashMap::new()),
            snapshot: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// Handle for the render side.
    pub fn snapshot_arc(&self) -> Arc<ArcSwap<BindingSnapshot>> {
        self.snapshot.clone()
    }

    pub fn bind(&self, target: ParamTarget, binding: LfoBinding) -> Result<()> {
        if binding.lfo >= LFO_COUNT {
            return Err(Error::NoSuchLfo(binding.lfo));
        }
        if let ParamTarget::SlotParam { slot, .. } = target {
            if slot >= SLOT_COUNT {
                return Err(Error::SlotOutOfRange(slot));
            }
        }
        let mut control = self.control.lock();
        control.insert(target, binding);
        self.snapshot.store(Arc::new(control.clone()));
        Ok(())
    }

    /// Remove a binding. Returns whether one existed.
    pub fn unbind(&self, target: ParamTarget) -> bool {
        let mut control = self.control.lock();
        let removed = control.remove(&target).is_some();
        if removed {
            self.snapshot.store(Arc::new(control.clone()));
        }
        removed
    }

    pub fn clear(&self) {
        let mut control = self.control.lock();
        if !control.is_empty() {
            control.clear();
            self.snapshot.store(Arc::new(HashMap::new()));
        }
    }

    pub fn get(&self, target: ParamTarget) -> Option<LfoBinding> {
        self.control.lock().get(&target).copied()
    }

    /// All active connections, for persistence.
    pub fn connections(&self) -> Vec<(ParamTarget, LfoBinding)> {
        self.control.lock().iter().map(|(t, b)| (*t, *b)).collect()
    }

    pub fn len(&self) -> usize {
        self.control.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.control.lock().is_empty()
    }
}

impl Default for BindingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn binding(lfo: usize, min: f32, max: f32, reversed: bool) -> LfoBinding {
        LfoBinding {
            lfo,
            min,
            max,
            reversed,
        }
    }

    #[test]
    fn scaled_maps_bipolar_range() {
        let b = binding(0, 0.25, 4.0, false);
        assert_relative_eq!(b.scaled(-1.0), 0.25);
        assert_relative_eq!(b.scaled(0.0), (0.25 + 4.0) / 2.0);
        assert_relative_eq!(b.scaled(1.0), 4.0);
    }

    #[test]
    fn reversed_runs_max_to_min() {
        let b = binding(1, -1.0, 1.0, true);
        assert_relative_eq!(b.scaled(-1.0), 1.0);
        assert_relative_eq!(b.scaled(1.0), -1.0);
    }

    #[test]
    fn rebinding_replaces_the_previous_connection() {
        let table = BindingTable::new();
        table
            .bind(ParamTarget::Volume, binding(0, 0.0, 1.0, false))
            .unwrap();
        table
            .bind(ParamTarget::Volume, binding(1, 0.5, 2.0, false))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(ParamTarget::Volume).unwrap().lfo, 1);
        let snap = table.snapshot_arc();
        assert_eq!(snap.load().len(), 1);
    }

    #[test]
    fn bind_rejects_bad_indices() {
        let table = BindingTable::new();
        assert!(matches!(
            table.bind(ParamTarget::Pan, binding(LFO_COUNT, 0.0, 1.0, false)),
            Err(Error::NoSuchLfo(_))
        ));
        assert!(matches!(
            table.bind(
                ParamTarget::SlotParam {
                    slot: SLOT_COUNT,
                    index: 0
                },
                binding(0, 0.0, 1.0, false)
            ),
            Err(Error::SlotOutOfRange(_))
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn unbind_removes_and_reports() {
        let table = BindingTable::new();
        table
            .bind(ParamTarget::Rate, binding(0, 0.25, 4.0, false))
            .unwrap();
        assert!(table.unbind(ParamTarget::Rate));
        assert!(!table.unbind(ParamTarget::Rate));
        assert!(table.snapshot_arc().load().is_empty());
    }

    #[test]
    fn snapshot_tracks_slot_param_targets() {
        let table = BindingTable::new();
        let target = ParamTarget::SlotParam { slot: 3, index: 1 };
        table.bind(target, binding(0, 0.0, 2.0, false)).unwrap();
        let snap = table.snapshot_arc();
        assert!(snap.load().contains_key(&target));
    }
}
