//! Lock-free cells shared between the control and render domains.
//!
//! Every cell is cache-line aligned so two hot cells never share a line.
//! Writers use `Release`, readers `Acquire`; the render callback only ever
//! calls the `#[inline]` accessors and never blocks.

use atomic_float::{AtomicF32, AtomicF64};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// Cache-line aligned atomic `f32` for levels, gains and meter values.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicLevel {
    value: AtomicF32,
}

impl AtomicLevel {
    pub fn new(value: f32) -> Self {
        Self {
            value: AtomicF32::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn swap(&self, value: f32) -> f32 {
        self.value.swap(value, Ordering::AcqRel)
    }

    /// Raise the stored value to `value` if it is higher. Used by peak
    /// meters; the control side resets with [`AtomicLevel::swap`].
    #[inline]
    pub fn raise(&self, value: f32) {
        self.value.fetch_max(value, Ordering::AcqRel);
    }
}

impl Clone for AtomicLevel {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicLevel {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Cache-line aligned atomic `f64` for clock and latency values in seconds.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicSeconds {
    value: AtomicF64,
}

impl AtomicSeconds {
    pub fn new(value: f64) -> Self {
        Self {
            value: AtomicF64::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.value.store(value, Ordering::Release);
    }
}

impl Clone for AtomicSeconds {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicSeconds {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Cache-line aligned atomic bool.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set. One side requests,
    /// the other side takes; the swap makes the hand-off race-free.
    #[inline]
    pub fn take(&self) -> bool {
        self.value.swap(false, Ordering::AcqRel)
    }
}

impl Clone for AtomicFlag {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Cache-line aligned atomic `u64` counter for frame positions, sequence
/// numbers and drop counts.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    pub fn new(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn add(&self, n: u64) -> u64 {
        self.value.fetch_add(n, Ordering::AcqRel)
    }

    #[inline]
    pub fn bump(&self) -> u64 {
        self.add(1)
    }
}

impl Clone for AtomicCounter {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A small state enum stored in an atomic byte.
///
/// `S` converts to and from `u8`; transitions are compare-and-swap so two
/// control threads cannot both win the same edge.
#[derive(Debug)]
#[repr(align(64))]
pub struct StateCell<S> {
    value: AtomicU8,
    _marker: PhantomData<S>,
}

impl<S> StateCell<S>
where
    S: Copy + Into<u8> + From<u8>,
{
    pub fn new(state: S) -> Self {
        Self {
            value: AtomicU8::new(state.into()),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn get(&self) -> S {
        S::from(self.value.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, state: S) {
        self.value.store(state.into(), Ordering::Release);
    }

    /// Move from `from` to `to`; returns false if another thread got
    /// there first.
    #[inline]
    pub fn transition(&self, from: S, to: S) -> bool {
        self.value
            .compare_exchange(from.into(), to.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
