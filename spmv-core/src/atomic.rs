//! Atomic `f64` accumulator for the threaded face loops.

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` stored as its bit pattern, updated with a compare-exchange loop.
#[derive(Debug)]
pub(crate) struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    #[inline]
    pub(crate) fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Adds `delta` and returns the previous value.
    ///
    /// Non-finite values are accumulated as they are, so a product keeps
    /// the same IEEE semantics as the sequential kernels.
    #[inline]
    pub(crate) fn fetch_add(&self, delta: f64) -> f64 {
        let mut old_bits = self.bits.load(Ordering::Relaxed);
        loop {
            let new = f64::from_bits(old_bits) + delta;
            match self.bits.compare_exchange_weak(
                old_bits,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return f64::from_bits(old_bits),
                Err(current) => old_bits = current,
            }
        }
    }
}

/// Atomic copy of `values`.
pub(crate) fn to_atomic(values: &[f64]) -> Vec<AtomicF64> {
    values.iter().map(|&v| AtomicF64::new(v)).collect()
}

/// Writes the accumulated values back into `out`.
pub(crate) fn store_into(values: &[AtomicF64], out: &mut [f64]) {
    for (o, v) in out.iter_mut().zip(values) {
        *o = v.load();
    }
}
