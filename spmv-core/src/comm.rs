//! Reductions across ranks, used for diagnostics only.

use std::fmt::Debug;

/// Collective operations of the distributed layer.
pub trait Collective: Debug + Send + Sync {
    fn n_ranks(&self) -> usize;

    fn all_reduce_max(&self, value: f64) -> f64;

    fn all_reduce_min(&self, value: f64) -> f64;

    fn all_reduce_sum(&self, value: f64) -> f64;

    /// Element-wise sum of `counts` over all ranks, in place.
    fn all_reduce_sum_counts(&self, counts: &mut [u64]);
}

/// Single-process run: reductions are the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleRank;

impl Collective for SingleRank {
    fn n_ranks(&self) -> usize {
        1
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_min(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_sum_counts(&self, _counts: &mut [u64]) {}
}
