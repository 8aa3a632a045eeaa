// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::model::CostModel;
use cpx_core::CpxError;
use cpx_core::math::{prefix_sum_squares, prefix_sums};

/// Squared-error segment cost for piecewise-constant mean changes.
///
/// `cost([s, e)) = sum(x^2) - sum(x)^2 / (e - s)`, clamped at zero to absorb
/// cancellation in the prefix-sum difference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CostL2Mean;

impl CostL2Mean {
    pub const fn new() -> Self {
        Self
    }
}

/// Prefix-stat cache for O(1) L2 segment-cost queries.
#[derive(Clone, Debug, PartialEq)]
pub struct L2Cache {
    prefix_sum: Vec<f64>,
    prefix_sum_sq: Vec<f64>,
}

impl L2Cache {
    pub fn len(&self) -> usize {
        self.prefix_sum.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean of `[start, end)`.
    pub fn segment_mean(&self, start: usize, end: usize) -> f64 {
        (self.prefix_sum[end] - self.prefix_sum[start]) / (end - start) as f64
    }
}

impl CostModel for CostL2Mean {
    type Cache = L2Cache;

    fn name(&self) -> &'static str {
        "l2_mean"
    }

    fn precompute(&self, x: &[f64]) -> Result<Self::Cache, CpxError> {
        self.validate(x)?;
        Ok(L2Cache {
            prefix_sum: prefix_sums(x),
            prefix_sum_sq: prefix_sum_squares(x),
        })
    }

    fn segment_cost(&self, cache: &Self::Cache, start: usize, end: usize) -> f64 {
        assert!(
            start < end,
            "segment_cost requires start < end; got start={start}, end={end}"
        );
        assert!(
            end <= cache.len(),
            "segment_cost end out of bounds: end={end}, n={}",
            cache.len()
        );

        let m = (end - start) as f64;
        let sum = cache.prefix_sum[end] - cache.prefix_sum[start];
        let sum_sq = cache.prefix_sum_sq[end] - cache.prefix_sum_sq[start];
        (sum_sq - sum * sum / m).max(0.0)
    }

    fn penalty_params_per_segment(&self) -> usize {
        1
    }

    fn penalty_scales_with_noise(&self) -> bool {
        true
    }
}
