// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::model::CostModel;
use cpx_core::CpxError;
use cpx_core::math::{prefix_sum_squares, prefix_sums};

const LOG_2PI: f64 = 1.837_877_066_409_345_5;
const VAR_FLOOR: f64 = f64::EPSILON * 1e-4;

/// Gaussian segment cost with segment-specific mean and variance.
///
/// Returns twice the maximized negative log-likelihood,
/// `m * (ln(2*pi*var) + 1)`, with the MLE variance floored so that
/// degenerate segments stay finite.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CostNormalMeanVar;

impl CostNormalMeanVar {
    pub const fn new() -> Self {
        Self
    }
}

/// Prefix-stat cache for O(1) Gaussian segment-cost queries.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalCache {
    prefix_sum: Vec<f64>,
    prefix_sum_sq: Vec<f64>,
}

impl NormalCache {
    pub fn len(&self) -> usize {
        self.prefix_sum.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize_variance(raw_var: f64) -> f64 {
    if raw_var.is_nan() || raw_var <= VAR_FLOOR {
        VAR_FLOOR
    } else {
        raw_var
    }
}

impl CostModel for CostNormalMeanVar {
    type Cache = NormalCache;

    fn name(&self) -> &'static str {
        "normal_mean_var"
    }

    fn precompute(&self, x: &[f64]) -> Result<Self::Cache, CpxError> {
        self.validate(x)?;
        Ok(NormalCache {
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
        let var = normalize_variance((sum_sq - sum * sum / m) / m);
        m * (LOG_2PI + var.ln() + 1.0)
    }

    fn penalty_params_per_segment(&self) -> usize {
        2
    }

    fn min_segment_len(&self) -> usize {
        2
    }
}
