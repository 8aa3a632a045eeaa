// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use cpx_core::CpxError;

/// Segment cost contract used by the offline search strategies.
///
/// Segments are half-open intervals `[start, end)` over a univariate signal.
/// Implementations precompute prefix statistics once so that every
/// `segment_cost` query is O(1).
pub trait CostModel {
    type Cache;

    fn name(&self) -> &'static str;

    /// Rejects signals the model cannot score.
    fn validate(&self, x: &[f64]) -> Result<(), CpxError> {
        if x.is_empty() {
            return Err(CpxError::insufficient_data(format!(
                "{} requires n >= 1; got n=0",
                self.name()
            )));
        }
        if let Some((idx, value)) = x.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(CpxError::invalid_input(format!(
                "{} requires finite values; got {value} at t={idx}",
                self.name()
            )));
        }
        Ok(())
    }

    fn precompute(&self, x: &[f64]) -> Result<Self::Cache, CpxError>;

    fn segment_cost(&self, cache: &Self::Cache, start: usize, end: usize) -> f64;

    /// Free parameters per segment, used by BIC/AIC penalties.
    fn penalty_params_per_segment(&self) -> usize;

    /// Whether segment costs are in squared signal units, so that a
    /// dimensionless penalty must be multiplied by the noise variance.
    fn penalty_scales_with_noise(&self) -> bool {
        false
    }

    /// Smallest segment the model can score meaningfully.
    fn min_segment_len(&self) -> usize {
        1
    }
}
