// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::common::{
    RuntimeStats, build_result_breakpoints, check_runtime_controls, checked_counter_increment,
    constant_signal_result, insert_sorted_unique, noise_scale, soft_budget_warning,
    validate_signal,
};
use cpx_core::math::prefix_sums;
use cpx_core::{
    CpxError, Diagnostics, ExecutionContext, OfflineChangePointResult, OfflineDetector,
    ValidatedConstraints, elapsed_ms, validate_constraints,
};
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_CANCEL_CHECK_EVERY: usize = 1000;
/// 95% critical value of the supremum of a standard Brownian bridge.
pub const DEFAULT_CUSUM_THRESHOLD: f64 = 1.358;

/// Configuration for [`Cusum`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct CusumConfig {
    /// Minimum normalized cumulative deviation for a split to be accepted.
    pub threshold: f64,
    pub cancel_check_every: usize,
}

impl Default for CusumConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CUSUM_THRESHOLD,
            cancel_check_every: DEFAULT_CANCEL_CHECK_EVERY,
        }
    }
}

impl CusumConfig {
    fn validate(&self) -> Result<(), CpxError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(CpxError::invalid_input(format!(
                "CusumConfig.threshold must be finite and > 0.0; got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    fn normalized_cancel_check_every(&self) -> usize {
        self.cancel_check_every.max(1)
    }
}

/// Cumulative-deviation detector with binary recursion.
///
/// Inside a segment `[s, e)` the statistic at split `k` is
/// `|sum_{s<=i<k} (x_i - mean)| / (sigma * sqrt(e - s))`, where `sigma` is the
/// robust noise scale of the whole signal. The strongest split across all
/// segments is accepted while it exceeds the threshold.
#[derive(Clone, Debug)]
pub struct Cusum {
    config: CusumConfig,
}

impl Cusum {
    pub fn new(config: CusumConfig) -> Result<Self, CpxError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CusumConfig {
        &self.config
    }
}

#[derive(Clone, Copy, Debug)]
struct SegmentPeak {
    start: usize,
    end: usize,
    split: usize,
    statistic: f64,
}

fn segment_peak(
    prefix: &[f64],
    validated: &ValidatedConstraints,
    start: usize,
    end: usize,
    sigma: f64,
    runtime: &mut RuntimeStats,
) -> Result<Option<SegmentPeak>, CpxError> {
    let min_segment_len = validated.min_segment_len;
    if end - start < 2 * min_segment_len {
        return Ok(None);
    }
    let lo = validated
        .effective_candidates
        .partition_point(|&c| c < start + min_segment_len);
    let hi = validated
        .effective_candidates
        .partition_point(|&c| c <= end - min_segment_len);

    let len = (end - start) as f64;
    let segment_mean = (prefix[end] - prefix[start]) / len;
    let scale = sigma * len.sqrt();

    let mut best: Option<SegmentPeak> = None;
    for &split in &validated.effective_candidates[lo..hi] {
        checked_counter_increment(&mut runtime.candidates_considered, "candidates_considered")?;
        let deviation = prefix[split] - prefix[start] - (split - start) as f64 * segment_mean;
        let statistic = deviation.abs() / scale;
        if best.is_none_or(|current| statistic > current.statistic) {
            best = Some(SegmentPeak {
                start,
                end,
                split,
                statistic,
            });
        }
    }
    Ok(best)
}

impl OfflineDetector for Cusum {
    fn detect(
        &self,
        x: &[f64],
        ctx: &ExecutionContext<'_>,
    ) -> Result<OfflineChangePointResult, CpxError> {
        self.config.validate()?;
        validate_signal(x, "cusum")?;
        let n = x.len();
        let validated = validate_constraints(ctx.constraints, n)?;

        let started_at = Instant::now();
        if let Some(result) = constant_signal_result(x, "cusum", "cumulative_mean", started_at)? {
            return Ok(result);
        }

        let sigma = noise_scale(x);
        let prefix = prefix_sums(x);
        let cancel_check_every = self.config.normalized_cancel_check_every();
        let mut runtime = RuntimeStats::default();
        let mut warnings = vec![];

        debug!(
            n,
            threshold = self.config.threshold,
            sigma,
            min_segment_len = validated.min_segment_len,
            "starting cusum"
        );

        let mut peaks: Vec<SegmentPeak> =
            segment_peak(&prefix, &validated, 0, n, sigma, &mut runtime)?
                .into_iter()
                .collect();
        let mut change_points = vec![];
        let mut strongest = 0.0f64;
        let mut iteration = 0usize;

        loop {
            check_runtime_controls(iteration, cancel_check_every, ctx, started_at, &mut runtime)?;
            checked_counter_increment(&mut iteration, "cusum_iterations")?;

            if validated
                .max_change_points
                .is_some_and(|limit| change_points.len() >= limit)
            {
                break;
            }

            // Strongest peak, earliest split on ties.
            let Some(best_idx) = (0..peaks.len()).reduce(|best, idx| {
                let (a, b) = (&peaks[best], &peaks[idx]);
                if b.statistic > a.statistic || (b.statistic == a.statistic && b.split < a.split) {
                    idx
                } else {
                    best
                }
            }) else {
                break;
            };

            let chosen = peaks.swap_remove(best_idx);
            if chosen.statistic <= self.config.threshold {
                break;
            }
            strongest = strongest.max(chosen.statistic);
            insert_sorted_unique(&mut change_points, chosen.split)?;

            for (start, end) in [(chosen.start, chosen.split), (chosen.split, chosen.end)] {
                if let Some(peak) =
                    segment_peak(&prefix, &validated, start, end, sigma, &mut runtime)?
                {
                    peaks.push(peak);
                }
            }
        }

        soft_budget_warning(&runtime, &mut warnings);
        let runtime_ms = elapsed_ms(started_at);
        ctx.report_progress(1.0);

        info!(
            change_count = change_points.len(),
            strongest_statistic = strongest,
            runtime_ms,
            "cusum finished"
        );

        let diagnostics = Diagnostics {
            runtime_ms: Some(runtime_ms),
            notes: vec![
                format!("threshold={}, sigma={sigma}", self.config.threshold),
                format!(
                    "change_count={}, strongest_statistic={strongest}",
                    change_points.len()
                ),
            ],
            warnings,
            ..Diagnostics::for_algorithm("cusum", "cumulative_mean", n)
        };

        OfflineChangePointResult::new(n, build_result_breakpoints(n, change_points), diagnostics)
    }
}
