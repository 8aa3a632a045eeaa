// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::common::{
    RuntimeStats, build_result_breakpoints, can_insert_split, check_runtime_controls,
    checked_counter_increment, constant_signal_result, insert_sorted_unique, noise_scale,
    soft_budget_warning, validate_signal,
};
use cpx_core::math::prefix_sums;
use cpx_core::{
    CpxError, Diagnostics, ExecutionContext, OfflineChangePointResult, OfflineDetector,
    ValidatedConstraints, elapsed_ms, validate_constraints,
};
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_CANCEL_CHECK_EVERY: usize = 1000;
const DEFAULT_WINDOW_WIDTH: usize = 30;
const DEFAULT_THRESHOLD: f64 = 3.0;

/// Configuration for [`SlidingWindow`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct SlidingWindowConfig {
    /// Width `W` of each of the two compared windows.
    pub window_width: usize,
    /// Minimum standardized mean difference for a peak to count.
    pub threshold: f64,
    pub cancel_check_every: usize,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_width: DEFAULT_WINDOW_WIDTH,
            threshold: DEFAULT_THRESHOLD,
            cancel_check_every: DEFAULT_CANCEL_CHECK_EVERY,
        }
    }
}

impl SlidingWindowConfig {
    fn validate(&self) -> Result<(), CpxError> {
        if self.window_width == 0 {
            return Err(CpxError::invalid_window(
                "SlidingWindowConfig.window_width must be >= 1; got 0",
            ));
        }
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(CpxError::invalid_input(format!(
                "SlidingWindowConfig.threshold must be finite and > 0.0; got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    fn normalized_cancel_check_every(&self) -> usize {
        self.cancel_check_every.max(1)
    }
}

/// Two adjacent windows slide over the signal; local maxima of their
/// standardized mean difference become change points.
///
/// The first and last `W` positions are never eligible, and accepted splits
/// are at least `W` apart.
#[derive(Clone, Debug)]
pub struct SlidingWindow {
    config: SlidingWindowConfig,
}

impl SlidingWindow {
    pub fn new(config: SlidingWindowConfig) -> Result<Self, CpxError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct CandidateScore {
    split: usize,
    score: f64,
}

#[allow(clippy::too_many_arguments)]
fn compute_candidate_scores(
    prefix: &[f64],
    validated: &ValidatedConstraints,
    width: usize,
    sigma: f64,
    cancel_check_every: usize,
    ctx: &ExecutionContext<'_>,
    started_at: Instant,
    runtime: &mut RuntimeStats,
) -> Result<Vec<CandidateScore>, CpxError> {
    let n = validated.n;
    let w = width as f64;
    let scale = sigma * (2.0 / w).sqrt();

    let eligible: Vec<usize> = validated
        .effective_candidates
        .iter()
        .copied()
        .filter(|&t| t >= width && t < n - width)
        .collect();
    let total = eligible.len().max(1);

    let mut scores = Vec::with_capacity(eligible.len());
    for (iteration, &t) in eligible.iter().enumerate() {
        check_runtime_controls(iteration, cancel_check_every, ctx, started_at, runtime)?;
        checked_counter_increment(&mut runtime.candidates_considered, "candidates_considered")?;

        let left = (prefix[t] - prefix[t - width]) / w;
        let right = (prefix[t + width] - prefix[t]) / w;
        let score = (right - left).abs() / scale;
        if !score.is_finite() {
            return Err(CpxError::numerical_issue(format!(
                "non-finite window score at t={t}: {score}"
            )));
        }
        scores.push(CandidateScore { split: t, score });

        if iteration % 64 == 0 {
            ctx.report_progress(iteration as f32 / total as f32);
        }
    }
    Ok(scores)
}

/// Local maxima: strictly above the left neighbour, at least the right one.
fn extract_peaks(scores: &[CandidateScore]) -> Vec<CandidateScore> {
    let mut peaks = Vec::with_capacity(scores.len());
    for idx in 0..scores.len() {
        let current = scores[idx];
        let left_ok = idx == 0 || current.score > scores[idx - 1].score;
        let right_ok = idx + 1 == scores.len() || current.score >= scores[idx + 1].score;
        if left_ok && right_ok {
            peaks.push(current);
        }
    }
    peaks
}

fn rank_candidates(scores: &mut [CandidateScore]) {
    scores.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.split.cmp(&right.split))
    });
}

fn select_peaks(
    ranked: &[CandidateScore],
    validated: &ValidatedConstraints,
    separation: usize,
    threshold: f64,
) -> Result<Vec<usize>, CpxError> {
    let mut selected = vec![];
    for candidate in ranked {
        if candidate.score < threshold {
            break;
        }
        if let Some(max_change_points) = validated.max_change_points
            && selected.len() >= max_change_points
        {
            break;
        }
        if can_insert_split(&selected, candidate.split, separation, validated.n) {
            insert_sorted_unique(&mut selected, candidate.split)?;
        }
    }
    Ok(selected)
}

impl OfflineDetector for SlidingWindow {
    fn detect(
        &self,
        x: &[f64],
        ctx: &ExecutionContext<'_>,
    ) -> Result<OfflineChangePointResult, CpxError> {
        self.config.validate()?;
        validate_signal(x, "window")?;
        let n = x.len();
        let width = self.config.window_width;
        if width.saturating_mul(2) >= n {
            return Err(CpxError::invalid_window(format!(
                "window_width={width} needs 2 * window_width < n; got n={n}"
            )));
        }
        let validated = validate_constraints(ctx.constraints, n)?;

        let started_at = Instant::now();
        if let Some(result) = constant_signal_result(x, "window", "window_mean", started_at)? {
            return Ok(result);
        }

        let sigma = noise_scale(x);
        let prefix = prefix_sums(x);
        let cancel_check_every = self.config.normalized_cancel_check_every();
        let mut runtime = RuntimeStats::default();
        let mut warnings = vec![];

        debug!(
            n,
            window_width = width,
            threshold = self.config.threshold,
            sigma,
            "starting sliding window"
        );

        let scores = compute_candidate_scores(
            &prefix,
            &validated,
            width,
            sigma,
            cancel_check_every,
            ctx,
            started_at,
            &mut runtime,
        )?;
        let mut peaks = extract_peaks(&scores);
        let peak_count = peaks.len();
        rank_candidates(&mut peaks);

        let separation = width.max(validated.min_segment_len);
        let change_points = select_peaks(&peaks, &validated, separation, self.config.threshold)?;

        soft_budget_warning(&runtime, &mut warnings);
        let runtime_ms = elapsed_ms(started_at);
        ctx.report_progress(1.0);

        info!(
            change_count = change_points.len(),
            peaks = peak_count,
            runtime_ms,
            "sliding window finished"
        );

        let diagnostics = Diagnostics {
            runtime_ms: Some(runtime_ms),
            notes: vec![
                format!(
                    "window_width={width}, threshold={}, sigma={sigma}",
                    self.config.threshold
                ),
                format!(
                    "scored={}, peaks={peak_count}, change_count={}",
                    scores.len(),
                    change_points.len()
                ),
            ],
            warnings,
            ..Diagnostics::for_algorithm("window", "window_mean", n)
        };

        OfflineChangePointResult::new(n, build_result_breakpoints(n, change_points), diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::{CandidateScore, SlidingWindow, SlidingWindowConfig, extract_peaks, rank_candidates};
    use crate::common::test_support::step_signal;
    use cpx_core::{Constraints, CpxError, ExecutionContext, OfflineDetector};

    fn detector(window_width: usize) -> SlidingWindow {
        SlidingWindow::new(SlidingWindowConfig {
            window_width,
            ..SlidingWindowConfig::default()
        })
        .expect("config should be valid")
    }

    #[test]
    fn config_defaults_and_validation() {
        let cfg = SlidingWindowConfig::default();
        assert_eq!(cfg.window_width, 30);
        assert_eq!(cfg.threshold, 3.0);

        let err = SlidingWindow::new(SlidingWindowConfig {
            window_width: 0,
            ..cfg.clone()
        })
        .expect_err("zero width must fail");
        assert!(matches!(err, CpxError::InvalidWindow(_)));

        let err = SlidingWindow::new(SlidingWindowConfig {
            threshold: -1.0,
            ..cfg
        })
        .expect_err("negative threshold must fail");
        assert!(matches!(err, CpxError::InvalidInput(_)));
    }

    #[test]
    fn window_wider_than_half_series_is_invalid() {
        let err = detector(10)
            .detect_indices(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0], None)
            .expect_err("2W >= n must fail");
        assert!(matches!(err, CpxError::InvalidWindow(_)));

        let values: Vec<f64> = (0..20).map(f64::from).collect();
        let err = detector(10)
            .detect_indices(&values, None)
            .expect_err("2W == n must fail");
        assert!(matches!(err, CpxError::InvalidWindow(_)));
    }

    #[test]
    fn peaks_use_strict_left_and_weak_right() {
        let scores: Vec<CandidateScore> = [1.0, 3.0, 3.0, 2.0, 5.0]
            .iter()
            .enumerate()
            .map(|(split, &score)| CandidateScore { split, score })
            .collect();
        let peaks = extract_peaks(&scores);
        let splits: Vec<usize> = peaks.iter().map(|p| p.split).collect();
        assert_eq!(splits, vec![1, 4]);
    }

    #[test]
    fn ranking_prefers_score_then_earlier_split() {
        let mut scores = vec![
            CandidateScore { split: 9, score: 2.0 },
            CandidateScore { split: 4, score: 2.0 },
            CandidateScore { split: 6, score: 7.0 },
        ];
        rank_candidates(&mut scores);
        let splits: Vec<usize> = scores.iter().map(|p| p.split).collect();
        assert_eq!(splits, vec![6, 4, 9]);
    }

    #[test]
    fn detects_two_separated_shifts() {
        let values = step_signal(&[(80, 0.0), (80, 1.0), (80, 0.0)], 0.2, 13);
        let indices = detector(30)
            .detect_indices(&values, None)
            .expect("detect should succeed");
        assert_eq!(indices, vec![80, 160]);
    }

    #[test]
    fn edges_are_never_eligible() {
        let values = step_signal(&[(10, 5.0), (90, 0.0)], 0.1, 17);
        let result = detector(20)
            .detect_indices(&values, None)
            .expect("detect should succeed");
        for cp in result {
            assert!((20..80).contains(&cp), "split {cp} inside the edge band");
        }
    }

    #[test]
    fn max_change_points_keeps_strongest_peak() {
        let values = step_signal(&[(80, 0.0), (80, 1.0), (80, 3.0)], 0.2, 13);
        let constraints = Constraints {
            max_change_points: Some(1),
            ..Constraints::default()
        };
        let ctx = ExecutionContext::new(&constraints);
        let result = detector(30).detect(&values, &ctx).expect("detect should succeed");
        assert_eq!(result.change_points, vec![160]);
    }

    #[test]
    fn flat_signal_has_no_change_points() {
        let indices = detector(5)
            .detect_indices(&[2.5; 40], None)
            .expect("detect should succeed");
        assert!(indices.is_empty());
    }

    #[test]
    fn repeated_runs_are_identical() {
        let values = step_signal(&[(70, 0.0), (70, 0.8)], 0.3, 29);
        let first = detector(20)
            .detect_indices(&values, None)
            .expect("detect should succeed");
        let second = detector(20)
            .detect_indices(&values, None)
            .expect("detect should succeed");
        assert_eq!(first, second);
    }
}
