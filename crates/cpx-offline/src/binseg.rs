// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::common::{
    RuntimeStats, build_result_breakpoints, check_runtime_controls, checked_counter_increment,
    constant_signal_result, evaluate_segment_cost, insert_sorted_unique, resolve_constraints,
    soft_budget_warning, validate_signal,
};
use crate::pelt::resolve_penalty_beta;
use cpx_core::{
    CpxError, Diagnostics, ExecutionContext, OfflineChangePointResult, OfflineDetector, Penalty,
    PruningStats, Stopping, ValidatedConstraints, elapsed_ms, validate_stopping,
};
use cpx_costs::CostModel;
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_CANCEL_CHECK_EVERY: usize = 1000;
const DEFAULT_PARAMS_PER_SEGMENT: usize = 2;

/// Configuration for [`BinSeg`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct BinSegConfig {
    pub stopping: Stopping,
    pub params_per_segment: usize,
    pub scale_penalty_by_noise: bool,
    pub cancel_check_every: usize,
}

impl Default for BinSegConfig {
    fn default() -> Self {
        Self {
            stopping: Stopping::Penalized(Penalty::BIC),
            params_per_segment: DEFAULT_PARAMS_PER_SEGMENT,
            scale_penalty_by_noise: true,
            cancel_check_every: DEFAULT_CANCEL_CHECK_EVERY,
        }
    }
}

impl BinSegConfig {
    fn validate(&self) -> Result<(), CpxError> {
        validate_stopping(&self.stopping)?;
        if self.params_per_segment == 0 {
            return Err(CpxError::invalid_input(
                "BinSegConfig.params_per_segment must be >= 1; got 0",
            ));
        }
        Ok(())
    }

    fn normalized_cancel_check_every(&self) -> usize {
        self.cancel_check_every.max(1)
    }
}

/// Greedy binary segmentation: repeatedly applies the single split with the
/// largest cost reduction across all current segments.
#[derive(Debug)]
pub struct BinSeg<C: CostModel> {
    cost_model: C,
    config: BinSegConfig,
}

impl<C: CostModel> BinSeg<C> {
    pub fn new(cost_model: C, config: BinSegConfig) -> Result<Self, CpxError> {
        config.validate()?;
        Ok(Self { cost_model, config })
    }

    pub fn cost_model(&self) -> &C {
        &self.cost_model
    }

    pub fn config(&self) -> &BinSegConfig {
        &self.config
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct SplitProposal {
    start: usize,
    end: usize,
    split: usize,
    gain: f64,
}

impl SplitProposal {
    /// Larger gain wins; equal gains go to the leftmost split.
    fn beats(&self, other: &SplitProposal) -> bool {
        self.gain > other.gain || (self.gain == other.gain && self.split < other.split)
    }
}

#[allow(clippy::too_many_arguments)]
fn best_split_in_segment<C: CostModel>(
    model: &C,
    cache: &C::Cache,
    validated: &ValidatedConstraints,
    start: usize,
    end: usize,
    ctx: &ExecutionContext<'_>,
    runtime: &mut RuntimeStats,
) -> Result<Option<SplitProposal>, CpxError> {
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
    if lo >= hi {
        return Ok(None);
    }

    let whole = evaluate_segment_cost(model, cache, start, end, ctx, runtime)?;
    let mut best: Option<SplitProposal> = None;
    for &split in &validated.effective_candidates[lo..hi] {
        checked_counter_increment(&mut runtime.candidates_considered, "candidates_considered")?;
        let left = evaluate_segment_cost(model, cache, start, split, ctx, runtime)?;
        let right = evaluate_segment_cost(model, cache, split, end, ctx, runtime)?;
        let proposal = SplitProposal {
            start,
            end,
            split,
            gain: whole - left - right,
        };
        if best.as_ref().is_none_or(|current| proposal.beats(current)) {
            best = Some(proposal);
        }
    }
    Ok(best)
}

impl<C: CostModel> OfflineDetector for BinSeg<C> {
    fn detect(
        &self,
        x: &[f64],
        ctx: &ExecutionContext<'_>,
    ) -> Result<OfflineChangePointResult, CpxError> {
        self.config.validate()?;
        validate_signal(x, "binseg")?;
        let n = x.len();
        let validated = resolve_constraints(ctx.constraints, n, self.cost_model.min_segment_len())?;

        let started_at = Instant::now();
        if let Some(result) =
            constant_signal_result(x, "binseg", self.cost_model.name(), started_at)?
        {
            return Ok(result);
        }

        let cache = self.cost_model.precompute(x)?;
        let cancel_check_every = self.config.normalized_cancel_check_every();
        let mut runtime = RuntimeStats::default();
        let mut notes = vec![];
        let mut warnings = vec![];

        let (target, beta) = match &self.config.stopping {
            Stopping::KnownK(k) => {
                if let Some(max_change_points) = validated.max_change_points
                    && max_change_points < *k
                {
                    return Err(CpxError::invalid_input(format!(
                        "KnownK={k} exceeds constraints.max_change_points={max_change_points}"
                    )));
                }
                notes.push(format!("stopping=KnownK({k})"));
                (Some(*k), None)
            }
            Stopping::Penalized(penalty) => {
                let beta = resolve_penalty_beta(
                    &self.cost_model,
                    penalty,
                    x,
                    self.config.params_per_segment,
                    self.config.scale_penalty_by_noise,
                )?;
                notes.push(format!("stopping=Penalized({penalty:?}), beta={beta}"));
                (validated.max_change_points, Some(beta))
            }
        };

        debug!(
            n,
            cost_model = self.cost_model.name(),
            stopping = ?self.config.stopping,
            min_segment_len = validated.min_segment_len,
            "starting binseg"
        );

        let mut proposals: Vec<SplitProposal> = vec![];
        if let Some(p) = best_split_in_segment(
            &self.cost_model,
            &cache,
            &validated,
            0,
            n,
            ctx,
            &mut runtime,
        )? {
            proposals.push(p);
        }

        let mut change_points: Vec<usize> = vec![];
        let mut iteration = 0usize;
        loop {
            check_runtime_controls(iteration, cancel_check_every, ctx, started_at, &mut runtime)?;
            checked_counter_increment(&mut iteration, "binseg_iterations")?;

            if target.is_some_and(|limit| change_points.len() >= limit) {
                break;
            }

            let Some(best_idx) = proposals
                .iter()
                .enumerate()
                .fold(None, |acc: Option<usize>, (idx, p)| match acc {
                    Some(current) if !p.beats(&proposals[current]) => Some(current),
                    _ => Some(idx),
                })
            else {
                break;
            };

            let chosen = proposals.swap_remove(best_idx);
            if let Some(beta) = beta
                && chosen.gain <= beta
            {
                break;
            }

            insert_sorted_unique(&mut change_points, chosen.split)?;
            for (start, end) in [(chosen.start, chosen.split), (chosen.split, chosen.end)] {
                if let Some(p) = best_split_in_segment(
                    &self.cost_model,
                    &cache,
                    &validated,
                    start,
                    end,
                    ctx,
                    &mut runtime,
                )? {
                    proposals.push(p);
                }
            }
            if let Some(limit) = target {
                ctx.report_progress(change_points.len() as f32 / limit.max(1) as f32);
            }
        }

        if let Stopping::KnownK(k) = self.config.stopping
            && change_points.len() < k
        {
            return Err(CpxError::invalid_input(format!(
                "KnownK exact solution unreachable: requested k={k}, \
                 but only {} admissible splits exist under the constraints",
                change_points.len()
            )));
        }

        soft_budget_warning(&runtime, &mut warnings);
        let runtime_ms = elapsed_ms(started_at);
        ctx.report_progress(1.0);
        notes.push(format!(
            "change_count={}, cost_evals={}",
            change_points.len(),
            runtime.cost_evals
        ));

        info!(
            change_count = change_points.len(),
            cost_evals = runtime.cost_evals,
            runtime_ms,
            "binseg finished"
        );

        let diagnostics = Diagnostics {
            runtime_ms: Some(runtime_ms),
            penalty: beta,
            notes,
            warnings,
            pruning_stats: Some(PruningStats {
                candidates_considered: runtime.candidates_considered,
                candidates_pruned: 0,
            }),
            ..Diagnostics::for_algorithm("binseg", self.cost_model.name(), n)
        };

        OfflineChangePointResult::new(n, build_result_breakpoints(n, change_points), diagnostics)
    }
}
