// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::common::{
    RuntimeStats, check_runtime_controls, checked_counter_increment, constant_signal_result,
    evaluate_segment_cost, noise_scale, resolve_constraints, soft_budget_warning, validate_signal,
};
use cpx_core::{
    CpxError, Diagnostics, ExecutionContext, OfflineChangePointResult, OfflineDetector, Penalty,
    PruningStats, Stopping, ValidatedConstraints, elapsed_ms, penalty_value, validate_stopping,
};
use cpx_costs::CostModel;
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_CANCEL_CHECK_EVERY: usize = 1000;
const DEFAULT_PARAMS_PER_SEGMENT: usize = 2;
/// Penalty doublings allowed while bracketing an exact change count.
const KNOWN_K_MAX_EXPANSIONS: usize = 80;
const KNOWN_K_MAX_BISECTIONS: usize = 64;

/// Configuration for [`Pelt`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct PeltConfig {
    pub stopping: Stopping,
    pub params_per_segment: usize,
    /// Multiply BIC/AIC penalties by the squared noise scale when the cost
    /// model works in squared signal units. Manual penalties are never scaled.
    pub scale_penalty_by_noise: bool,
    pub cancel_check_every: usize,
}

impl Default for PeltConfig {
    fn default() -> Self {
        Self {
            stopping: Stopping::Penalized(Penalty::BIC),
            params_per_segment: DEFAULT_PARAMS_PER_SEGMENT,
            scale_penalty_by_noise: true,
            cancel_check_every: DEFAULT_CANCEL_CHECK_EVERY,
        }
    }
}

impl PeltConfig {
    fn validate(&self) -> Result<(), CpxError> {
        validate_stopping(&self.stopping)?;
        if self.params_per_segment == 0 {
            return Err(CpxError::invalid_input(
                "PeltConfig.params_per_segment must be >= 1; got 0",
            ));
        }
        Ok(())
    }

    fn normalized_cancel_check_every(&self) -> usize {
        self.cancel_check_every.max(1)
    }
}

/// Pruned Exact Linear Time partitioning: the globally optimal segmentation
/// for the chosen cost and penalty.
///
/// `Stopping::KnownK(k)` is answered by searching the penalty for which the
/// optimal segmentation has exactly `k` change points.
#[derive(Debug)]
pub struct Pelt<C: CostModel> {
    cost_model: C,
    config: PeltConfig,
}

impl<C: CostModel> Pelt<C> {
    pub fn new(cost_model: C, config: PeltConfig) -> Result<Self, CpxError> {
        config.validate()?;
        Ok(Self { cost_model, config })
    }

    pub fn cost_model(&self) -> &C {
        &self.cost_model
    }

    pub fn config(&self) -> &PeltConfig {
        &self.config
    }
}

/// Per-change penalty in cost units.
pub(crate) fn resolve_penalty_beta<C: CostModel>(
    model: &C,
    penalty: &Penalty,
    x: &[f64],
    params_per_segment: usize,
    scale_by_noise: bool,
) -> Result<f64, CpxError> {
    let base = penalty_value(penalty, x.len(), params_per_segment)?;
    let scaled = scale_by_noise
        && model.penalty_scales_with_noise()
        && !matches!(penalty, Penalty::Manual(_));
    let beta = if scaled {
        base * noise_scale(x).powi(2)
    } else {
        base
    };
    if !beta.is_finite() || beta <= 0.0 {
        return Err(CpxError::invalid_input(format!(
            "resolved penalty must be finite and > 0.0; got beta={beta}"
        )));
    }
    Ok(beta)
}

/// One optimal segmentation for a fixed penalty.
#[derive(Clone, Debug)]
struct Partition {
    /// Segment ends, the last one equal to `n`.
    breakpoints: Vec<usize>,
    objective: f64,
    cost_evals: usize,
    considered: usize,
    pruned: usize,
}

impl Partition {
    fn empty() -> Self {
        Self {
            breakpoints: vec![],
            objective: f64::NAN,
            cost_evals: 0,
            considered: 0,
            pruned: 0,
        }
    }

    fn change_count(&self) -> usize {
        self.breakpoints.len().saturating_sub(1)
    }
}

/// Dynamic-programming state shared by every solve of one `detect` call.
struct Solver<'a, 'ctx, C: CostModel> {
    model: &'a C,
    cache: &'a C::Cache,
    n: usize,
    min_segment_len: usize,
    /// Admissible segment ends, always finishing with `n`.
    targets: Vec<usize>,
    ctx: &'a ExecutionContext<'ctx>,
    started_at: Instant,
    cancel_check_every: usize,
    runtime: RuntimeStats,
}

impl<'a, 'ctx, C: CostModel> Solver<'a, 'ctx, C> {
    fn new(
        model: &'a C,
        cache: &'a C::Cache,
        validated: &ValidatedConstraints,
        ctx: &'a ExecutionContext<'ctx>,
        cancel_check_every: usize,
    ) -> Self {
        let mut targets = validated.effective_candidates.clone();
        if targets.last() != Some(&validated.n) {
            targets.push(validated.n);
        }
        Self {
            model,
            cache,
            n: validated.n,
            min_segment_len: validated.min_segment_len,
            targets,
            ctx,
            started_at: Instant::now(),
            cancel_check_every,
            runtime: RuntimeStats::default(),
        }
    }

    /// Minimizes `sum(segment cost) + beta * changes`. A change cap switches
    /// to the exhaustive per-count recursion.
    fn solve(&mut self, beta: f64, cap: Option<usize>) -> Result<Partition, CpxError> {
        match cap {
            None => self.solve_pruned(beta),
            Some(cap) => self.solve_capped(beta, cap),
        }
    }

    /// Evaluates `[tau, t)` and counts it against the run and the partition.
    fn scored_segment(
        &mut self,
        tau: usize,
        t: usize,
        partition: &mut Partition,
    ) -> Result<f64, CpxError> {
        let cost =
            evaluate_segment_cost(self.model, self.cache, tau, t, self.ctx, &mut self.runtime)?;
        checked_counter_increment(&mut partition.cost_evals, "run_cost_evals")?;
        checked_counter_increment(&mut partition.considered, "run_candidates_considered")?;
        checked_counter_increment(
            &mut self.runtime.candidates_considered,
            "candidates_considered",
        )?;
        Ok(cost)
    }

    fn poll(&mut self, step: usize) -> Result<(), CpxError> {
        check_runtime_controls(
            step,
            self.cancel_check_every,
            self.ctx,
            self.started_at,
            &mut self.runtime,
        )
    }

    /// Uncapped PELT. Uses `F(0) = -beta` so the first segment is free.
    fn solve_pruned(&mut self, beta: f64) -> Result<Partition, CpxError> {
        let n = self.n;
        let mut best = vec![f64::INFINITY; n + 1];
        let mut previous = vec![usize::MAX; n + 1];
        best[0] = -beta;
        previous[0] = 0;

        let mut alive = vec![0usize];
        let mut partition = Partition::empty();
        let total = self.targets.len();

        for step in 0..total {
            let t = self.targets[step];
            self.poll(step)?;

            // Unpenalized score per live candidate; None when it was not eligible.
            let mut unpenalized: Vec<Option<f64>> = Vec::with_capacity(alive.len());
            let mut winner: Option<(f64, usize)> = None;
            for &tau in &alive {
                if t - tau < self.min_segment_len || !best[tau].is_finite() {
                    unpenalized.push(None);
                    continue;
                }

                let cost = self.scored_segment(tau, t, &mut partition)?;
                let score = best[tau] + cost;
                let total_score = score + beta;
                if !total_score.is_finite() {
                    return Err(CpxError::numerical_issue(format!(
                        "non-finite objective for segment [{tau}, {t}): F={}, cost={cost}",
                        best[tau]
                    )));
                }
                unpenalized.push(Some(score));
                // Strict improvement keeps the leftmost split on ties.
                if winner.is_none_or(|(current, _)| total_score < current) {
                    winner = Some((total_score, tau));
                }
            }

            let Some((score, tau)) = winner else {
                if t == n {
                    return Err(infeasible(n));
                }
                // Unreachable split; it never becomes a candidate.
                continue;
            };
            best[t] = score;
            previous[t] = tau;

            // Drop candidates that can never beat the optimum again.
            let mut survivors = Vec::with_capacity(alive.len() + 1);
            for (&candidate, scored) in alive.iter().zip(&unpenalized) {
                match scored {
                    Some(value) if *value >= score => {
                        checked_counter_increment(&mut partition.pruned, "run_candidates_pruned")?;
                        checked_counter_increment(
                            &mut self.runtime.candidates_pruned,
                            "candidates_pruned",
                        )?;
                    }
                    _ => survivors.push(candidate),
                }
            }
            if t < n {
                survivors.push(t);
            }
            alive = survivors;

            self.ctx.report_progress((step + 1) as f32 / total as f32);
        }

        partition.objective = best[n];
        partition.breakpoints = backtrack(&previous, n)?;
        Ok(partition)
    }

    /// Optimal partition with at most `cap` changes.
    ///
    /// `cost[j][i]` is the cheapest split of `[0, ends[i])` into `j + 1`
    /// segments. Pruning is unsound once the change count is bounded, so every
    /// admissible `(tau, t)` pair is scored once and feeds all counts.
    fn solve_capped(&mut self, beta: f64, cap: usize) -> Result<Partition, CpxError> {
        let n = self.n;
        let mut ends = Vec::with_capacity(self.targets.len() + 1);
        ends.push(0);
        ends.extend_from_slice(&self.targets);
        let m = ends.len();
        let layers = cap.min(m.saturating_sub(2)) + 1;

        let mut cost = vec![vec![f64::INFINITY; m]; layers];
        let mut parent = vec![vec![usize::MAX; m]; layers];
        let mut partition = Partition::empty();

        for i in 1..m {
            self.poll(i - 1)?;
            let t = ends[i];
            for prior in 0..i {
                let tau = ends[prior];
                if t - tau < self.min_segment_len {
                    break;
                }
                let reachable = (0..layers).any(|j| {
                    if prior == 0 {
                        j == 0
                    } else {
                        j > 0 && cost[j - 1][prior].is_finite()
                    }
                });
                if !reachable {
                    continue;
                }

                let segment = self.scored_segment(tau, t, &mut partition)?;
                for j in 0..layers {
                    let base = match (prior, j) {
                        (0, 0) => 0.0,
                        (0, _) | (_, 0) => continue,
                        _ => cost[j - 1][prior],
                    };
                    let candidate = base + segment;
                    if !candidate.is_finite() {
                        continue;
                    }
                    // Strict improvement keeps the leftmost split on ties.
                    if candidate < cost[j][i] {
                        cost[j][i] = candidate;
                        parent[j][i] = prior;
                    }
                }
            }
            self.ctx.report_progress(i as f32 / (m - 1) as f32);
        }

        let last = m - 1;
        let mut chosen: Option<(f64, usize)> = None;
        for (j, row) in cost.iter().enumerate() {
            let total = row[last] + beta * j as f64;
            if total.is_finite() && chosen.is_none_or(|(current, _)| total < current) {
                chosen = Some((total, j));
            }
        }
        let Some((objective, changes)) = chosen else {
            return Err(infeasible(n));
        };

        let mut breakpoints = Vec::with_capacity(changes + 1);
        let mut i = last;
        for j in (0..=changes).rev() {
            breakpoints.push(ends[i]);
            let prior = parent[j][i];
            if prior >= i {
                return Err(CpxError::numerical_issue(format!(
                    "broken backtrack link at t={} with {j} changes",
                    ends[i]
                )));
            }
            i = prior;
        }
        if i != 0 {
            return Err(CpxError::numerical_issue(
                "capped backtrack did not return to the series start",
            ));
        }
        breakpoints.reverse();

        partition.objective = objective;
        partition.breakpoints = breakpoints;
        Ok(partition)
    }

    /// Brackets then bisects the penalty until the optimum has exactly `k`
    /// changes. The change count is non-increasing in the penalty.
    fn solve_known_k(&mut self, k: usize) -> Result<(Partition, f64, usize), CpxError> {
        let mut solves = 1usize;
        let mut low = f64::EPSILON;
        let mut low_partition = self.solve(low, None)?;
        match low_partition.change_count().cmp(&k) {
            Ordering::Equal => return Ok((low_partition, low, solves)),
            Ordering::Less => {
                return Err(CpxError::invalid_input(format!(
                    "KnownK exact solution unreachable: requested k={k}, \
                     but even beta={low} yields only {} changes",
                    low_partition.change_count()
                )));
            }
            Ordering::Greater => {}
        }

        let mut high = low;
        let mut high_partition = None;
        for _ in 0..KNOWN_K_MAX_EXPANSIONS {
            high *= 2.0;
            let candidate = self.solve(high, None)?;
            solves += 1;
            match candidate.change_count().cmp(&k) {
                Ordering::Equal => return Ok((candidate, high, solves)),
                Ordering::Greater => {
                    low = high;
                    low_partition = candidate;
                }
                Ordering::Less => {
                    high_partition = Some(candidate);
                    break;
                }
            }
        }
        let Some(mut high_partition) = high_partition else {
            return Err(CpxError::invalid_input(format!(
                "KnownK exact solution unreachable: \
                 no penalty up to beta={high} brings the change count down to k={k}"
            )));
        };

        for _ in 0..KNOWN_K_MAX_BISECTIONS {
            let mid = low + (high - low) / 2.0;
            if mid <= low || mid >= high {
                break;
            }
            let candidate = self.solve(mid, None)?;
            solves += 1;
            match candidate.change_count().cmp(&k) {
                Ordering::Equal => return Ok((candidate, mid, solves)),
                Ordering::Greater => {
                    low = mid;
                    low_partition = candidate;
                }
                Ordering::Less => {
                    high = mid;
                    high_partition = candidate;
                }
            }
        }

        Err(CpxError::invalid_input(format!(
            "KnownK exact solution unreachable: change count jumps from {} (beta={low}) \
             to {} (beta={high}) without reaching k={k}",
            low_partition.change_count(),
            high_partition.change_count()
        )))
    }
}

fn infeasible(n: usize) -> CpxError {
    CpxError::invalid_input(format!(
        "no feasible segmentation ends at n={n}; \
         check min_segment_len, candidate_splits/jump and max_change_points"
    ))
}

/// Follows `previous` links back from `n`; links must strictly decrease.
fn backtrack(previous: &[usize], n: usize) -> Result<Vec<usize>, CpxError> {
    let mut breakpoints = vec![n];
    let mut t = n;
    while t > 0 {
        let tau = previous[t];
        if tau >= t {
            return Err(CpxError::numerical_issue(format!(
                "broken backtrack link at t={t} (predecessor {tau})"
            )));
        }
        if tau > 0 {
            breakpoints.push(tau);
        }
        t = tau;
    }
    breakpoints.reverse();
    Ok(breakpoints)
}

impl<C: CostModel> OfflineDetector for Pelt<C> {
    fn detect(
        &self,
        x: &[f64],
        ctx: &ExecutionContext<'_>,
    ) -> Result<OfflineChangePointResult, CpxError> {
        self.config.validate()?;
        validate_signal(x, "pelt")?;
        let validated =
            resolve_constraints(ctx.constraints, x.len(), self.cost_model.min_segment_len())?;

        let started_at = Instant::now();
        if let Some(result) =
            constant_signal_result(x, "pelt", self.cost_model.name(), started_at)?
        {
            return Ok(result);
        }

        debug!(
            n = x.len(),
            cost_model = self.cost_model.name(),
            stopping = ?self.config.stopping,
            min_segment_len = validated.min_segment_len,
            candidates = validated.effective_candidates.len(),
            "starting pelt"
        );

        let cache = self.cost_model.precompute(x)?;
        let mut solver = Solver::new(
            &self.cost_model,
            &cache,
            &validated,
            ctx,
            self.config.normalized_cancel_check_every(),
        );
        let mut notes = vec![];
        let (partition, beta) = match &self.config.stopping {
            Stopping::Penalized(penalty) => {
                let beta = resolve_penalty_beta(
                    &self.cost_model,
                    penalty,
                    x,
                    self.config.params_per_segment,
                    self.config.scale_penalty_by_noise,
                )?;
                notes.push(format!("stopping=Penalized({penalty:?}), beta={beta}"));
                (solver.solve(beta, validated.max_change_points)?, beta)
            }
            Stopping::KnownK(k) => {
                if let Some(cap) = validated.max_change_points
                    && cap < *k
                {
                    return Err(CpxError::invalid_input(format!(
                        "KnownK={k} exceeds constraints.max_change_points={cap}"
                    )));
                }
                let (partition, beta, solves) = solver.solve_known_k(*k)?;
                notes.push(format!("stopping=KnownK({k}), beta={beta}, solves={solves}"));
                (partition, beta)
            }
        };

        let runtime = solver.runtime;
        let mut warnings = vec![];
        soft_budget_warning(&runtime, &mut warnings);
        let runtime_ms = elapsed_ms(started_at);
        ctx.report_progress(1.0);
        notes.push(format!(
            "objective={}, change_count={}, cost_evals={}, pruned={}/{}",
            partition.objective,
            partition.change_count(),
            partition.cost_evals,
            partition.pruned,
            partition.considered
        ));

        info!(
            change_count = partition.change_count(),
            cost_evals = runtime.cost_evals,
            candidates_pruned = runtime.candidates_pruned,
            runtime_ms,
            "pelt finished"
        );

        let diagnostics = Diagnostics {
            runtime_ms: Some(runtime_ms),
            penalty: Some(beta),
            notes,
            warnings,
            pruning_stats: Some(PruningStats {
                candidates_considered: runtime.candidates_considered,
                candidates_pruned: runtime.candidates_pruned,
            }),
            ..Diagnostics::for_algorithm("pelt", self.cost_model.name(), x.len())
        };

        OfflineChangePointResult::new(x.len(), partition.breakpoints, diagnostics)
    }
}
