// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Bookkeeping shared by the offline strategies.

use cpx_core::math::{is_constant_signal, robust_noise_scale};
use cpx_core::{
    BudgetStatus, Constraints, CpxError, Diagnostics, ExecutionContext, OfflineChangePointResult,
    ValidatedConstraints, elapsed_ms, validate_constraints,
};
use cpx_costs::CostModel;
use std::time::Instant;

const NOISE_SCALE_FLOOR: f64 = 1e-12;

#[derive(Default, Clone, Copy, Debug)]
pub(crate) struct RuntimeStats {
    pub cost_evals: usize,
    pub candidates_considered: usize,
    pub candidates_pruned: usize,
    pub soft_budget_exceeded: bool,
}

pub(crate) fn checked_counter_increment(counter: &mut usize, name: &str) -> Result<(), CpxError> {
    *counter = counter
        .checked_add(1)
        .ok_or_else(|| CpxError::resource_limit(format!("{name} counter overflow")))?;
    Ok(())
}

pub(crate) fn evaluate_segment_cost<C: CostModel>(
    model: &C,
    cache: &C::Cache,
    start: usize,
    end: usize,
    ctx: &ExecutionContext<'_>,
    runtime: &mut RuntimeStats,
) -> Result<f64, CpxError> {
    checked_counter_increment(&mut runtime.cost_evals, "cost_evals")?;

    match ctx.check_cost_eval_budget(runtime.cost_evals)? {
        BudgetStatus::WithinBudget => {}
        BudgetStatus::ExceededSoftDegrade => {
            runtime.soft_budget_exceeded = true;
        }
    }

    let segment_cost = model.segment_cost(cache, start, end);
    if !segment_cost.is_finite() {
        return Err(CpxError::numerical_issue(format!(
            "non-finite segment cost at [{start}, {end}): {segment_cost}"
        )));
    }
    Ok(segment_cost)
}

pub(crate) fn check_runtime_controls(
    iteration: usize,
    cancel_check_every: usize,
    ctx: &ExecutionContext<'_>,
    started_at: Instant,
    runtime: &mut RuntimeStats,
) -> Result<(), CpxError> {
    if iteration.is_multiple_of(cancel_check_every) {
        ctx.check_cancelled()?;
        match ctx.check_time_budget(started_at)? {
            BudgetStatus::WithinBudget => {}
            BudgetStatus::ExceededSoftDegrade => {
                runtime.soft_budget_exceeded = true;
            }
        }
    }
    Ok(())
}

/// Rejects non-finite input before any strategy-specific work.
pub(crate) fn validate_signal(x: &[f64], algorithm: &str) -> Result<(), CpxError> {
    if x.len() < 2 {
        return Err(CpxError::insufficient_data(format!(
            "{algorithm} requires at least 2 observations; got {}",
            x.len()
        )));
    }
    if let Some((idx, value)) = x.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(CpxError::invalid_input(format!(
            "{algorithm} requires finite values; got {value} at t={idx}"
        )));
    }
    Ok(())
}

/// Validates `constraints` with `min_segment_len` raised to what the cost model needs.
pub(crate) fn resolve_constraints(
    constraints: &Constraints,
    n: usize,
    model_min_segment_len: usize,
) -> Result<ValidatedConstraints, CpxError> {
    if constraints.min_segment_len >= model_min_segment_len {
        return validate_constraints(constraints, n);
    }
    let raised = Constraints {
        min_segment_len: model_min_segment_len,
        ..constraints.clone()
    };
    validate_constraints(&raised, n)
}

/// Robust noise scale of `x`, floored so that it can divide safely.
pub(crate) fn noise_scale(x: &[f64]) -> f64 {
    robust_noise_scale(x).max(NOISE_SCALE_FLOOR)
}

/// Empty result for a signal with no variance to segment, or `None` when the
/// signal varies.
pub(crate) fn constant_signal_result(
    x: &[f64],
    algorithm: &'static str,
    cost_model: &'static str,
    started_at: Instant,
) -> Result<Option<OfflineChangePointResult>, CpxError> {
    if !is_constant_signal(x) {
        return Ok(None);
    }
    let diagnostics = Diagnostics {
        runtime_ms: Some(elapsed_ms(started_at)),
        notes: vec!["constant signal; no change points".to_string()],
        ..Diagnostics::for_algorithm(algorithm, cost_model, x.len())
    };
    OfflineChangePointResult::empty(x.len(), diagnostics).map(Some)
}

pub(crate) fn soft_budget_warning(runtime: &RuntimeStats, warnings: &mut Vec<String>) {
    if runtime.soft_budget_exceeded {
        warnings.push(
            "budget exceeded under SoftDegrade mode; run continued without algorithm fallback"
                .to_string(),
        );
    }
}

/// Whether `split` keeps at least `min_segment_len` points to both neighbours
/// in the sorted `selected` set.
pub(crate) fn can_insert_split(
    selected: &[usize],
    split: usize,
    min_segment_len: usize,
    n: usize,
) -> bool {
    match selected.binary_search(&split) {
        Ok(_) => false,
        Err(insert_idx) => {
            let prev = if insert_idx == 0 {
                0
            } else {
                selected[insert_idx - 1]
            };
            let next = if insert_idx == selected.len() {
                n
            } else {
                selected[insert_idx]
            };
            split.saturating_sub(prev) >= min_segment_len
                && next.saturating_sub(split) >= min_segment_len
        }
    }
}

pub(crate) fn insert_sorted_unique(values: &mut Vec<usize>, value: usize) -> Result<(), CpxError> {
    match values.binary_search(&value) {
        Ok(_) => Err(CpxError::invalid_input(format!(
            "duplicate split selected at {value}; internal selection state is inconsistent"
        ))),
        Err(idx) => {
            values.insert(idx, value);
            Ok(())
        }
    }
}

pub(crate) fn build_result_breakpoints(n: usize, change_points: Vec<usize>) -> Vec<usize> {
    let mut breakpoints = change_points;
    breakpoints.push(n);
    breakpoints
}
