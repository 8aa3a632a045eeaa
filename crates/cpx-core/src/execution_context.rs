// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::CpxError;
use crate::constraints::Constraints;
use crate::control::{BudgetMode, BudgetStatus, CancelToken};
use crate::observability::ProgressSink;
use std::time::Instant;

/// Per-run controls handed to every strategy and to each sampler chain.
///
/// Holds borrowed constraints plus the optional cancellation token and
/// progress sink. A context is cheap to build and is never stored past the
/// run it was created for.
pub struct ExecutionContext<'a> {
    pub constraints: &'a Constraints,
    pub cancel: Option<&'a CancelToken>,
    pub budget_mode: BudgetMode,
    pub progress: Option<&'a dyn ProgressSink>,
}

impl<'a> ExecutionContext<'a> {
    /// Hard budgets, no cancellation, no progress reporting.
    pub fn new(constraints: &'a Constraints) -> Self {
        Self {
            constraints,
            cancel: None,
            budget_mode: BudgetMode::default(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_budget_mode(mut self, budget_mode: BudgetMode) -> Self {
        self.budget_mode = budget_mode;
        self
    }

    pub fn with_progress_sink(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    pub fn check_cancelled(&self) -> Result<(), CpxError> {
        match self.is_cancelled() {
            true => Err(CpxError::cancelled()),
            false => Ok(()),
        }
    }

    /// Polls the token only on iterations divisible by `every` (0 acts as 1),
    /// keeping the atomic load out of tight inner loops.
    pub fn check_cancelled_every(&self, iteration: usize, every: usize) -> Result<(), CpxError> {
        if iteration.is_multiple_of(every.max(1)) {
            self.check_cancelled()
        } else {
            Ok(())
        }
    }

    /// Fails with `ResourceLimit` under [`BudgetMode::HardFail`]; otherwise
    /// reports the overrun and lets the caller degrade.
    fn overrun(&self, detail: String) -> Result<BudgetStatus, CpxError> {
        match self.budget_mode {
            BudgetMode::HardFail => Err(CpxError::resource_limit(detail)),
            BudgetMode::SoftDegrade => Ok(BudgetStatus::ExceededSoftDegrade),
        }
    }

    pub fn check_cost_eval_budget(&self, cost_evals: usize) -> Result<BudgetStatus, CpxError> {
        match self.constraints.max_cost_evals {
            Some(limit) if cost_evals > limit => self.overrun(format!(
                "max_cost_evals={limit} spent after {cost_evals} segment cost evaluations"
            )),
            _ => Ok(BudgetStatus::WithinBudget),
        }
    }

    /// Milliseconds elapsed since `started_at` when past `time_budget_ms`.
    fn time_overrun_ms(&self, started_at: Instant) -> Option<(u128, u64)> {
        let limit_ms = self.constraints.time_budget_ms?;
        let elapsed_ms = started_at.elapsed().as_millis();
        (elapsed_ms > u128::from(limit_ms)).then_some((elapsed_ms, limit_ms))
    }

    pub fn time_budget_exceeded(&self, started_at: Instant) -> bool {
        self.time_overrun_ms(started_at).is_some()
    }

    pub fn check_time_budget(&self, started_at: Instant) -> Result<BudgetStatus, CpxError> {
        match self.time_overrun_ms(started_at) {
            Some((elapsed_ms, limit_ms)) => self.overrun(format!(
                "time_budget_ms={limit_ms} spent after {elapsed_ms} ms"
            )),
            None => Ok(BudgetStatus::WithinBudget),
        }
    }

    /// Forwards `fraction` clamped to `[0, 1]`; non-finite values are dropped.
    pub fn report_progress(&self, fraction: f32) {
        if let Some(sink) = self.progress
            && fraction.is_finite()
        {
            sink.on_progress(fraction.clamp(0.0, 1.0));
        }
    }
}
