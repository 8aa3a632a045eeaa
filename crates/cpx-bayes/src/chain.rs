// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::SamplerConfig;
use crate::model::{ChainState, ModelMode, SegmentModel};
use crate::sampler::PosteriorSample;
use cpx_core::{CpxError, ExecutionContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

const TARGET_ACCEPTANCE: f64 = 0.44;
const TUNE_INTERVAL: usize = 50;
const TUNE_GAIN: f64 = 2.0;
const CHAIN_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;
const MAX_PREALLOCATED_DRAWS: usize = 4096;

/// Seed of chain `chain` under run seed `seed`.
pub(crate) fn chain_seed(seed: u64, chain: usize) -> u64 {
    seed ^ (chain as u64).wrapping_add(1).wrapping_mul(CHAIN_SEED_STRIDE)
}

/// Why a chain stopped early.
#[derive(Debug)]
pub(crate) enum ChainFailure {
    /// This chain hit the error itself.
    Failed(CpxError),
    /// A sibling chain failed and raised the abort flag.
    Aborted,
}

impl From<CpxError> for ChainFailure {
    fn from(err: CpxError) -> Self {
        Self::Failed(err)
    }
}

/// Cancellation, timeout and sibling-abort polling shared by all chains.
pub(crate) struct ChainControl<'a> {
    ctx: &'a ExecutionContext<'a>,
    abort: &'a AtomicBool,
    started_at: Instant,
    check_every: usize,
}

impl<'a> ChainControl<'a> {
    pub fn new(
        ctx: &'a ExecutionContext<'a>,
        abort: &'a AtomicBool,
        started_at: Instant,
        check_every: usize,
    ) -> Self {
        Self {
            ctx,
            abort,
            started_at,
            check_every: check_every.max(1),
        }
    }

    pub fn raise_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    fn poll(&self, iteration: usize) -> Result<(), ChainFailure> {
        if !iteration.is_multiple_of(self.check_every) {
            return Ok(());
        }
        if self.abort.load(Ordering::Relaxed) {
            return Err(ChainFailure::Aborted);
        }
        self.ctx.check_cancelled()?;
        if self.ctx.time_budget_exceeded(self.started_at) {
            return Err(CpxError::sampling_timeout(format!(
                "sampler exceeded time_budget_ms={:?} at iteration {iteration}",
                self.ctx.constraints.time_budget_ms
            ))
            .into());
        }
        Ok(())
    }

    fn report_progress(&self, fraction: f32) {
        self.ctx.report_progress(fraction);
    }
}

/// Random-walk scale tuned toward the target acceptance during warmup.
#[derive(Clone, Copy, Debug)]
struct AdaptiveStep {
    size: f64,
    min: f64,
    max: f64,
    accepted: usize,
    proposed: usize,
}

impl AdaptiveStep {
    fn new(size: f64, min: f64, max: f64) -> Self {
        Self {
            size: size.clamp(min, max),
            min,
            max,
            accepted: 0,
            proposed: 0,
        }
    }

    fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    fn tune(&mut self) {
        if self.proposed == 0 {
            return;
        }
        let rate = self.accepted as f64 / self.proposed as f64;
        self.size = (self.size * ((rate - TARGET_ACCEPTANCE) * TUNE_GAIN).exp())
            .clamp(self.min, self.max);
        self.accepted = 0;
        self.proposed = 0;
    }
}

/// Samples and acceptance statistics of one completed chain.
#[derive(Clone, Debug)]
pub(crate) struct ChainOutcome {
    pub samples: Vec<PosteriorSample>,
    pub acceptance_rate: f64,
}

struct Sweeper<'m, 'a> {
    model: &'m SegmentModel<'a>,
    state: ChainState,
    log_likelihood: f64,
    rng: StdRng,
    position_step: usize,
    proportion_step: AdaptiveStep,
    mean_steps: Vec<AdaptiveStep>,
    volatility_steps: Vec<AdaptiveStep>,
    accepted: usize,
    proposed: usize,
}

impl<'m, 'a> Sweeper<'m, 'a> {
    fn new(
        model: &'m SegmentModel<'a>,
        config: &SamplerConfig,
        chain: usize,
    ) -> Result<Self, CpxError> {
        let mut rng = StdRng::seed_from_u64(chain_seed(config.seed, chain));
        let state = model.initial_state(&mut rng)?;
        let log_likelihood = model.log_likelihood(&state);
        let log_posterior = log_likelihood + model.log_prior(&state);
        if !log_posterior.is_finite() {
            return Err(CpxError::sampling_divergence(format!(
                "chain {chain} starts at a non-finite log-posterior: {log_posterior}"
            )));
        }

        let s = model.priors().std;
        let per_segment = (model.n() as f64 / model.segment_count() as f64).max(1.0);
        let mean_steps = vec![
            AdaptiveStep::new(s / per_segment.sqrt(), s * 1e-6, s * 10.0);
            model.segment_count()
        ];
        let volatility_steps = vec![
            AdaptiveStep::new(1.0 / (2.0 * per_segment).sqrt(), 1e-6, 2.0);
            state.volatilities.len()
        ];
        let proportion_step =
            AdaptiveStep::new(0.05 / model.segment_count() as f64, 1e-6, 0.5);

        Ok(Self {
            model,
            state,
            log_likelihood,
            rng,
            position_step: config.position_step,
            proportion_step,
            mean_steps,
            volatility_steps,
            accepted: 0,
            proposed: 0,
        })
    }

    fn standard_normal(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }

    /// Metropolis test on a log acceptance ratio. NaN or `+inf` means the
    /// posterior evaluation broke down.
    fn accept(&mut self, log_ratio: f64) -> Result<bool, CpxError> {
        if log_ratio.is_nan() || log_ratio == f64::INFINITY {
            return Err(CpxError::sampling_divergence(format!(
                "non-finite log acceptance ratio: {log_ratio}"
            )));
        }
        if log_ratio >= 0.0 {
            return Ok(true);
        }
        let u: f64 = self.rng.r#gen();
        Ok(u.ln() < log_ratio)
    }

    fn tally(&mut self, accepted: bool, counted: bool) {
        if counted {
            self.proposed += 1;
            if accepted {
                self.accepted += 1;
            }
        }
    }

    fn sweep(&mut self, counted: bool) -> Result<(), CpxError> {
        match self.model.mode() {
            ModelMode::Single => self.update_position(counted)?,
            ModelMode::Multi => self.update_partition(counted)?,
        }
        for segment in 0..self.model.segment_count() {
            self.update_mean(segment, counted)?;
        }
        for index in 0..self.state.volatilities.len() {
            self.update_volatility(index, counted)?;
        }
        if !self.log_likelihood.is_finite() {
            return Err(CpxError::sampling_divergence(format!(
                "log-likelihood became non-finite: {}",
                self.log_likelihood
            )));
        }
        Ok(())
    }

    fn update_position(&mut self, counted: bool) -> Result<(), CpxError> {
        let (lo, hi) = self.model.position_bounds();
        let current = self.state.positions[0];
        let proposal = if self.rng.gen_bool(0.5) {
            let jump = self.rng.gen_range(1..=self.position_step);
            if self.rng.gen_bool(0.5) {
                current.checked_add(jump)
            } else {
                current.checked_sub(jump)
            }
        } else {
            Some(self.rng.gen_range(lo..=hi))
        };

        let Some(proposal) = proposal.filter(|p| (lo..=hi).contains(p)) else {
            self.tally(false, counted);
            return Ok(());
        };
        if proposal == current {
            self.tally(true, counted);
            return Ok(());
        }

        let moved = [proposal];
        let delta = self
            .model
            .reassignment_delta(&self.state.positions, &moved, &self.state);
        let accepted = self.accept(delta)?;
        if accepted {
            self.state.positions[0] = proposal;
            self.log_likelihood += delta;
        }
        self.tally(accepted, counted);
        Ok(())
    }

    /// Moves mass between two adjacent segment proportions, which shifts
    /// exactly one boundary. Half the moves are local, half redraw the split
    /// of the pair's combined mass uniformly.
    fn update_partition(&mut self, counted: bool) -> Result<(), CpxError> {
        let j = self.rng.gen_range(0..self.model.change_points());
        let pair = self.state.proportions[j] + self.state.proportions[j + 1];
        let left = if self.rng.gen_bool(0.5) {
            let step = self.proportion_step.size;
            self.state.proportions[j] + step * self.standard_normal()
        } else {
            self.rng.gen_range(0.0..pair)
        };
        let right = pair - left;

        let mut proportions = self.state.proportions.clone();
        proportions[j] = left;
        proportions[j + 1] = right;
        let boundaries = if left > 0.0 && right > 0.0 {
            self.model.boundaries_from_proportions(&proportions)
        } else {
            None
        };
        let Some(boundaries) = boundaries else {
            self.proportion_step.record(false);
            self.tally(false, counted);
            return Ok(());
        };

        let likelihood_delta =
            self.model
                .reassignment_delta(&self.state.positions, &boundaries, &self.state);
        let prior_delta = self.model.log_proportion_prior(&proportions)
            - self.model.log_proportion_prior(&self.state.proportions);
        let accepted = self.accept(likelihood_delta + prior_delta)?;
        if accepted {
            self.state.positions = boundaries;
            self.state.proportions = proportions;
            self.log_likelihood += likelihood_delta;
        }
        self.proportion_step.record(accepted);
        self.tally(accepted, counted);
        Ok(())
    }

    fn update_mean(&mut self, segment: usize, counted: bool) -> Result<(), CpxError> {
        let (start, end) = self.model.segment_range(&self.state.positions, segment);
        let sigma = self.state.volatilities[self.model.volatility_index(segment)];
        let current = self.state.means[segment];
        let step = self.mean_steps[segment].size;
        let proposal = current + step * self.standard_normal();

        let likelihood_delta = self.model.range_log_lik(start, end, proposal, sigma)
            - self.model.range_log_lik(start, end, current, sigma);
        let prior_delta = self.model.log_mean_prior(proposal) - self.model.log_mean_prior(current);
        let accepted = self.accept(likelihood_delta + prior_delta)?;
        if accepted {
            self.state.means[segment] = proposal;
            self.log_likelihood += likelihood_delta;
        }
        self.mean_steps[segment].record(accepted);
        self.tally(accepted, counted);
        Ok(())
    }

    /// Log-scale random walk; the `ln(proposal / current)` term is the
    /// Jacobian of the log transform.
    fn update_volatility(&mut self, index: usize, counted: bool) -> Result<(), CpxError> {
        let current = self.state.volatilities[index];
        let step = self.volatility_steps[index].size;
        let proposal = current * (step * self.standard_normal()).exp();

        let segments = match self.model.mode() {
            ModelMode::Single => 0..self.model.segment_count(),
            ModelMode::Multi => index..index + 1,
        };
        let mut likelihood_delta = 0.0;
        for segment in segments {
            let (start, end) = self.model.segment_range(&self.state.positions, segment);
            let mean = self.state.means[segment];
            likelihood_delta += self.model.range_log_lik(start, end, mean, proposal)
                - self.model.range_log_lik(start, end, mean, current);
        }
        let prior_delta = self.model.log_volatility_prior(proposal)
            - self.model.log_volatility_prior(current)
            + proposal.ln()
            - current.ln();
        let accepted = self.accept(likelihood_delta + prior_delta)?;
        if accepted {
            self.state.volatilities[index] = proposal;
            self.log_likelihood += likelihood_delta;
        }
        self.volatility_steps[index].record(accepted);
        self.tally(accepted, counted);
        Ok(())
    }

    fn tune(&mut self) {
        self.proportion_step.tune();
        for step in self
            .mean_steps
            .iter_mut()
            .chain(self.volatility_steps.iter_mut())
        {
            step.tune();
        }
    }
}

/// Runs one chain to completion: `warmup` tuning sweeps, then `draws`
/// recorded sweeps.
pub(crate) fn run_chain(
    model: &SegmentModel<'_>,
    config: &SamplerConfig,
    chain: usize,
    control: &ChainControl<'_>,
) -> Result<ChainOutcome, ChainFailure> {
    let total = config.total_iterations()?;
    let mut sweeper = Sweeper::new(model, config, chain)?;
    let mut samples = Vec::with_capacity(config.draws.min(MAX_PREALLOCATED_DRAWS));

    for iteration in 0..total {
        control.poll(iteration)?;
        let warming_up = iteration < config.warmup;
        sweeper.sweep(!warming_up)?;

        if warming_up {
            if (iteration + 1).is_multiple_of(TUNE_INTERVAL) {
                sweeper.tune();
            }
            continue;
        }

        samples.push(PosteriorSample {
            chain,
            draw: iteration - config.warmup,
            positions: sweeper.state.positions.clone(),
            means: sweeper.state.means.clone(),
            volatilities: sweeper.state.volatilities.clone(),
        });

        if chain == 0 && iteration.is_multiple_of(control.check_every) {
            control.report_progress(iteration as f32 / total as f32);
        }
    }

    let acceptance_rate = if sweeper.proposed == 0 {
        0.0
    } else {
        sweeper.accepted as f64 / sweeper.proposed as f64
    };
    Ok(ChainOutcome {
        samples,
        acceptance_rate,
    })
}
