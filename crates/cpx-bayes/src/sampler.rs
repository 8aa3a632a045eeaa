// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::chain::{ChainControl, ChainFailure, ChainOutcome, run_chain};
use crate::config::SamplerConfig;
use crate::model::{InformedPriors, ModelMode, SegmentModel, validate_returns};
use crate::rhat::split_rhat;
use cpx_core::{CpxError, ExecutionContext, elapsed_ms};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One post-warmup draw.
///
/// `positions` are the sampled change points (return indices, ascending).
/// `volatilities` has a single shared entry in [`ModelMode::Single`] and one
/// entry per segment otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct PosteriorSample {
    pub chain: usize,
    pub draw: usize,
    pub positions: Vec<usize>,
    pub means: Vec<f64>,
    pub volatilities: Vec<f64>,
}

/// Convergence statistic of one model parameter.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterRhat {
    pub parameter: String,
    pub value: f64,
}

/// Run metadata attached to a [`PosteriorBatch`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerDiagnostics {
    pub mode: ModelMode,
    pub chains: usize,
    pub draws: usize,
    pub warmup: usize,
    pub seed: u64,
    /// Post-warmup acceptance rate of every chain, in chain order.
    pub acceptance_rates: Vec<f64>,
    pub rhat: Vec<ParameterRhat>,
    pub max_rhat: Option<f64>,
    /// False when any split R-hat exceeds the configured threshold.
    pub converged: bool,
    pub warnings: Vec<String>,
    pub runtime_ms: u64,
    pub thread_count: usize,
}

/// Posterior means of the sampled parameters over all chains.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PosteriorSummary {
    pub positions: Vec<f64>,
    pub means: Vec<f64>,
    pub volatilities: Vec<f64>,
}

/// All draws of one successful sampling run, chain-major.
#[derive(Clone, Debug, PartialEq)]
pub struct PosteriorBatch {
    /// Length of the sampled return series.
    pub n: usize,
    pub samples: Vec<PosteriorSample>,
    pub diagnostics: SamplerDiagnostics,
}

impl PosteriorBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fraction of draws placing a change point at each sampled position,
    /// ascending by position. Every value lies in `(0, 1]`.
    pub fn position_frequencies(&self) -> Vec<(usize, f64)> {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for sample in &self.samples {
            for &position in &sample.positions {
                *counts.entry(position).or_default() += 1;
            }
        }
        let total = self.samples.len().max(1) as f64;
        counts
            .into_iter()
            .map(|(position, count)| (position, count as f64 / total))
            .collect()
    }

    pub fn summary(&self) -> PosteriorSummary {
        let Some(first) = self.samples.first() else {
            return PosteriorSummary {
                positions: vec![],
                means: vec![],
                volatilities: vec![],
            };
        };
        let total = self.samples.len() as f64;
        let mut positions = vec![0.0; first.positions.len()];
        let mut means = vec![0.0; first.means.len()];
        let mut volatilities = vec![0.0; first.volatilities.len()];
        for sample in &self.samples {
            for (acc, &p) in positions.iter_mut().zip(&sample.positions) {
                *acc += p as f64;
            }
            for (acc, &m) in means.iter_mut().zip(&sample.means) {
                *acc += m;
            }
            for (acc, &v) in volatilities.iter_mut().zip(&sample.volatilities) {
                *acc += v;
            }
        }
        for acc in positions
            .iter_mut()
            .chain(means.iter_mut())
            .chain(volatilities.iter_mut())
        {
            *acc /= total;
        }
        PosteriorSummary {
            positions,
            means,
            volatilities,
        }
    }
}

/// Metropolis-within-Gibbs sampler over change-point positions and segment
/// parameters.
///
/// Chains are independent, seeded from `(seed, chain)`, and collected in
/// chain order, so output does not depend on how many threads ran them.
#[derive(Clone, Debug)]
pub struct BayesianSampler {
    config: SamplerConfig,
}

impl BayesianSampler {
    pub fn new(config: SamplerConfig) -> Result<Self, CpxError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Samples with priors centred on the series' own mean and std.
    pub fn sample(
        &self,
        returns: &[f64],
        ctx: &ExecutionContext<'_>,
    ) -> Result<PosteriorBatch, CpxError> {
        validate_returns(returns)?;
        let priors = InformedPriors::from_returns(returns)?;
        self.sample_with_priors(returns, priors, ctx)
    }

    pub fn sample_with_priors(
        &self,
        returns: &[f64],
        priors: InformedPriors,
        ctx: &ExecutionContext<'_>,
    ) -> Result<PosteriorBatch, CpxError> {
        self.config.validate()?;
        let model = SegmentModel::new(
            returns,
            self.config.change_points,
            priors,
            self.config.dirichlet_alpha,
        )?;
        let started_at = Instant::now();
        let thread_count = self.thread_count();

        debug!(
            n = model.n(),
            change_points = self.config.change_points,
            chains = self.config.chains,
            draws = self.config.draws,
            warmup = self.config.warmup,
            seed = self.config.seed,
            thread_count,
            prior_mean = priors.mean,
            prior_std = priors.std,
            "starting bayesian sampler"
        );

        let abort = AtomicBool::new(false);
        let control = ChainControl::new(
            ctx,
            &abort,
            started_at,
            self.config.normalized_cancel_check_every(),
        );
        let outcomes = self.run_chains(&model, &control, thread_count)?;
        let chains = collect_chains(outcomes, self.config.chains)?;

        for (chain, outcome) in chains.iter().enumerate() {
            if outcome.acceptance_rate < self.config.min_acceptance_rate {
                return Err(CpxError::sampling_divergence(format!(
                    "chain {chain} acceptance rate {:.4} is below min_acceptance_rate={}",
                    outcome.acceptance_rate, self.config.min_acceptance_rate
                )));
            }
        }

        let rhat = parameter_rhats(&chains, model.mode());
        let max_rhat = rhat.iter().map(|r| r.value).reduce(f64::max);
        let (warnings, converged) =
            convergence_warnings(&rhat, self.config.rhat_threshold, self.config.draws);

        let acceptance_rates: Vec<f64> = chains.iter().map(|c| c.acceptance_rate).collect();
        let samples: Vec<PosteriorSample> =
            chains.into_iter().flat_map(|c| c.samples).collect();
        let runtime_ms = elapsed_ms(started_at);
        ctx.report_progress(1.0);

        info!(
            samples = samples.len(),
            converged,
            max_rhat = max_rhat.unwrap_or(f64::NAN),
            runtime_ms,
            "bayesian sampler finished"
        );

        Ok(PosteriorBatch {
            n: model.n(),
            samples,
            diagnostics: SamplerDiagnostics {
                mode: model.mode(),
                chains: self.config.chains,
                draws: self.config.draws,
                warmup: self.config.warmup,
                seed: self.config.seed,
                acceptance_rates,
                rhat,
                max_rhat,
                converged,
                warnings,
                runtime_ms,
                thread_count,
            },
        })
    }

    #[cfg(feature = "rayon")]
    fn thread_count(&self) -> usize {
        self.config
            .max_threads
            .unwrap_or_else(rayon::current_num_threads)
            .min(self.config.chains)
            .max(1)
    }

    #[cfg(not(feature = "rayon"))]
    fn thread_count(&self) -> usize {
        1
    }

    fn run_chains(
        &self,
        model: &SegmentModel<'_>,
        control: &ChainControl<'_>,
        thread_count: usize,
    ) -> Result<Vec<Result<ChainOutcome, ChainFailure>>, CpxError> {
        let run = |chain: usize| {
            let outcome = run_chain(model, &self.config, chain, control);
            if matches!(outcome, Err(ChainFailure::Failed(_))) {
                control.raise_abort();
            }
            outcome
        };

        #[cfg(feature = "rayon")]
        if thread_count > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(thread_count)
                .build()
                .map_err(|err| {
                    CpxError::resource_limit(format!("failed to build sampler thread pool: {err}"))
                })?;
            return Ok(pool.install(|| {
                (0..self.config.chains)
                    .into_par_iter()
                    .map(&run)
                    .collect::<Vec<_>>()
            }));
        }

        #[cfg(not(feature = "rayon"))]
        let _ = thread_count;

        Ok((0..self.config.chains).map(&run).collect())
    }
}

/// Keeps chain order and reports the first originating failure.
fn collect_chains(
    outcomes: Vec<Result<ChainOutcome, ChainFailure>>,
    expected: usize,
) -> Result<Vec<ChainOutcome>, CpxError> {
    let mut chains = Vec::with_capacity(expected);
    let mut first_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(chain) => chains.push(chain),
            Err(ChainFailure::Failed(err)) => {
                first_error.get_or_insert(err);
            }
            Err(ChainFailure::Aborted) => {}
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }
    if chains.len() != expected {
        return Err(CpxError::cancelled());
    }
    Ok(chains)
}

fn chain_traces(
    chains: &[ChainOutcome],
    select: impl Fn(&PosteriorSample) -> f64,
) -> Vec<Vec<f64>> {
    chains
        .iter()
        .map(|c| c.samples.iter().map(&select).collect())
        .collect()
}

/// Warnings for every parameter whose R-hat misses `threshold`, and whether
/// the run counts as converged. Too few draws to compute R-hat is itself a
/// warning.
fn convergence_warnings(
    rhat: &[ParameterRhat],
    threshold: f64,
    draws: usize,
) -> (Vec<String>, bool) {
    let mut warnings = vec![];
    for r in rhat {
        // NaN fails the comparison and is reported too.
        if !(r.value <= threshold) {
            warn!(
                parameter = %r.parameter,
                rhat = r.value,
                threshold,
                "sampler did not converge"
            );
            warnings.push(format!(
                "split R-hat for {} is {:.4} (threshold {threshold})",
                r.parameter, r.value
            ));
        }
    }
    if rhat.is_empty() {
        warn!(draws, "too few draws per chain for R-hat");
        warnings.push(format!("R-hat needs at least 4 draws per chain; got {draws}"));
    }
    let converged = !rhat.is_empty() && warnings.is_empty();
    (warnings, converged)
}

fn parameter_rhats(chains: &[ChainOutcome], mode: ModelMode) -> Vec<ParameterRhat> {
    let Some(first) = chains.first().and_then(|c| c.samples.first()) else {
        return vec![];
    };

    let mut out = vec![];
    let mut push = |parameter: String, traces: Vec<Vec<f64>>| {
        if let Some(value) = split_rhat(&traces) {
            out.push(ParameterRhat { parameter, value });
        }
    };
    for j in 0..first.positions.len() {
        push(
            format!("tau[{j}]"),
            chain_traces(chains, |s| s.positions[j] as f64),
        );
    }
    for j in 0..first.means.len() {
        push(format!("mu[{j}]"), chain_traces(chains, |s| s.means[j]));
    }
    for j in 0..first.volatilities.len() {
        let name = match mode {
            ModelMode::Single => "sigma".to_string(),
            ModelMode::Multi => format!("sigma[{j}]"),
        };
        push(name, chain_traces(chains, |s| s.volatilities[j]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{
        BayesianSampler, ParameterRhat, PosteriorBatch, PosteriorSample, collect_chains,
        convergence_warnings, parameter_rhats,
    };
    use crate::chain::{ChainFailure, ChainOutcome};
    use crate::config::SamplerConfig;
    use crate::model::ModelMode;
    use crate::sampler::SamplerDiagnostics;
    use cpx_core::{CancelToken, Constraints, CpxError, ExecutionContext};

    fn sample(positions: Vec<usize>) -> PosteriorSample {
        PosteriorSample {
            chain: 0,
            draw: 0,
            positions,
            means: vec![0.0, 1.0],
            volatilities: vec![2.0],
        }
    }

    fn batch(samples: Vec<PosteriorSample>) -> PosteriorBatch {
        PosteriorBatch {
            n: 100,
            samples,
            diagnostics: SamplerDiagnostics {
                mode: ModelMode::Single,
                chains: 1,
                draws: 4,
                warmup: 0,
                seed: 0,
                acceptance_rates: vec![0.5],
                rhat: vec![],
                max_rhat: None,
                converged: true,
                warnings: vec![],
                runtime_ms: 0,
                thread_count: 1,
            },
        }
    }

    #[test]
    fn frequencies_count_draws_per_position() {
        let batch = batch(vec![
            sample(vec![40]),
            sample(vec![41]),
            sample(vec![40]),
            sample(vec![40]),
        ]);
        assert_eq!(batch.position_frequencies(), vec![(40, 0.75), (41, 0.25)]);
        let summary = batch.summary();
        assert_eq!(summary.positions, vec![40.25]);
        assert_eq!(summary.means, vec![0.0, 1.0]);
        assert_eq!(summary.volatilities, vec![2.0]);
    }

    #[test]
    fn empty_batch_has_empty_summary() {
        let batch = batch(vec![]);
        assert!(batch.position_frequencies().is_empty());
        assert!(batch.summary().positions.is_empty());
    }

    #[test]
    fn first_failed_chain_wins_over_aborted_siblings() {
        let ok = ChainOutcome {
            samples: vec![],
            acceptance_rate: 0.5,
        };
        let outcomes = vec![
            Ok(ok.clone()),
            Err(ChainFailure::Aborted),
            Err(ChainFailure::Failed(CpxError::sampling_timeout("late"))),
            Err(ChainFailure::Failed(CpxError::cancelled())),
        ];
        let err = collect_chains(outcomes, 4).expect_err("failure must propagate");
        assert!(matches!(err, CpxError::SamplingTimeout(_)));

        let chains = collect_chains(vec![Ok(ok.clone()), Ok(ok)], 2).expect("all chains ran");
        assert_eq!(chains.len(), 2);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let err = BayesianSampler::new(SamplerConfig {
            chains: 0,
            ..SamplerConfig::default()
        })
        .expect_err("zero chains must fail");
        assert!(matches!(err, CpxError::InvalidInput(_)));
    }

    #[test]
    fn cancelled_context_stops_sampling() {
        let returns: Vec<f64> = (0..60).map(|i| (i as f64 * 0.9).sin() * 0.01).collect();
        let sampler = BayesianSampler::new(SamplerConfig {
            draws: 50,
            warmup: 50,
            ..SamplerConfig::default()
        })
        .expect("valid config");
        let constraints = Constraints::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = ExecutionContext::new(&constraints).with_cancel(&cancel);
        assert_eq!(sampler.sample(&returns, &ctx), Err(CpxError::Cancelled));
    }

    fn stuck_chain(position: usize, draws: usize) -> ChainOutcome {
        ChainOutcome {
            samples: (0..draws)
                .map(|draw| PosteriorSample {
                    chain: 0,
                    draw,
                    positions: vec![position],
                    means: vec![0.01 * (draw % 3) as f64, 0.02],
                    volatilities: vec![0.01 + 0.001 * (draw % 2) as f64],
                })
                .collect(),
            acceptance_rate: 0.3,
        }
    }

    #[test]
    fn chains_stuck_in_different_modes_are_flagged() {
        let chains = vec![stuck_chain(20, 10), stuck_chain(80, 10)];
        let rhat = parameter_rhats(&chains, ModelMode::Single);
        let names: Vec<&str> = rhat.iter().map(|r| r.parameter.as_str()).collect();
        assert_eq!(names, vec!["tau[0]", "mu[0]", "mu[1]", "sigma"]);
        assert!(rhat[0].value.is_infinite());

        let (warnings, converged) = convergence_warnings(&rhat, 1.01, 10);
        assert!(!converged);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("split R-hat for tau[0]"), "{warnings:?}");
    }

    #[test]
    fn agreeing_chains_converge_and_short_runs_do_not() {
        let rhat = vec![ParameterRhat {
            parameter: "mu[0]".to_string(),
            value: 1.004,
        }];
        assert_eq!(convergence_warnings(&rhat, 1.01, 500), (vec![], true));

        let nan = vec![ParameterRhat {
            parameter: "sigma".to_string(),
            value: f64::NAN,
        }];
        assert!(!convergence_warnings(&nan, 1.01, 500).1);

        let (warnings, converged) = convergence_warnings(&[], 1.01, 3);
        assert!(!converged);
        assert!(warnings[0].contains("at least 4 draws"));
    }
}
