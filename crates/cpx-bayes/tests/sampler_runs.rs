// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use cpx_bayes::{BayesianSampler, ModelMode, SamplerConfig};
use cpx_core::{Constraints, CpxError, ExecutionContext};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

fn shifted_returns(levels: &[(usize, f64)], noise: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, noise).expect("valid noise scale");
    let mut out = vec![];
    for &(len, level) in levels {
        for _ in 0..len {
            out.push(level + normal.sample(&mut rng));
        }
    }
    out
}

fn quick_config() -> SamplerConfig {
    SamplerConfig {
        draws: 300,
        warmup: 300,
        chains: 2,
        ..SamplerConfig::default()
    }
}

fn run(config: SamplerConfig, returns: &[f64]) -> Result<cpx_bayes::PosteriorBatch, CpxError> {
    let constraints = Constraints::default();
    let ctx = ExecutionContext::new(&constraints);
    BayesianSampler::new(config)?.sample(returns, &ctx)
}

#[test]
fn same_seed_reproduces_samples_exactly() {
    let returns = shifted_returns(&[(60, 0.0), (60, 0.02)], 0.01, 1);
    let first = run(quick_config(), &returns).expect("sampling succeeds");
    let second = run(quick_config(), &returns).expect("sampling succeeds");
    assert_eq!(first.samples, second.samples);
    assert_eq!(first.summary(), second.summary());
    assert_eq!(
        first.diagnostics.acceptance_rates,
        second.diagnostics.acceptance_rates
    );
}

#[test]
fn thread_count_does_not_change_output() {
    let returns = shifted_returns(&[(50, 0.01), (50, -0.01)], 0.01, 2);
    let sequential = run(
        SamplerConfig {
            chains: 3,
            max_threads: Some(1),
            ..quick_config()
        },
        &returns,
    )
    .expect("sampling succeeds");
    let parallel = run(
        SamplerConfig {
            chains: 3,
            max_threads: Some(3),
            ..quick_config()
        },
        &returns,
    )
    .expect("sampling succeeds");
    assert_eq!(sequential.samples, parallel.samples);
    assert_eq!(sequential.diagnostics.thread_count, 1);
}

#[test]
fn different_seeds_give_different_draws() {
    let returns = shifted_returns(&[(60, 0.0), (60, 0.02)], 0.01, 3);
    let a = run(quick_config(), &returns).expect("sampling succeeds");
    let b = run(
        SamplerConfig {
            seed: 7,
            ..quick_config()
        },
        &returns,
    )
    .expect("sampling succeeds");
    assert_ne!(a.samples, b.samples);
}

#[test]
fn single_shift_is_recovered() {
    let returns = shifted_returns(&[(100, 0.0), (100, 0.02)], 0.01, 4);
    let batch = run(quick_config(), &returns).expect("sampling succeeds");

    assert_eq!(batch.n, 200);
    assert_eq!(batch.len(), 600);
    assert_eq!(batch.diagnostics.mode, ModelMode::Single);
    assert_eq!(batch.diagnostics.acceptance_rates.len(), 2);

    let frequencies = batch.position_frequencies();
    let total: f64 = frequencies.iter().map(|(_, f)| f).sum();
    assert!((total - 1.0).abs() < 1e-9);
    let (mode, probability) = frequencies
        .iter()
        .copied()
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
    assert!(mode.abs_diff(100) <= 3, "posterior mode at {mode}");
    assert!(probability > 0.2, "mode probability {probability}");

    let summary = batch.summary();
    assert!(summary.means[0].abs() < 0.005, "{:?}", summary.means);
    assert!((summary.means[1] - 0.02).abs() < 0.005, "{:?}", summary.means);
    assert!(summary.volatilities[0] > 0.0);
    assert_eq!(batch.diagnostics.rhat.len(), 4);
}

#[test]
fn positions_respect_the_central_band() {
    let returns = shifted_returns(&[(50, 0.0)], 0.01, 5);
    let batch = run(quick_config(), &returns).expect("sampling succeeds");
    for sample in &batch.samples {
        assert!((5..=45).contains(&sample.positions[0]));
    }
}

#[test]
fn multi_change_point_model_recovers_both_shifts() {
    let returns = shifted_returns(&[(70, 0.0), (70, 0.03), (70, -0.01)], 0.01, 6);
    let batch = run(
        SamplerConfig {
            change_points: 2,
            draws: 400,
            warmup: 600,
            ..quick_config()
        },
        &returns,
    )
    .expect("sampling succeeds");

    assert_eq!(batch.diagnostics.mode, ModelMode::Multi);
    for sample in &batch.samples {
        assert_eq!(sample.positions.len(), 2);
        assert!(sample.positions[0] > 0);
        assert!(sample.positions[0] < sample.positions[1]);
        assert!(sample.positions[1] < 210);
        assert_eq!(sample.volatilities.len(), 3);
    }
    let summary = batch.summary();
    assert!((summary.positions[0] - 70.0).abs() < 5.0, "{:?}", summary.positions);
    assert!((summary.positions[1] - 140.0).abs() < 5.0, "{:?}", summary.positions);
    assert!(
        batch
            .position_frequencies()
            .iter()
            .all(|&(_, f)| f > 0.0 && f <= 1.0)
    );
}

#[test]
fn acceptance_floor_reports_divergence() {
    let returns = shifted_returns(&[(40, 0.0), (40, 0.02)], 0.01, 7);
    let err = run(
        SamplerConfig {
            min_acceptance_rate: 0.99,
            ..quick_config()
        },
        &returns,
    )
    .expect_err("an unreachable acceptance floor must fail");
    assert!(matches!(err, CpxError::SamplingDivergence(_)), "{err:?}");
}

#[test]
fn time_budget_surfaces_sampling_timeout() {
    let returns = shifted_returns(&[(400, 0.0), (400, 0.02)], 0.01, 8);
    let constraints = Constraints {
        time_budget_ms: Some(1),
        ..Constraints::default()
    };
    let ctx = ExecutionContext::new(&constraints);
    let sampler = BayesianSampler::new(SamplerConfig {
        draws: 200_000,
        warmup: 0,
        cancel_check_every: 10,
        ..SamplerConfig::default()
    })
    .expect("valid config");
    let err = sampler
        .sample(&returns, &ctx)
        .expect_err("budget must expire");
    assert!(matches!(err, CpxError::SamplingTimeout(_)), "{err:?}");
}

#[test]
fn too_short_series_is_insufficient_data() {
    let err = run(
        SamplerConfig {
            change_points: 4,
            ..quick_config()
        },
        &[0.01, 0.02, 0.03],
    )
    .expect_err("three returns cannot hold four change points");
    assert!(matches!(err, CpxError::InsufficientData(_)));
}

#[test]
fn unconverged_runs_still_return_their_draws() {
    let returns = shifted_returns(&[(40, 0.0), (40, 0.02)], 0.01, 8);
    let batch = run(
        SamplerConfig {
            draws: 3,
            warmup: 0,
            chains: 2,
            min_acceptance_rate: 0.0,
            ..SamplerConfig::default()
        },
        &returns,
    )
    .expect("non-convergence is a warning, not an error");
    assert_eq!(batch.len(), 6);
    assert!(!batch.diagnostics.converged);
    assert!(batch.diagnostics.rhat.is_empty());
    assert!(batch.diagnostics.max_rhat.is_none());
    assert!(
        batch
            .diagnostics
            .warnings
            .iter()
            .any(|w| w.contains("R-hat")),
        "{:?}",
        batch.diagnostics.warnings
    );
}

#[test]
fn converged_run_reports_no_rhat_warnings() {
    let returns = shifted_returns(&[(100, 0.0), (100, 0.02)], 0.01, 4);
    let batch = run(quick_config(), &returns).expect("sampling succeeds");
    let flagged = batch
        .diagnostics
        .rhat
        .iter()
        .filter(|r| r.value > 1.01)
        .count();
    assert_eq!(batch.diagnostics.converged, flagged == 0);
    assert_eq!(batch.diagnostics.warnings.len(), flagged);
}
