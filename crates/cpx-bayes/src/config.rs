// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use cpx_core::CpxError;

const DEFAULT_DRAWS: usize = 1000;
const DEFAULT_CHAINS: usize = 4;
const DEFAULT_WARMUP: usize = 500;
const DEFAULT_SEED: u64 = 42;
const DEFAULT_MIN_ACCEPTANCE_RATE: f64 = 0.05;
const DEFAULT_RHAT_THRESHOLD: f64 = 1.01;
const DEFAULT_POSITION_STEP: usize = 5;
const DEFAULT_DIRICHLET_ALPHA: f64 = 1.0;
const DEFAULT_CANCEL_CHECK_EVERY: usize = 50;

/// Configuration for [`crate::BayesianSampler`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerConfig {
    /// Number of change points in the model; 1 selects the single-shift model.
    pub change_points: usize,
    /// Post-warmup draws kept per chain.
    pub draws: usize,
    pub chains: usize,
    /// Tuning iterations discarded at the start of each chain.
    pub warmup: usize,
    pub seed: u64,
    /// Runs whose overall post-warmup acceptance falls below this fail.
    pub min_acceptance_rate: f64,
    pub rhat_threshold: f64,
    /// Largest jump of a local position move.
    pub position_step: usize,
    /// Concentration of the symmetric Dirichlet prior on segment proportions.
    pub dirichlet_alpha: f64,
    /// Upper bound on worker threads; `None` uses the global rayon pool size.
    pub max_threads: Option<usize>,
    /// Iterations between cancellation and timeout polls.
    pub cancel_check_every: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            change_points: 1,
            draws: DEFAULT_DRAWS,
            chains: DEFAULT_CHAINS,
            warmup: DEFAULT_WARMUP,
            seed: DEFAULT_SEED,
            min_acceptance_rate: DEFAULT_MIN_ACCEPTANCE_RATE,
            rhat_threshold: DEFAULT_RHAT_THRESHOLD,
            position_step: DEFAULT_POSITION_STEP,
            dirichlet_alpha: DEFAULT_DIRICHLET_ALPHA,
            max_threads: None,
            cancel_check_every: DEFAULT_CANCEL_CHECK_EVERY,
        }
    }
}

impl SamplerConfig {
    pub(crate) fn validate(&self) -> Result<(), CpxError> {
        if self.change_points == 0 {
            return Err(CpxError::invalid_input(
                "SamplerConfig.change_points must be >= 1; got 0",
            ));
        }
        if self.draws == 0 {
            return Err(CpxError::invalid_input(
                "SamplerConfig.draws must be >= 1; got 0",
            ));
        }
        if self.chains == 0 {
            return Err(CpxError::invalid_input(
                "SamplerConfig.chains must be >= 1; got 0",
            ));
        }
        if !self.min_acceptance_rate.is_finite() || !(0.0..=1.0).contains(&self.min_acceptance_rate)
        {
            return Err(CpxError::invalid_input(format!(
                "SamplerConfig.min_acceptance_rate must be within [0, 1]; got {}",
                self.min_acceptance_rate
            )));
        }
        if !self.rhat_threshold.is_finite() || self.rhat_threshold < 1.0 {
            return Err(CpxError::invalid_input(format!(
                "SamplerConfig.rhat_threshold must be finite and >= 1.0; got {}",
                self.rhat_threshold
            )));
        }
        if self.position_step == 0 {
            return Err(CpxError::invalid_input(
                "SamplerConfig.position_step must be >= 1; got 0",
            ));
        }
        if !self.dirichlet_alpha.is_finite() || self.dirichlet_alpha <= 0.0 {
            return Err(CpxError::invalid_input(format!(
                "SamplerConfig.dirichlet_alpha must be finite and > 0.0; got {}",
                self.dirichlet_alpha
            )));
        }
        if self.max_threads == Some(0) {
            return Err(CpxError::invalid_input(
                "SamplerConfig.max_threads must be >= 1 when set; got 0",
            ));
        }
        self.total_iterations()?;
        Ok(())
    }

    pub(crate) fn normalized_cancel_check_every(&self) -> usize {
        self.cancel_check_every.max(1)
    }

    pub(crate) fn total_iterations(&self) -> Result<usize, CpxError> {
        self.warmup.checked_add(self.draws).ok_or_else(|| {
            CpxError::resource_limit(format!(
                "SamplerConfig warmup + draws overflows: warmup={}, draws={}",
                self.warmup, self.draws
            ))
        })
    }
}
