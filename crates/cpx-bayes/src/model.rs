// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use cpx_core::CpxError;
use cpx_core::math::{ln_gamma, mean, sample_std};
use rand::Rng;
use rand_distr::{Dirichlet, Distribution, StandardNormal};
use std::f64::consts::PI;

/// Degrees of freedom of the Student-t observation model.
pub const LIKELIHOOD_DOF: f64 = 4.0;
/// Degrees of freedom of the half-Student-t volatility prior.
pub const VOLATILITY_PRIOR_DOF: f64 = 3.0;
const MIN_PRIOR_STD: f64 = 1e-8;
const POSITION_BAND: f64 = 0.1;
const SINGLE_MEAN_PRIOR_WIDTH: f64 = 2.0;
const INIT_JITTER: f64 = 0.1;
const MAX_INIT_ATTEMPTS: usize = 100;

/// Which prior structure the sampler runs.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelMode {
    /// One change point, uniform over the central 80% of the series,
    /// two means and a shared volatility.
    Single,
    /// `k` change points from Dirichlet segment proportions, with a mean and
    /// a volatility per segment.
    Multi,
}

/// Location and scale the priors are centred on, usually the return
/// series' own mean and standard deviation.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InformedPriors {
    pub mean: f64,
    pub std: f64,
}

impl InformedPriors {
    /// Validates the location and floors the scale at `1e-8`.
    pub fn new(mean: f64, std: f64) -> Result<Self, CpxError> {
        if !mean.is_finite() || !std.is_finite() || std < 0.0 {
            return Err(CpxError::invalid_input(format!(
                "informed priors need a finite mean and a finite non-negative std; \
                 got mean={mean}, std={std}"
            )));
        }
        Ok(Self {
            mean,
            std: std.max(MIN_PRIOR_STD),
        })
    }

    pub fn from_returns(values: &[f64]) -> Result<Self, CpxError> {
        Self::new(mean(values), sample_std(values))
    }
}

#[derive(Clone, Copy, Debug)]
struct StudentT {
    dof: f64,
    log_norm: f64,
}

impl StudentT {
    fn new(dof: f64) -> Self {
        let log_norm =
            ln_gamma(0.5 * (dof + 1.0)) - ln_gamma(0.5 * dof) - 0.5 * (dof * PI).ln();
        Self { dof, log_norm }
    }

    fn log_pdf(&self, x: f64, loc: f64, scale: f64) -> f64 {
        let z = (x - loc) / scale;
        self.log_norm - scale.ln() - 0.5 * (self.dof + 1.0) * (z * z / self.dof).ln_1p()
    }
}

fn normal_log_pdf(x: f64, loc: f64, scale: f64) -> f64 {
    let z = (x - loc) / scale;
    -0.5 * z * z - scale.ln() - 0.5 * (2.0 * PI).ln()
}

/// Latent state of one chain.
///
/// `positions` are strictly increasing return indices in `(0, n)`; segment `j`
/// covers `[positions[j - 1], positions[j])`. `volatilities` holds one shared
/// entry in single mode and one per segment in multi mode. `proportions` is
/// empty in single mode.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ChainState {
    pub positions: Vec<usize>,
    pub proportions: Vec<f64>,
    pub means: Vec<f64>,
    pub volatilities: Vec<f64>,
}

/// Piecewise-constant Student-t model over a return series.
#[derive(Clone, Debug)]
pub(crate) struct SegmentModel<'a> {
    returns: &'a [f64],
    mode: ModelMode,
    change_points: usize,
    priors: InformedPriors,
    mean_prior_scale: f64,
    dirichlet_alpha: f64,
    position_bounds: (usize, usize),
    likelihood: StudentT,
    volatility_prior: StudentT,
}

impl<'a> SegmentModel<'a> {
    pub fn new(
        returns: &'a [f64],
        change_points: usize,
        priors: InformedPriors,
        dirichlet_alpha: f64,
    ) -> Result<Self, CpxError> {
        validate_returns(returns)?;
        if change_points == 0 {
            return Err(CpxError::invalid_input(
                "segment model needs at least one change point",
            ));
        }
        let n = returns.len();
        let min_len = change_points.checked_add(1).ok_or_else(|| {
            CpxError::resource_limit("change_points + 1 overflows usize")
        })?;
        if n < min_len.max(2) {
            return Err(CpxError::insufficient_data(format!(
                "sampling {change_points} change point(s) needs at least {} returns; got {n}",
                min_len.max(2)
            )));
        }

        let mode = if change_points == 1 {
            ModelMode::Single
        } else {
            ModelMode::Multi
        };
        let position_bounds = match mode {
            ModelMode::Single => {
                let lo = ((POSITION_BAND * n as f64).floor() as usize).max(1);
                let hi = (((1.0 - POSITION_BAND) * n as f64).floor() as usize).min(n - 1);
                (lo.min(hi), hi)
            }
            ModelMode::Multi => (1, n - 1),
        };
        let mean_prior_scale = match mode {
            ModelMode::Single => SINGLE_MEAN_PRIOR_WIDTH * priors.std,
            ModelMode::Multi => priors.std,
        };

        Ok(Self {
            returns,
            mode,
            change_points,
            priors,
            mean_prior_scale,
            dirichlet_alpha,
            position_bounds,
            likelihood: StudentT::new(LIKELIHOOD_DOF),
            volatility_prior: StudentT::new(VOLATILITY_PRIOR_DOF),
        })
    }

    pub fn n(&self) -> usize {
        self.returns.len()
    }

    pub fn mode(&self) -> ModelMode {
        self.mode
    }

    pub fn change_points(&self) -> usize {
        self.change_points
    }

    pub fn segment_count(&self) -> usize {
        self.change_points + 1
    }

    pub fn priors(&self) -> InformedPriors {
        self.priors
    }

    /// Inclusive range of admissible single-mode positions.
    pub fn position_bounds(&self) -> (usize, usize) {
        self.position_bounds
    }

    pub fn volatility_index(&self, segment: usize) -> usize {
        match self.mode {
            ModelMode::Single => 0,
            ModelMode::Multi => segment,
        }
    }

    pub fn segment_range(&self, positions: &[usize], segment: usize) -> (usize, usize) {
        let start = if segment == 0 {
            0
        } else {
            positions[segment - 1]
        };
        let end = positions.get(segment).copied().unwrap_or(self.n());
        (start, end)
    }

    fn observation_log_lik(&self, x: f64, mean: f64, sigma: f64) -> f64 {
        self.likelihood.log_pdf(x, mean, sigma)
    }

    pub fn range_log_lik(&self, start: usize, end: usize, mean: f64, sigma: f64) -> f64 {
        self.returns[start..end]
            .iter()
            .map(|&x| self.observation_log_lik(x, mean, sigma))
            .sum()
    }

    pub fn log_likelihood(&self, state: &ChainState) -> f64 {
        (0..self.segment_count())
            .map(|segment| {
                let (start, end) = self.segment_range(&state.positions, segment);
                let sigma = state.volatilities[self.volatility_index(segment)];
                self.range_log_lik(start, end, state.means[segment], sigma)
            })
            .sum()
    }

    pub fn log_mean_prior(&self, mean: f64) -> f64 {
        normal_log_pdf(mean, self.priors.mean, self.mean_prior_scale)
    }

    pub fn log_volatility_prior(&self, sigma: f64) -> f64 {
        if sigma <= 0.0 {
            return f64::NEG_INFINITY;
        }
        std::f64::consts::LN_2 + self.volatility_prior.log_pdf(sigma, 0.0, self.priors.std)
    }

    /// Dirichlet log density up to its normalizing constant.
    pub fn log_proportion_prior(&self, proportions: &[f64]) -> f64 {
        if proportions.iter().any(|&p| p <= 0.0) {
            return f64::NEG_INFINITY;
        }
        (self.dirichlet_alpha - 1.0) * proportions.iter().map(|p| p.ln()).sum::<f64>()
    }

    pub fn log_prior(&self, state: &ChainState) -> f64 {
        let means: f64 = state.means.iter().map(|&m| self.log_mean_prior(m)).sum();
        let volatilities: f64 = state
            .volatilities
            .iter()
            .map(|&s| self.log_volatility_prior(s))
            .sum();
        let proportions = match self.mode {
            ModelMode::Single => 0.0,
            ModelMode::Multi => self.log_proportion_prior(&state.proportions),
        };
        means + volatilities + proportions
    }

    /// Segment boundaries `floor(n * cumsum(p))`, or `None` when a segment
    /// would be empty.
    pub fn boundaries_from_proportions(&self, proportions: &[f64]) -> Option<Vec<usize>> {
        let n = self.n();
        let mut boundaries = Vec::with_capacity(self.change_points);
        let mut cumulative = 0.0;
        let mut previous = 0usize;
        for &p in proportions.iter().take(self.change_points) {
            cumulative += p;
            let scaled = (n as f64 * cumulative).floor();
            if !scaled.is_finite() || scaled < 0.0 {
                return None;
            }
            let boundary = scaled as usize;
            if boundary <= previous || boundary >= n {
                return None;
            }
            boundaries.push(boundary);
            previous = boundary;
        }
        Some(boundaries)
    }

    /// Log-likelihood change from moving boundaries `old` to `new` with the
    /// segment parameters held fixed. Only observations whose segment changes
    /// are visited.
    pub fn reassignment_delta(&self, old: &[usize], new: &[usize], state: &ChainState) -> f64 {
        let mut lo = usize::MAX;
        let mut hi = 0usize;
        for (&a, &b) in old.iter().zip(new) {
            if a != b {
                lo = lo.min(a.min(b));
                hi = hi.max(a.max(b));
            }
        }
        if lo >= hi {
            return 0.0;
        }

        let mut delta = 0.0;
        for t in lo..hi {
            let before = old.partition_point(|&b| b <= t);
            let after = new.partition_point(|&b| b <= t);
            if before == after {
                continue;
            }
            let x = self.returns[t];
            delta += self.observation_log_lik(
                x,
                state.means[after],
                state.volatilities[self.volatility_index(after)],
            ) - self.observation_log_lik(
                x,
                state.means[before],
                state.volatilities[self.volatility_index(before)],
            );
        }
        delta
    }

    /// Overdispersed starting point: random boundaries, segment sample means
    /// and a jittered prior scale.
    pub fn initial_state<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ChainState, CpxError> {
        let (positions, proportions) = match self.mode {
            ModelMode::Single => {
                let (lo, hi) = self.position_bounds;
                (vec![rng.gen_range(lo..=hi)], vec![])
            }
            ModelMode::Multi => self.initial_partition(rng)?,
        };

        let s = self.priors.std;
        let means = (0..self.segment_count())
            .map(|segment| {
                let (start, end) = self.segment_range(&positions, segment);
                let z: f64 = rng.sample(StandardNormal);
                mean(&self.returns[start..end]) + INIT_JITTER * s * z
            })
            .collect();
        let volatility_count = match self.mode {
            ModelMode::Single => 1,
            ModelMode::Multi => self.segment_count(),
        };
        let volatilities = (0..volatility_count)
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                s * (INIT_JITTER * z).exp()
            })
            .collect();

        Ok(ChainState {
            positions,
            proportions,
            means,
            volatilities,
        })
    }

    fn initial_partition<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<(Vec<usize>, Vec<f64>), CpxError> {
        let dirichlet = Dirichlet::new_with_size(self.dirichlet_alpha, self.segment_count())
            .map_err(|err| {
                CpxError::invalid_input(format!("invalid Dirichlet prior: {err}"))
            })?;
        for _ in 0..MAX_INIT_ATTEMPTS {
            let proportions: Vec<f64> = dirichlet.sample(rng);
            if let Some(positions) = self.boundaries_from_proportions(&proportions) {
                return Ok((positions, proportions));
            }
        }

        // Equal proportions always give non-empty segments once n > k.
        let proportions = vec![1.0 / self.segment_count() as f64; self.segment_count()];
        let positions = self.boundaries_from_proportions(&proportions).ok_or_else(|| {
            CpxError::insufficient_data(format!(
                "cannot place {} boundaries in {} returns",
                self.change_points,
                self.n()
            ))
        })?;
        Ok((positions, proportions))
    }
}

pub(crate) fn validate_returns(returns: &[f64]) -> Result<(), CpxError> {
    if let Some((idx, value)) = returns.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(CpxError::invalid_input(format!(
            "return series contains a non-finite value at index {idx}: {value}"
        )));
    }
    Ok(())
}
