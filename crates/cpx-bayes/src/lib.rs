// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Bayesian change-point sampler.
//!
//! Returns are modelled as Student-t draws whose location and scale are
//! constant within segments. A Metropolis-within-Gibbs sampler explores the
//! change-point positions and segment parameters over independent chains,
//! which run on a rayon pool when the `rayon` feature is enabled. Convergence
//! is summarized with split-chain R-hat.

mod chain;
pub mod config;
pub mod model;
pub mod rhat;
pub mod sampler;

pub use config::SamplerConfig;
pub use model::{InformedPriors, LIKELIHOOD_DOF, ModelMode, VOLATILITY_PRIOR_DOF};
pub use rhat::split_rhat;
pub use sampler::{
    BayesianSampler, ParameterRhat, PosteriorBatch, PosteriorSample, PosteriorSummary,
    SamplerDiagnostics,
};
