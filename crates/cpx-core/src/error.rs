// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use thiserror::Error;

/// Error taxonomy shared by every stage of the detection and correlation engine.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CpxError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid window: {0}")]
    InvalidWindow(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("numerical issue: {0}")]
    NumericalIssue(String),
    #[error("sampling divergence: {0}")]
    SamplingDivergence(String),
    #[error("sampling timeout: {0}")]
    SamplingTimeout(String),
    #[error("no change points found: {0}")]
    NoChangePointsFound(String),
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
    #[error("cancelled")]
    Cancelled,
}

impl CpxError {
    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    pub fn invalid_window(msg: impl Into<String>) -> Self {
        Self::InvalidWindow(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn numerical_issue(msg: impl Into<String>) -> Self {
        Self::NumericalIssue(msg.into())
    }

    pub fn sampling_divergence(msg: impl Into<String>) -> Self {
        Self::SamplingDivergence(msg.into())
    }

    pub fn sampling_timeout(msg: impl Into<String>) -> Self {
        Self::SamplingTimeout(msg.into())
    }

    pub fn no_change_points_found(msg: impl Into<String>) -> Self {
        Self::NoChangePointsFound(msg.into())
    }

    pub fn resource_limit(msg: impl Into<String>) -> Self {
        Self::ResourceLimit(msg.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    /// Stable machine-readable identifier, used in structured error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientData(_) => "insufficient_data",
            Self::InvalidWindow(_) => "invalid_window",
            Self::InvalidInput(_) => "invalid_input",
            Self::NumericalIssue(_) => "numerical_issue",
            Self::SamplingDivergence(_) => "sampling_divergence",
            Self::SamplingTimeout(_) => "sampling_timeout",
            Self::NoChangePointsFound(_) => "no_change_points_found",
            Self::ResourceLimit(_) => "resource_limit",
            Self::Cancelled => "cancelled",
        }
    }
}
