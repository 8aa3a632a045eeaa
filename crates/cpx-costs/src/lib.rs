// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod l2;
pub mod model;
pub mod normal;

pub use l2::{CostL2Mean, L2Cache};
pub use model::CostModel;
pub use normal::{CostNormalMeanVar, NormalCache};

/// Cost model selector used by configuration layers.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CostKind {
    /// Sum of squared deviations; detects mean shifts.
    #[default]
    L2,
    /// Gaussian mean and variance; detects volatility regimes too.
    Normal,
}

impl CostKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::L2 => "l2_mean",
            Self::Normal => "normal_mean_var",
        }
    }
}
