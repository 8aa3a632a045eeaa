// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use chrono::NaiveDate;
use std::fmt;

/// Strategy that produced a change-point record.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetectionMethod {
    Bayesian,
    Cusum,
    Window,
    Pelt,
    #[cfg_attr(feature = "serde", serde(rename = "binseg"))]
    BinSeg,
}

impl DetectionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bayesian => "bayesian",
            Self::Cusum => "cusum",
            Self::Window => "window",
            Self::Pelt => "pelt",
            Self::BinSeg => "binseg",
        }
    }

    /// Whether the method's output is a posterior frequency rather than a fixed decision.
    pub fn is_probabilistic(self) -> bool {
        matches!(self, Self::Bayesian)
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dated, quantified change point.
///
/// `index` addresses the return series and always lies strictly inside `(0, n)`.
/// Means and volatilities are computed on log-returns split at `index`; prices
/// are segment means of the level series.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ChangePointRecord {
    pub index: usize,
    pub date: NaiveDate,
    /// Posterior frequency for Bayesian runs, 1.0 for deterministic strategies.
    pub probability: f64,
    /// Standardized shift `|mean_after - mean_before| / s` for deterministic
    /// strategies, equal to `probability` for Bayesian ones.
    pub confidence: f64,
    pub mean_before: f64,
    pub mean_after: f64,
    pub volatility_before: f64,
    pub volatility_after: f64,
    pub price_before: f64,
    pub price_after: f64,
    pub pct_change: f64,
    pub method: DetectionMethod,
}

/// `(after / before - 1) * 100`, or 0 when `before` is zero.
pub fn pct_change(before: f64, after: f64) -> f64 {
    if before == 0.0 {
        return 0.0;
    }
    (after / before - 1.0) * 100.0
}

#[cfg(test)]
mod tests {
    use super::{DetectionMethod, pct_change};

    #[test]
    fn pct_change_handles_doubling_and_zero_base() {
        assert_eq!(pct_change(50.0, 100.0), 100.0);
        assert_eq!(pct_change(100.0, 75.0), -25.0);
        assert_eq!(pct_change(0.0, 10.0), 0.0);
    }

    #[test]
    fn method_names_are_snake_case() {
        assert_eq!(DetectionMethod::BinSeg.to_string(), "binseg");
        assert!(DetectionMethod::Bayesian.is_probabilistic());
        assert!(!DetectionMethod::Pelt.is_probabilistic());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn method_serializes_as_snake_case() {
        let encoded =
            serde_json::to_string(&DetectionMethod::BinSeg).expect("method should serialize");
        assert_eq!(encoded, "\"binseg\"");
    }
}
