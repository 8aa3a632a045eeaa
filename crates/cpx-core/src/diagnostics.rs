// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::time::Instant;

/// How many split candidates a pruning strategy looked at and discarded.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PruningStats {
    pub candidates_considered: usize,
    pub candidates_pruned: usize,
}

/// Run metadata attached to every detection result.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    /// Length of the signal the strategy saw.
    pub n: usize,
    pub runtime_ms: Option<u64>,
    /// Per-change penalty in cost units, for penalized strategies.
    pub penalty: Option<f64>,
    pub notes: Vec<String>,
    pub warnings: Vec<String>,
    pub algorithm: Cow<'static, str>,
    pub cost_model: Cow<'static, str>,
    pub seed: Option<u64>,
    pub thread_count: Option<usize>,
    pub pruning_stats: Option<PruningStats>,
}

impl Diagnostics {
    /// Diagnostics for `algorithm` over `n` points with every optional field unset.
    pub fn for_algorithm(algorithm: &'static str, cost_model: &'static str, n: usize) -> Self {
        Self {
            n,
            algorithm: Cow::Borrowed(algorithm),
            cost_model: Cow::Borrowed(cost_model),
            ..Self::default()
        }
    }
}

/// Milliseconds since `started_at`, saturating at `u64::MAX`.
pub fn elapsed_ms(started_at: Instant) -> u64 {
    started_at
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{Diagnostics, PruningStats, elapsed_ms};
    use std::time::{Duration, Instant};

    #[test]
    fn for_algorithm_leaves_optional_fields_empty() {
        let diagnostics = Diagnostics::for_algorithm("cusum", "none", 90);
        assert_eq!(diagnostics.n, 90);
        assert_eq!(diagnostics.algorithm, "cusum");
        assert_eq!(diagnostics.cost_model, "none");
        assert!(diagnostics.penalty.is_none() && diagnostics.runtime_ms.is_none());
        assert!(diagnostics.notes.is_empty() && diagnostics.warnings.is_empty());
    }

    #[test]
    fn elapsed_ms_counts_from_the_start_instant() {
        let started = Instant::now()
            .checked_sub(Duration::from_millis(15))
            .expect("earlier instant");
        assert!(elapsed_ms(started) >= 15);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serialized_form_keeps_penalty_and_pruning() {
        let diagnostics = Diagnostics {
            runtime_ms: Some(12),
            penalty: Some(0.42),
            notes: vec!["signal=log_price".to_string()],
            pruning_stats: Some(PruningStats {
                candidates_considered: 900,
                candidates_pruned: 610,
            }),
            ..Diagnostics::for_algorithm("pelt", "l2_mean", 250)
        };
        let value = serde_json::to_value(&diagnostics).expect("diagnostics serialize");
        assert_eq!(value["penalty"], 0.42);
        assert_eq!(value["pruning_stats"]["candidates_pruned"], 610);

        let decoded: Diagnostics =
            serde_json::from_value(value).expect("diagnostics deserialize");
        assert_eq!(decoded, diagnostics);

        let sparse: Diagnostics =
            serde_json::from_str(r#"{"n": 3, "algorithm": "window"}"#).expect("defaults fill in");
        assert_eq!(sparse.algorithm, "window");
        assert!(sparse.seed.is_none());
    }
}
