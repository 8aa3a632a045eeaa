// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::CpxError;

const DEFAULT_MIN_SEGMENT_LEN: usize = 2;
const DEFAULT_JUMP: usize = 1;

/// User-facing search constraints shared by every offline strategy.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct Constraints {
    pub min_segment_len: usize,
    pub max_change_points: Option<usize>,
    pub jump: usize,
    pub candidate_splits: Option<Vec<usize>>,
    pub max_cost_evals: Option<usize>,
    pub time_budget_ms: Option<u64>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            min_segment_len: DEFAULT_MIN_SEGMENT_LEN,
            max_change_points: None,
            jump: DEFAULT_JUMP,
            candidate_splits: None,
            max_cost_evals: None,
            time_budget_ms: None,
        }
    }
}

/// Constraints checked against a concrete series length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedConstraints {
    pub n: usize,
    pub min_segment_len: usize,
    pub max_change_points: Option<usize>,
    /// Admissible split positions in `(0, n)`, ascending and unique.
    pub effective_candidates: Vec<usize>,
}

/// Validates `constraints` for a series of length `n` and resolves the
/// admissible split set.
pub fn validate_constraints(
    constraints: &Constraints,
    n: usize,
) -> Result<ValidatedConstraints, CpxError> {
    if n == 0 {
        return Err(CpxError::insufficient_data(
            "series must contain at least one observation",
        ));
    }
    if constraints.min_segment_len == 0 {
        return Err(CpxError::invalid_input(
            "constraints.min_segment_len must be >= 1; got 0",
        ));
    }
    if constraints.jump == 0 {
        return Err(CpxError::invalid_input(
            "constraints.jump must be >= 1; got 0",
        ));
    }
    if let Some(limit) = constraints.max_cost_evals
        && limit == 0
    {
        return Err(CpxError::invalid_input(
            "constraints.max_cost_evals must be >= 1 when set; got 0",
        ));
    }

    let min_segment_len = constraints.min_segment_len;
    let admissible =
        |split: usize| split >= min_segment_len && n.saturating_sub(split) >= min_segment_len;

    let effective_candidates = match &constraints.candidate_splits {
        Some(explicit) => {
            let mut previous = None;
            let mut out = Vec::with_capacity(explicit.len());
            for &split in explicit {
                if split == 0 || split >= n {
                    return Err(CpxError::invalid_input(format!(
                        "constraints.candidate_splits must lie in (0, {n}); got {split}"
                    )));
                }
                if let Some(prev) = previous
                    && split <= prev
                {
                    return Err(CpxError::invalid_input(format!(
                        "constraints.candidate_splits must be strictly increasing; \
                         got {prev} then {split}"
                    )));
                }
                previous = Some(split);
                if admissible(split) && split.is_multiple_of(constraints.jump) {
                    out.push(split);
                }
            }
            out
        }
        None => (1..n)
            .filter(|&split| split.is_multiple_of(constraints.jump) && admissible(split))
            .collect(),
    };

    Ok(ValidatedConstraints {
        n,
        min_segment_len,
        max_change_points: constraints.max_change_points,
        effective_candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::{Constraints, validate_constraints};
    use crate::CpxError;

    #[test]
    fn defaults_allow_every_interior_split_with_min_len_two() {
        let validated =
            validate_constraints(&Constraints::default(), 6).expect("defaults should validate");
        assert_eq!(validated.effective_candidates, vec![2, 3, 4]);
        assert_eq!(validated.min_segment_len, 2);
        assert!(validated.max_change_points.is_none());
    }

    #[test]
    fn jump_filters_candidates() {
        let constraints = Constraints {
            min_segment_len: 1,
            jump: 3,
            ..Constraints::default()
        };
        let validated = validate_constraints(&constraints, 10).expect("should validate");
        assert_eq!(validated.effective_candidates, vec![3, 6, 9]);
    }

    #[test]
    fn explicit_candidates_are_checked_and_filtered() {
        let constraints = Constraints {
            min_segment_len: 2,
            candidate_splits: Some(vec![1, 4, 7]),
            ..Constraints::default()
        };
        let validated = validate_constraints(&constraints, 8).expect("should validate");
        assert_eq!(validated.effective_candidates, vec![4]);

        let unsorted = Constraints {
            candidate_splits: Some(vec![4, 3]),
            ..Constraints::default()
        };
        let err = validate_constraints(&unsorted, 8).expect_err("unsorted must fail");
        assert!(matches!(err, CpxError::InvalidInput(_)));

        let out_of_range = Constraints {
            candidate_splits: Some(vec![8]),
            ..Constraints::default()
        };
        assert!(validate_constraints(&out_of_range, 8).is_err());
    }

    #[test]
    fn zero_values_are_rejected() {
        let zero_len = Constraints {
            min_segment_len: 0,
            ..Constraints::default()
        };
        assert!(validate_constraints(&zero_len, 8).is_err());

        let zero_jump = Constraints {
            jump: 0,
            ..Constraints::default()
        };
        assert!(validate_constraints(&zero_jump, 8).is_err());

        let err = validate_constraints(&Constraints::default(), 0).expect_err("n=0 must fail");
        assert!(matches!(err, CpxError::InsufficientData(_)));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn constraints_deserialize_with_partial_fields() {
        let decoded: Constraints = serde_json::from_str(r#"{"max_change_points": 3}"#)
            .expect("partial constraints should deserialize");
        assert_eq!(decoded.max_change_points, Some(3));
        assert_eq!(decoded.min_segment_len, 2);
    }
}
