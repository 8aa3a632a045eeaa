// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::CpxError;

/// Per-change penalty used by penalized stopping rules.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum Penalty {
    /// `params_per_segment * ln(n)`.
    BIC,
    /// `2 * params_per_segment`.
    AIC,
    Manual(f64),
}

/// Stopping rule for strategies that can add an arbitrary number of splits.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum Stopping {
    Penalized(Penalty),
    KnownK(usize),
}

impl Default for Stopping {
    fn default() -> Self {
        Self::Penalized(Penalty::BIC)
    }
}

pub fn validate_penalty(penalty: &Penalty) -> Result<(), CpxError> {
    if let Penalty::Manual(beta) = penalty
        && (!beta.is_finite() || *beta <= 0.0)
    {
        return Err(CpxError::invalid_input(format!(
            "Penalty::Manual requires a finite value > 0.0; got {beta}"
        )));
    }
    Ok(())
}

pub fn validate_stopping(stopping: &Stopping) -> Result<(), CpxError> {
    match stopping {
        Stopping::Penalized(penalty) => validate_penalty(penalty),
        Stopping::KnownK(0) => Err(CpxError::invalid_input(
            "Stopping::KnownK requires k >= 1; got 0",
        )),
        Stopping::KnownK(_) => Ok(()),
    }
}

/// Resolves `penalty` to a concrete per-change cost for a series of length `n`.
pub fn penalty_value(
    penalty: &Penalty,
    n: usize,
    params_per_segment: usize,
) -> Result<f64, CpxError> {
    validate_penalty(penalty)?;
    if params_per_segment == 0 {
        return Err(CpxError::invalid_input(
            "params_per_segment must be >= 1; got 0",
        ));
    }

    let p = params_per_segment as f64;
    let beta = match penalty {
        Penalty::BIC => {
            if n < 2 {
                return Err(CpxError::insufficient_data(format!(
                    "BIC penalty requires n >= 2; got n={n}"
                )));
            }
            p * (n as f64).ln()
        }
        Penalty::AIC => 2.0 * p,
        Penalty::Manual(beta) => *beta,
    };
    Ok(beta)
}

#[cfg(test)]
mod tests {
    use super::{Penalty, Stopping, penalty_value, validate_stopping};

    #[test]
    fn bic_and_aic_values() {
        let bic = penalty_value(&Penalty::BIC, 100, 2).expect("bic should resolve");
        assert!((bic - 2.0 * 100f64.ln()).abs() < 1e-12);
        let aic = penalty_value(&Penalty::AIC, 100, 3).expect("aic should resolve");
        assert_eq!(aic, 6.0);
        let manual = penalty_value(&Penalty::Manual(4.5), 10, 1).expect("manual should resolve");
        assert_eq!(manual, 4.5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(penalty_value(&Penalty::Manual(0.0), 10, 1).is_err());
        assert!(penalty_value(&Penalty::Manual(f64::NAN), 10, 1).is_err());
        assert!(penalty_value(&Penalty::BIC, 1, 2).is_err());
        assert!(penalty_value(&Penalty::AIC, 10, 0).is_err());
        assert!(validate_stopping(&Stopping::KnownK(0)).is_err());
        assert!(validate_stopping(&Stopping::KnownK(2)).is_ok());
    }

    #[test]
    fn default_stopping_is_bic() {
        assert_eq!(Stopping::default(), Stopping::Penalized(Penalty::BIC));
    }
}
