// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::{Constraints, CpxError, Diagnostics, ExecutionContext};

/// Segmentation output of an offline strategy.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct OfflineChangePointResult {
    /// Segment end positions, strictly increasing, last element equals `n`.
    pub breakpoints: Vec<usize>,
    /// Breakpoints without the terminal `n`.
    pub change_points: Vec<usize>,
    pub diagnostics: Diagnostics,
}

impl OfflineChangePointResult {
    pub fn new(
        n: usize,
        breakpoints: Vec<usize>,
        diagnostics: Diagnostics,
    ) -> Result<Self, CpxError> {
        validate_breakpoints(n, &breakpoints)?;
        let change_points = breakpoints[..breakpoints.len() - 1].to_vec();
        Ok(Self {
            breakpoints,
            change_points,
            diagnostics,
        })
    }

    /// Result with no interior split.
    pub fn empty(n: usize, diagnostics: Diagnostics) -> Result<Self, CpxError> {
        Self::new(n, vec![n], diagnostics)
    }
}

/// Checks breakpoint structure: non-empty, strictly increasing, inside `(0, n]`, ending at `n`.
pub fn validate_breakpoints(n: usize, breakpoints: &[usize]) -> Result<(), CpxError> {
    let Some(&last) = breakpoints.last() else {
        return Err(CpxError::invalid_input(
            "breakpoints must contain at least the terminal index n",
        ));
    };
    if last != n {
        return Err(CpxError::invalid_input(format!(
            "last breakpoint must equal n={n}; got {last}"
        )));
    }
    let mut previous = 0usize;
    for &bp in breakpoints {
        if bp <= previous {
            return Err(CpxError::invalid_input(format!(
                "breakpoints must be strictly increasing and > 0; got {breakpoints:?}"
            )));
        }
        previous = bp;
    }
    Ok(())
}

/// Offline detector contract: full signal in, full segmentation out.
pub trait OfflineDetector {
    fn detect(
        &self,
        x: &[f64],
        ctx: &ExecutionContext<'_>,
    ) -> Result<OfflineChangePointResult, CpxError>;

    /// Convenience wrapper returning only the ascending change-point indices.
    fn detect_indices(
        &self,
        x: &[f64],
        max_change_points: Option<usize>,
    ) -> Result<Vec<usize>, CpxError> {
        let constraints = Constraints {
            max_change_points,
            ..Constraints::default()
        };
        let ctx = ExecutionContext::new(&constraints);
        Ok(self.detect(x, &ctx)?.change_points)
    }
}

#[cfg(test)]
mod tests {
    use super::{OfflineChangePointResult, OfflineDetector, validate_breakpoints};
    use crate::{CpxError, Diagnostics, ExecutionContext};

    struct Midpoint;

    impl OfflineDetector for Midpoint {
        fn detect(
            &self,
            x: &[f64],
            ctx: &ExecutionContext<'_>,
        ) -> Result<OfflineChangePointResult, CpxError> {
            let n = x.len();
            let breakpoints = match ctx.constraints.max_change_points {
                Some(0) => vec![n],
                _ => vec![n / 2, n],
            };
            OfflineChangePointResult::new(n, breakpoints, Diagnostics::default())
        }
    }

    #[test]
    fn new_splits_terminal_breakpoint_off() {
        let result = OfflineChangePointResult::new(10, vec![3, 7, 10], Diagnostics::default())
            .expect("valid breakpoints");
        assert_eq!(result.change_points, vec![3, 7]);
        let empty = OfflineChangePointResult::empty(10, Diagnostics::default())
            .expect("empty result should build");
        assert!(empty.change_points.is_empty());
        assert_eq!(empty.breakpoints, vec![10]);
    }

    #[test]
    fn invalid_breakpoints_are_rejected() {
        assert!(validate_breakpoints(10, &[]).is_err());
        assert!(validate_breakpoints(10, &[5, 9]).is_err());
        assert!(validate_breakpoints(10, &[5, 5, 10]).is_err());
        assert!(validate_breakpoints(10, &[0, 10]).is_err());
        assert!(validate_breakpoints(10, &[10]).is_ok());
    }

    #[test]
    fn detect_indices_threads_max_change_points_through_constraints() {
        let x = vec![0.0; 8];
        assert_eq!(
            Midpoint.detect_indices(&x, None).expect("detect should succeed"),
            vec![4]
        );
        assert!(
            Midpoint
                .detect_indices(&x, Some(0))
                .expect("detect should succeed")
                .is_empty()
        );
    }
}
