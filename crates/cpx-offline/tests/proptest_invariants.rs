// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use cpx_core::{
    Constraints, CpxError, ExecutionContext, OfflineDetector, Penalty, Stopping,
    validate_breakpoints,
};
use cpx_costs::{CostL2Mean, CostNormalMeanVar};
use cpx_offline::{
    BinSeg, BinSegConfig, Cusum, CusumConfig, Pelt, PeltConfig, SlidingWindow,
    SlidingWindowConfig,
};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

const MIN_PROPTEST_CASES: u32 = 1000;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

fn detectors() -> Vec<(&'static str, Box<dyn OfflineDetector>)> {
    let window = SlidingWindowConfig {
        window_width: 3,
        ..SlidingWindowConfig::default()
    };
    let mut out: Vec<(&'static str, Box<dyn OfflineDetector>)> = Vec::with_capacity(5);
    out.push((
        "pelt_l2",
        Box::new(Pelt::new(CostL2Mean::new(), PeltConfig::default()).expect("valid")),
    ));
    out.push((
        "pelt_normal",
        Box::new(Pelt::new(CostNormalMeanVar::new(), PeltConfig::default()).expect("valid")),
    ));
    out.push((
        "binseg_l2",
        Box::new(BinSeg::new(CostL2Mean::new(), BinSegConfig::default()).expect("valid")),
    ));
    out.push((
        "cusum",
        Box::new(Cusum::new(CusumConfig::default()).expect("valid")),
    ));
    out.push((
        "window",
        Box::new(SlidingWindow::new(window).expect("valid")),
    ));
    out
}

fn assert_well_formed(name: &str, n: usize, change_points: &[usize]) -> Result<(), TestCaseError> {
    for pair in change_points.windows(2) {
        prop_assert!(pair[0] < pair[1], "{name}: not strictly increasing {change_points:?}");
    }
    for &cp in change_points {
        prop_assert!(cp > 0 && cp < n, "{name}: split {cp} outside (0, {n})");
    }
    Ok(())
}

fn squared_deviations(segment: &[f64]) -> f64 {
    let mean = segment.iter().sum::<f64>() / segment.len() as f64;
    segment.iter().map(|v| (v - mean).powi(2)).sum()
}

fn penalized_l2(values: &[f64], breakpoints: &[usize], beta: f64) -> f64 {
    let mut start = 0;
    let mut total = beta * breakpoints.len().saturating_sub(1) as f64;
    for &end in breakpoints {
        total += squared_deviations(&values[start..end]);
        start = end;
    }
    total
}

/// Cheapest penalized L2 objective over every segmentation of `values[start..]`
/// with segments of at least `min_len` and at most `changes_left` changes.
fn exhaustive_best(
    values: &[f64],
    start: usize,
    min_len: usize,
    changes_left: usize,
    beta: f64,
) -> f64 {
    let n = values.len();
    let mut best = squared_deviations(&values[start..]);
    if changes_left == 0 {
        return best;
    }
    for split in start + min_len..=n.saturating_sub(min_len) {
        let tail = exhaustive_best(values, split, min_len, changes_left - 1, beta);
        best = best.min(squared_deviations(&values[start..split]) + beta + tail);
    }
    best
}

fn signal_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-10.0f64..10.0, 8..120)
}

fn piecewise_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec((4usize..30, -5.0f64..5.0), 1..5).prop_flat_map(|segments| {
        let n: usize = segments.iter().map(|(len, _)| len).sum();
        (Just(segments), prop::collection::vec(-0.5f64..0.5, n)).prop_map(|(segments, noise)| {
            let mut out = Vec::with_capacity(noise.len());
            for (len, level) in segments {
                for _ in 0..len {
                    out.push(level + noise[out.len()]);
                }
            }
            out
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        max_shrink_iters: 1024,
        failure_persistence: Some(Box::new(FileFailurePersistence::Direct(
            "proptest-regressions/tests/proptest_invariants.txt",
        ))),
        .. ProptestConfig::default()
    })]

    #[test]
    fn change_points_are_sorted_unique_and_interior(values in signal_strategy()) {
        let n = values.len();
        let constraints = Constraints::default();
        let ctx = ExecutionContext::new(&constraints);
        for (name, detector) in detectors() {
            let result = detector.detect(&values, &ctx);
            let result = match result {
                Ok(result) => result,
                Err(CpxError::InvalidWindow(_)) if name == "window" => continue,
                Err(err) => return Err(TestCaseError::fail(format!("{name} failed: {err}"))),
            };
            prop_assert!(validate_breakpoints(n, &result.breakpoints).is_ok());
            let interior = &result.breakpoints[..result.breakpoints.len() - 1];
            prop_assert_eq!(interior, &result.change_points[..]);
            assert_well_formed(name, n, &result.change_points)?;
        }
    }

    #[test]
    fn repeated_detection_is_identical(values in piecewise_strategy()) {
        let constraints = Constraints::default();
        let ctx = ExecutionContext::new(&constraints);
        for (name, detector) in detectors() {
            let first = detector.detect(&values, &ctx).map(|r| r.change_points);
            let second = detector.detect(&values, &ctx).map(|r| r.change_points);
            prop_assert_eq!(first, second, "{} is not idempotent", name);
        }
    }

    #[test]
    fn constant_signal_never_splits(level in -1e3f64..1e3, n in 8usize..200) {
        let values = vec![level; n];
        let constraints = Constraints::default();
        let ctx = ExecutionContext::new(&constraints);
        for (name, detector) in detectors() {
            match detector.detect(&values, &ctx) {
                Ok(result) => prop_assert!(
                    result.change_points.is_empty(),
                    "{} split a constant signal",
                    name
                ),
                Err(CpxError::InvalidWindow(_)) if name == "window" => {}
                Err(err) => return Err(TestCaseError::fail(format!("{name} failed: {err}"))),
            }
        }
    }

    #[test]
    fn segments_respect_min_segment_len(
        values in piecewise_strategy(),
        min_segment_len in 1usize..6,
    ) {
        let n = values.len();
        let constraints = Constraints { min_segment_len, ..Constraints::default() };
        let ctx = ExecutionContext::new(&constraints);
        let stopping = Stopping::Penalized(Penalty::Manual(0.05));
        let pelt = Pelt::new(
            CostL2Mean::new(),
            PeltConfig { stopping: stopping.clone(), ..PeltConfig::default() },
        ).expect("valid");
        let binseg = BinSeg::new(
            CostL2Mean::new(),
            BinSegConfig { stopping, ..BinSegConfig::default() },
        ).expect("valid");
        let cusum = Cusum::new(CusumConfig::default()).expect("valid");
        let detectors: [(&str, &dyn OfflineDetector); 3] =
            [("pelt", &pelt), ("binseg", &binseg), ("cusum", &cusum)];
        for (name, detector) in detectors {
            let Ok(result) = detector.detect(&values, &ctx) else {
                prop_assume!(n < 2 * min_segment_len);
                continue;
            };
            let mut start = 0usize;
            for &end in &result.breakpoints {
                prop_assert!(
                    end - start >= min_segment_len || result.breakpoints.len() == 1,
                    "{} produced segment [{}, {}) shorter than {}",
                    name, start, end, min_segment_len
                );
                start = end;
            }
        }
    }

    #[test]
    fn max_change_points_is_a_hard_cap(values in piecewise_strategy(), cap in 0usize..3) {
        let constraints = Constraints { max_change_points: Some(cap), ..Constraints::default() };
        let ctx = ExecutionContext::new(&constraints);
        for (name, detector) in detectors() {
            match detector.detect(&values, &ctx) {
                Ok(result) => {
                    prop_assert!(result.change_points.len() <= cap, "{} exceeded cap {}", name, cap)
                }
                Err(CpxError::InvalidWindow(_)) if name == "window" => {}
                Err(err) => return Err(TestCaseError::fail(format!("{name} failed: {err}"))),
            }
        }
    }

    #[test]
    fn capped_pelt_matches_exhaustive_search(
        values in prop::collection::vec(-5.0f64..5.0, 6..14),
        cap in 0usize..4,
        beta in 0.05f64..4.0,
    ) {
        let constraints = Constraints { max_change_points: Some(cap), ..Constraints::default() };
        let ctx = ExecutionContext::new(&constraints);
        let pelt = Pelt::new(
            CostL2Mean::new(),
            PeltConfig {
                stopping: Stopping::Penalized(Penalty::Manual(beta)),
                ..PeltConfig::default()
            },
        ).expect("valid");
        let result = pelt.detect(&values, &ctx).expect("capped pelt runs");
        prop_assert!(result.change_points.len() <= cap);

        let found = penalized_l2(&values, &result.breakpoints, beta);
        let optimum = exhaustive_best(&values, 0, constraints.min_segment_len, cap, beta);
        prop_assert!(
            found <= optimum + 1e-9 * (1.0 + optimum),
            "cap {} found {} but the optimum is {}", cap, found, optimum
        );
    }
}
