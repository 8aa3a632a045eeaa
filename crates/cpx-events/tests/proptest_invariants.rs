// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use chrono::{Days, NaiveDate};
use cpx_core::{ChangePointRecord, DetectionMethod, pct_change};
use cpx_events::{
    CorrelatorConfig, EventCorrelator, EventRecord, ImpactMagnitude, ImpactQuantifier, proximity,
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

fn day(offset: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.checked_add_days(Days::new(u64::from(offset))))
        .expect("valid date")
}

fn change_point_strategy() -> impl Strategy<Value = ChangePointRecord> {
    (0u32..400, 0.0f64..=1.0, 1.0f64..200.0, 1.0f64..200.0).prop_map(
        |(offset, probability, before, after)| ChangePointRecord {
            index: offset as usize + 1,
            date: day(offset),
            probability,
            confidence: probability,
            mean_before: 0.0,
            mean_after: 0.001,
            volatility_before: 0.01,
            volatility_after: 0.02,
            price_before: before,
            price_after: after,
            pct_change: pct_change(before, after),
            method: DetectionMethod::Bayesian,
        },
    )
}

fn event_strategy() -> impl Strategy<Value = EventRecord> {
    (0u32..400, "[a-z]{1,8}").prop_map(|(offset, name)| {
        EventRecord::new(name, day(offset), "Supply", ImpactMagnitude::Medium)
            .expect("non-empty name")
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
    fn proximity_is_bounded_and_strictly_decreasing(window in 1u32..365, d in 0u32..400) {
        let p = proximity(d, window);
        prop_assert!((0.0..=1.0).contains(&p));
        if d < window {
            prop_assert!(proximity(d + 1, window) < p);
        } else {
            prop_assert_eq!(p, 0.0);
        }
        prop_assert_eq!(proximity(window, window), 0.0);
        prop_assert_eq!(proximity(0, window), 1.0);
    }

    #[test]
    fn correlations_stay_inside_the_window(
        cps in prop::collection::vec(change_point_strategy(), 0..6),
        events in prop::collection::vec(event_strategy(), 0..8),
        window in 1u32..90,
    ) {
        let correlator =
            EventCorrelator::new(CorrelatorConfig { window_days: window }).expect("valid window");
        for correlation in correlator.correlate(&cps, &events) {
            prop_assert!(correlation.days_diff < window);
            prop_assert!(correlation.proximity > 0.0 && correlation.proximity <= 1.0);
            prop_assert_eq!(correlation.proximity, proximity(correlation.days_diff, window));
        }
        for event in &events {
            let in_range = cps.iter().any(|cp| event.days_from(cp.date) < window);
            let matched = correlator.correlate(&cps, std::slice::from_ref(event));
            prop_assert_eq!(in_range, !matched.is_empty());
        }
    }

    #[test]
    fn impacts_are_ranked_bounded_and_consistent(
        cps in prop::collection::vec(change_point_strategy(), 0..6),
        events in prop::collection::vec(event_strategy(), 0..8),
    ) {
        let correlator = EventCorrelator::new(CorrelatorConfig::default()).expect("valid window");
        let correlations = correlator.correlate(&cps, &events);
        let impacts = ImpactQuantifier::default()
            .quantify(&cps, &correlations)
            .expect("quantify succeeds");
        for pair in impacts.windows(2) {
            prop_assert!(pair[0].combined_confidence >= pair[1].combined_confidence);
        }
        for impact in &impacts {
            prop_assert!((0.0..=1.0).contains(&impact.combined_confidence));
            let expected = impact.probability * impact.proximity;
            prop_assert!((impact.combined_confidence - expected).abs() < 1e-15);
            let recomputed = pct_change(impact.price_before, impact.price_after);
            let tolerance = 1e-9 * recomputed.abs().max(1.0);
            prop_assert!((impact.pct_change - recomputed).abs() <= tolerance);
        }
    }
}
