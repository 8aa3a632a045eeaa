// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::event::EventRecord;
use chrono::NaiveDate;
use cpx_core::{ChangePointRecord, CpxError};
use std::cmp::Ordering;
use tracing::debug;

/// Default correlation window in calendar days.
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Linear decay `max(0, 1 - days_diff / window_days)`.
///
/// Equals 1 at zero distance and exactly 0 from `window_days` on. A zero
/// window yields 0 everywhere.
pub fn proximity(days_diff: u32, window_days: u32) -> f64 {
    if window_days == 0 {
        return 0.0;
    }
    (1.0 - f64::from(days_diff) / f64::from(window_days)).max(0.0)
}

/// Configuration for [`EventCorrelator`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelatorConfig {
    pub window_days: u32,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

impl CorrelatorConfig {
    fn validate(&self) -> Result<(), CpxError> {
        if self.window_days == 0 {
            return Err(CpxError::invalid_window(
                "CorrelatorConfig.window_days must be >= 1; got 0",
            ));
        }
        Ok(())
    }
}

/// One change point matched to one event.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Correlation {
    /// Position of the change point in the slice passed to the correlator.
    pub change_point: usize,
    pub change_point_date: NaiveDate,
    pub event: EventRecord,
    pub days_diff: u32,
    /// In `(0, 1]`; pairs at or beyond the window are never emitted.
    pub proximity: f64,
}

/// Correlations of a single change point, strongest first.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ChangePointCorrelations {
    pub change_point: usize,
    pub change_point_date: NaiveDate,
    pub correlations: Vec<Correlation>,
}

fn by_strength(a: &Correlation, b: &Correlation) -> Ordering {
    b.proximity
        .total_cmp(&a.proximity)
        .then_with(|| a.event.start_date.cmp(&b.event.start_date))
        .then_with(|| a.event.name.cmp(&b.event.name))
}

/// Many-to-many temporal matcher between change points and events.
///
/// A pair survives only when `days_diff < window_days`, so every emitted
/// correlation has strictly positive proximity.
#[derive(Clone, Debug)]
pub struct EventCorrelator {
    config: CorrelatorConfig,
}

impl EventCorrelator {
    pub fn new(config: CorrelatorConfig) -> Result<Self, CpxError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// All surviving pairs, grouped by change point in input order and
    /// strongest first within each change point.
    pub fn correlate(
        &self,
        change_points: &[ChangePointRecord],
        events: &[EventRecord],
    ) -> Vec<Correlation> {
        self.group_by_change_point(change_points, events)
            .into_iter()
            .flat_map(|group| group.correlations)
            .collect()
    }

    /// Per change point (input order), its correlations sorted by descending
    /// proximity, then earlier event date, then event name. Change points
    /// without any event in range are omitted.
    pub fn group_by_change_point(
        &self,
        change_points: &[ChangePointRecord],
        events: &[EventRecord],
    ) -> Vec<ChangePointCorrelations> {
        let window_days = self.config.window_days;
        let mut groups = Vec::new();
        for (idx, change_point) in change_points.iter().enumerate() {
            let mut correlations: Vec<Correlation> = events
                .iter()
                .filter_map(|event| {
                    let days_diff = event.days_from(change_point.date);
                    if days_diff >= window_days {
                        return None;
                    }
                    Some(Correlation {
                        change_point: idx,
                        change_point_date: change_point.date,
                        event: event.clone(),
                        days_diff,
                        proximity: proximity(days_diff, window_days),
                    })
                })
                .collect();
            if correlations.is_empty() {
                continue;
            }
            correlations.sort_by(by_strength);
            groups.push(ChangePointCorrelations {
                change_point: idx,
                change_point_date: change_point.date,
                correlations,
            });
        }

        debug!(
            change_points = change_points.len(),
            events = events.len(),
            window_days,
            matched_change_points = groups.len(),
            "correlated change points with events"
        );
        groups
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{change_point, day};
    use super::{CorrelatorConfig, EventCorrelator, proximity};
    use crate::event::{EventRecord, ImpactMagnitude};
    use cpx_core::CpxError;

    fn event(name: &str, offset: u64) -> EventRecord {
        EventRecord::new(name, day(offset), "Supply", ImpactMagnitude::High).expect("valid event")
    }

    fn correlator() -> EventCorrelator {
        EventCorrelator::new(CorrelatorConfig::default()).expect("default config is valid")
    }

    #[test]
    fn proximity_decays_linearly_to_zero_at_window() {
        assert_eq!(proximity(0, 30), 1.0);
        assert_eq!(proximity(15, 30), 0.5);
        assert_eq!(proximity(30, 30), 0.0);
        assert_eq!(proximity(45, 30), 0.0);
        assert_eq!(proximity(0, 0), 0.0);
    }

    #[test]
    fn zero_window_is_invalid() {
        let err = EventCorrelator::new(CorrelatorConfig { window_days: 0 })
            .expect_err("zero window must fail");
        assert!(matches!(err, CpxError::InvalidWindow(_)));
    }

    #[test]
    fn window_edge_is_excluded() {
        let cps = [change_point(10, 100, 1.0)];
        let events = [event("edge", 130), event("inside", 129), event("before", 71)];
        let correlations = correlator().correlate(&cps, &events);
        let names: Vec<&str> = correlations.iter().map(|c| c.event.name.as_str()).collect();
        assert_eq!(names, vec!["before", "inside"]);
        assert!(correlations.iter().all(|c| c.proximity > 0.0));
        assert_eq!(correlations[0].days_diff, 29);
    }

    #[test]
    fn many_to_many_matches_are_kept() {
        let cps = [change_point(5, 50, 0.6), change_point(9, 60, 0.4)];
        let events = [event("a", 55), event("b", 58)];
        let correlations = correlator().correlate(&cps, &events);
        assert_eq!(correlations.len(), 4);
        assert_eq!(correlations[0].change_point, 0);
        assert_eq!(correlations[0].event.name, "a");
        assert_eq!(correlations[2].change_point, 1);
        assert_eq!(correlations[2].event.name, "b");
    }

    #[test]
    fn grouping_orders_by_proximity_then_date_then_name() {
        let cps = [change_point(1, 40, 1.0), change_point(2, 500, 1.0)];
        let events = [event("zeta", 45), event("alpha", 35), event("beta", 45), event("near", 41)];
        let groups = correlator().group_by_change_point(&cps, &events);
        assert_eq!(groups.len(), 1, "second change point has no events in range");
        let names: Vec<&str> = groups[0]
            .correlations
            .iter()
            .map(|c| c.event.name.as_str())
            .collect();
        assert_eq!(names, vec!["near", "alpha", "beta", "zeta"]);
    }

    #[test]
    fn empty_inputs_give_empty_output() {
        assert!(correlator().correlate(&[], &[event("a", 1)]).is_empty());
        assert!(correlator().correlate(&[change_point(1, 1, 1.0)], &[]).is_empty());
    }
}
