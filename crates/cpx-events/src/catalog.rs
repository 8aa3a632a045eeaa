// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::event::{EventRecord, ImpactMagnitude};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Read-only collection of events in catalog order.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventCatalog {
    events: Vec<EventRecord>,
}

impl EventCatalog {
    pub fn new(events: Vec<EventRecord>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// First event whose name contains `needle`, ignoring case.
    pub fn find_by_name(&self, needle: &str) -> Option<&EventRecord> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.events
            .iter()
            .find(|event| event.name.to_lowercase().contains(&needle))
    }

    /// Events starting inside the inclusive range.
    pub fn between(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<&EventRecord> {
        self.events
            .iter()
            .filter(|e| {
                start.is_none_or(|s| e.start_date >= s) && end.is_none_or(|d| e.start_date <= d)
            })
            .collect()
    }

    pub fn counts_by_category(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.category.clone()).or_default() += 1;
        }
        counts
    }

    pub fn counts_by_magnitude(&self) -> BTreeMap<ImpactMagnitude, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.impact_magnitude).or_default() += 1;
        }
        counts
    }
}

impl From<Vec<EventRecord>> for EventCatalog {
    fn from(events: Vec<EventRecord>) -> Self {
        Self::new(events)
    }
}
