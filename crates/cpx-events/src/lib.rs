// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Event catalog, temporal correlation of change points with events, and
//! impact ranking.

pub mod catalog;
pub mod correlator;
pub mod event;
pub mod impact;
pub mod window;

pub use catalog::EventCatalog;
pub use correlator::{
    ChangePointCorrelations, Correlation, CorrelatorConfig, DEFAULT_WINDOW_DAYS, EventCorrelator,
    proximity,
};
pub use event::{DEFAULT_EVENT_DURATION_DAYS, EventRecord, ImpactMagnitude};
pub use impact::{ImpactConfig, ImpactQuantifier, ImpactRecord};
pub use window::{
    DEFAULT_EVENT_WINDOW_DAYS, EventWindowAnalysis, EventWindowConfig, analyze_event_window,
    analyze_named_event,
};
