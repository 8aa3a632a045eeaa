// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Core shared types and traits for commodity change-point analysis.

pub mod cache;
pub mod constraints;
pub mod control;
pub mod diagnostics;
pub mod error;
pub mod execution_context;
pub mod math;
pub mod observability;
pub mod penalty;
pub mod records;
pub mod results;
pub mod series;

pub use cache::{CacheStats, FingerprintCache, Fnv1a, SeriesFingerprint, fnv1a};
pub use constraints::{Constraints, ValidatedConstraints, validate_constraints};
pub use control::{BudgetMode, BudgetStatus, CancelToken};
pub use diagnostics::{Diagnostics, PruningStats, elapsed_ms};
pub use error::CpxError;
pub use execution_context::ExecutionContext;
pub use observability::ProgressSink;
pub use penalty::{Penalty, Stopping, penalty_value, validate_penalty, validate_stopping};
pub use records::{ChangePointRecord, DetectionMethod, pct_change};
pub use results::{OfflineChangePointResult, OfflineDetector, validate_breakpoints};
pub use series::{PricePoint, PriceSeries, ReturnSeries};
