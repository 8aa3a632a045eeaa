// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod preprocessor;
pub mod summary;

pub use preprocessor::{
    PreprocessedSeries, Preprocessor, PreprocessorConfig, ReturnStats, SignalKind,
};
pub use summary::{DateRange, PriceStats, ReturnStatsPct, SeriesSummary, summarize};
