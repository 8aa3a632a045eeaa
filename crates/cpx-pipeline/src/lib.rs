// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Result analysis and end-to-end orchestration.
//!
//! A [`PipelineSpec`] names the detector, the signal it segments and the
//! correlation settings. [`execute_pipeline`] runs one spec against a
//! preprocessed series and an event list; [`Engine`] does the same with
//! preprocessing and detection cached by series content.

pub mod analyzer;
pub mod engine;
pub mod spec;

pub use analyzer::{AnalyzerConfig, DEFAULT_PROBABILITY_THRESHOLD, ResultAnalyzer};
pub use engine::{Detection, Engine, EngineConfig, PipelineReport, detect, execute_pipeline};
pub use spec::{DetectorConfig, PipelineSpec};
