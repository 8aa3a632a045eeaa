// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Library half of the `cpx` binary: argument definitions, CSV loaders and
//! command handlers that emit JSON documents.

pub mod cli;
pub mod commands;
pub mod error;
pub mod loaders;

pub use cli::{Cli, Command};
pub use commands::{build_detect_spec, execute, render};
pub use error::{CliError, ErrorEnvelope};
pub use loaders::{load_events, load_prices, parse_events, parse_prices};

use cpx_core::{CpxError, PriceSeries};
use cpx_events::EventRecord;
use cpx_pipeline::{Engine, EngineConfig, PipelineReport, PipelineSpec};

/// Executes a [`PipelineSpec`] against a price series and event list.
pub fn run_pipeline(
    series: &PriceSeries,
    events: &[EventRecord],
    pipeline: &PipelineSpec,
) -> Result<PipelineReport, CpxError> {
    Engine::new(EngineConfig::default())?.run(series, events, pipeline)
}

/// Parses a JSON pipeline spec and executes it.
pub fn run_pipeline_json(
    series: &PriceSeries,
    events: &[EventRecord],
    pipeline_json: &str,
) -> Result<PipelineReport, CpxError> {
    let pipeline = PipelineSpec::from_json(pipeline_json)?;
    run_pipeline(series, events, &pipeline)
}
