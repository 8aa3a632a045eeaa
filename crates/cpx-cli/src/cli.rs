// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Command-line argument definitions for `cpx`.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `detect` | Detect change points with flags and correlate them with events |
//! | `run` | Execute a JSON pipeline spec |
//! | `summary` | Price and return statistics, optionally with catalog counts |
//! | `event-impact` | Price and volatility before and after one named event |

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Commodity price change-point detection and event impact analysis.
#[derive(Debug, Parser)]
#[command(name = "cpx", version, about)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Detect change points and correlate them with an optional event catalog.
    Detect(DetectArgs),
    /// Execute a pipeline spec loaded from JSON.
    Run(RunArgs),
    /// Summary statistics of a price series.
    Summary(SummaryArgs),
    /// Compare prices before and after a named event.
    EventImpact(EventImpactArgs),
}

/// Price input shared by every command.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// CSV with `Date` and `Price` columns.
    #[arg(long = "prices", value_name = "CSV")]
    pub prices: PathBuf,

    /// Keep observations on or after this date (YYYY-MM-DD).
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Keep observations on or before this date (YYYY-MM-DD).
    #[arg(long)]
    pub end: Option<NaiveDate>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Cusum,
    Window,
    #[default]
    Pelt,
    Binseg,
    Bayesian,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CostArg {
    #[default]
    L2,
    Normal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SignalArg {
    #[default]
    LogPrice,
    LogReturn,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PenaltyArg {
    #[default]
    Bic,
    Aic,
    Manual,
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[arg(long, value_enum, default_value_t = MethodArg::Pelt)]
    pub method: MethodArg,

    /// Segment cost for pelt and binseg.
    #[arg(long, value_enum, default_value_t = CostArg::L2)]
    pub cost: CostArg,

    /// Series the deterministic strategies segment.
    #[arg(long, value_enum, default_value_t = SignalArg::LogPrice)]
    pub signal: SignalArg,

    /// Penalty for pelt and binseg; ignored when --k is given.
    #[arg(long, value_enum)]
    pub penalty: Option<PenaltyArg>,

    /// Value for --penalty manual.
    #[arg(long)]
    pub penalty_value: Option<f64>,

    /// Exact number of change points for pelt and binseg.
    #[arg(long)]
    pub k: Option<usize>,

    #[arg(long)]
    pub max_change_points: Option<usize>,

    #[arg(long)]
    pub min_segment_len: Option<usize>,

    /// Statistic threshold for cusum and window.
    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long)]
    pub window_width: Option<usize>,

    /// Number of change points in the bayesian model (1 or more).
    #[arg(long)]
    pub change_points: Option<usize>,

    #[arg(long)]
    pub draws: Option<usize>,

    #[arg(long)]
    pub chains: Option<usize>,

    #[arg(long)]
    pub warmup: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Wall-clock budget for the run in milliseconds.
    #[arg(long)]
    pub time_budget_ms: Option<u64>,

    /// Minimum posterior frequency kept by the analyzer.
    #[arg(long)]
    pub probability_threshold: Option<f64>,

    /// Event catalog CSV to correlate against.
    #[arg(long, value_name = "CSV")]
    pub events: Option<PathBuf>,

    /// Correlation window in days.
    #[arg(long)]
    pub window_days: Option<u32>,

    /// Exit with `no_change_points_found` instead of an empty result.
    #[arg(long, default_value_t = false)]
    pub fail_on_empty: bool,

    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Pipeline spec JSON.
    #[arg(long, value_name = "JSON")]
    pub pipeline: PathBuf,

    #[arg(long, value_name = "CSV")]
    pub events: Option<PathBuf>,

    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Also report event counts by category and magnitude.
    #[arg(long, value_name = "CSV")]
    pub events: Option<PathBuf>,

    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct EventImpactArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[arg(long, value_name = "CSV")]
    pub events: PathBuf,

    /// Event name, matched case-insensitively as a substring.
    #[arg(long)]
    pub event: String,

    /// Days on each side of the event start.
    #[arg(long, default_value_t = cpx_events::DEFAULT_EVENT_WINDOW_DAYS)]
    pub window_days: u32,

    #[arg(long, short)]
    pub output: Option<PathBuf>,
}
