// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::cli::{
    Command, CostArg, DetectArgs, EventImpactArgs, InputArgs, MethodArg, PenaltyArg, RunArgs,
    SignalArg, SummaryArgs,
};
use crate::error::CliError;
use crate::loaders::{load_events, load_prices};
use crate::run_pipeline;
use chrono::NaiveDate;
use cpx_bayes::SamplerConfig;
use cpx_core::{Constraints, Penalty, PriceSeries, Stopping};
use cpx_costs::CostKind;
use cpx_events::{
    ChangePointCorrelations, EventCatalog, EventCorrelator, EventWindowAnalysis, EventWindowConfig,
    ImpactMagnitude, analyze_named_event,
};
use cpx_offline::{BinSegConfig, CusumConfig, PeltConfig, SlidingWindowConfig};
use cpx_pipeline::{AnalyzerConfig, DetectorConfig, PipelineReport, PipelineSpec};
use cpx_preprocess::{Preprocessor, PreprocessorConfig, SeriesSummary, SignalKind, summarize};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

struct LoadedPrices {
    path: PathBuf,
    series: PriceSeries,
}

impl LoadedPrices {
    fn load(input: &InputArgs) -> Result<Self, CliError> {
        let full = load_prices(&input.prices)?;
        let series = if input.start.is_some() || input.end.is_some() {
            full.between(input.start, input.end)?
        } else {
            full
        };
        Ok(Self {
            path: input.prices.clone(),
            series,
        })
    }

    fn summary(&self, events: Option<&EventCatalog>) -> InputSummary {
        InputSummary {
            path: self.path.display().to_string(),
            observations: self.series.len(),
            first_date: self.series.first_date(),
            last_date: self.series.last_date(),
            events: events.map(EventCatalog::len),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InputSummary {
    pub path: String,
    pub observations: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<usize>,
}

#[derive(Debug, Serialize)]
struct DetectOutput {
    command: &'static str,
    input: InputSummary,
    pipeline: PipelineSpec,
    report: PipelineReport,
    correlations_by_change_point: Vec<ChangePointCorrelations>,
}

#[derive(Debug, Serialize)]
struct CatalogCounts {
    events: usize,
    by_category: BTreeMap<String, usize>,
    by_magnitude: BTreeMap<ImpactMagnitude, usize>,
}

#[derive(Debug, Serialize)]
struct SummaryOutput {
    command: &'static str,
    input: InputSummary,
    summary: SeriesSummary,
    dropped_observations: usize,
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    catalog: Option<CatalogCounts>,
}

#[derive(Debug, Serialize)]
struct EventImpactOutput {
    command: &'static str,
    input: InputSummary,
    analysis: EventWindowAnalysis,
}

/// Runs `command` and writes its JSON document to stdout or `--output`.
pub fn execute(command: &Command) -> Result<(), CliError> {
    let document = render(command)?;
    write_json_output(&document, output_path(command))
}

/// Runs `command` and returns its JSON document.
pub fn render(command: &Command) -> Result<Value, CliError> {
    match command {
        Command::Detect(args) => to_value(&handle_detect(args)?),
        Command::Run(args) => to_value(&handle_run(args)?),
        Command::Summary(args) => to_value(&handle_summary(args)?),
        Command::EventImpact(args) => to_value(&handle_event_impact(args)?),
    }
}

fn output_path(command: &Command) -> Option<&Path> {
    match command {
        Command::Detect(args) => args.output.as_deref(),
        Command::Run(args) => args.output.as_deref(),
        Command::Summary(args) => args.output.as_deref(),
        Command::EventImpact(args) => args.output.as_deref(),
    }
}

fn handle_detect(args: &DetectArgs) -> Result<DetectOutput, CliError> {
    let prices = LoadedPrices::load(&args.input)?;
    let catalog = args.events.as_deref().map(load_events).transpose()?;
    let pipeline = build_detect_spec(args)?;
    let events = catalog.as_ref().map(EventCatalog::events).unwrap_or(&[]);
    let report = run_pipeline(&prices.series, events, &pipeline)?;
    let correlations_by_change_point = EventCorrelator::new(pipeline.correlation.clone())?
        .group_by_change_point(&report.change_points, events);

    info!(
        method = report.method.as_str(),
        change_points = report.change_points.len(),
        impacts = report.impacts.len(),
        "detect finished"
    );
    Ok(DetectOutput {
        command: "detect",
        input: prices.summary(catalog.as_ref()),
        pipeline,
        report,
        correlations_by_change_point,
    })
}

fn handle_run(args: &RunArgs) -> Result<DetectOutput, CliError> {
    let prices = LoadedPrices::load(&args.input)?;
    let catalog = args.events.as_deref().map(load_events).transpose()?;
    let pipeline = load_pipeline_spec(&args.pipeline)?;
    let events = catalog.as_ref().map(EventCatalog::events).unwrap_or(&[]);
    let report = run_pipeline(&prices.series, events, &pipeline)?;
    let correlations_by_change_point = EventCorrelator::new(pipeline.correlation.clone())?
        .group_by_change_point(&report.change_points, events);

    Ok(DetectOutput {
        command: "run",
        input: prices.summary(catalog.as_ref()),
        pipeline,
        report,
        correlations_by_change_point,
    })
}

fn handle_summary(args: &SummaryArgs) -> Result<SummaryOutput, CliError> {
    let prices = LoadedPrices::load(&args.input)?;
    let catalog = args.events.as_deref().map(load_events).transpose()?;
    let preprocessed =
        Preprocessor::new(PreprocessorConfig::default())?.process(&prices.series)?;

    Ok(SummaryOutput {
        command: "summary",
        input: prices.summary(catalog.as_ref()),
        summary: summarize(&preprocessed),
        dropped_observations: preprocessed.dropped(),
        warnings: preprocessed.warnings().to_vec(),
        catalog: catalog.as_ref().map(|catalog| CatalogCounts {
            events: catalog.len(),
            by_category: catalog.counts_by_category(),
            by_magnitude: catalog.counts_by_magnitude(),
        }),
    })
}

fn handle_event_impact(args: &EventImpactArgs) -> Result<EventImpactOutput, CliError> {
    let prices = LoadedPrices::load(&args.input)?;
    let catalog = load_events(&args.events)?;
    let analysis = analyze_named_event(
        &prices.series,
        &catalog,
        &args.event,
        &EventWindowConfig {
            window_days: args.window_days,
        },
    )?;

    Ok(EventImpactOutput {
        command: "event-impact",
        input: prices.summary(Some(&catalog)),
        analysis,
    })
}

fn reject_flag(present: bool, flag: &str, method: MethodArg) -> Result<(), CliError> {
    if present {
        return Err(CliError::invalid_args(format!(
            "{flag} is not supported with --method={}",
            method_name(method)
        )));
    }
    Ok(())
}

fn method_name(method: MethodArg) -> &'static str {
    match method {
        MethodArg::Cusum => "cusum",
        MethodArg::Window => "window",
        MethodArg::Pelt => "pelt",
        MethodArg::Binseg => "binseg",
        MethodArg::Bayesian => "bayesian",
    }
}

/// Translates `detect` flags into a [`PipelineSpec`]. Flags that do not
/// apply to the chosen method are rejected rather than ignored.
pub fn build_detect_spec(args: &DetectArgs) -> Result<PipelineSpec, CliError> {
    let method = args.method;
    let partitioning = matches!(method, MethodArg::Pelt | MethodArg::Binseg);
    let scanning = matches!(method, MethodArg::Cusum | MethodArg::Window);
    let bayesian = method == MethodArg::Bayesian;

    reject_flag(!partitioning && args.cost != CostArg::L2, "--cost", method)?;
    reject_flag(!partitioning && args.penalty.is_some(), "--penalty", method)?;
    reject_flag(
        !partitioning && args.penalty_value.is_some(),
        "--penalty-value",
        method,
    )?;
    reject_flag(!partitioning && args.k.is_some(), "--k", method)?;
    reject_flag(!scanning && args.threshold.is_some(), "--threshold", method)?;
    reject_flag(
        method != MethodArg::Window && args.window_width.is_some(),
        "--window-width",
        method,
    )?;
    for (present, flag) in [
        (args.change_points.is_some(), "--change-points"),
        (args.draws.is_some(), "--draws"),
        (args.chains.is_some(), "--chains"),
        (args.warmup.is_some(), "--warmup"),
        (args.seed.is_some(), "--seed"),
        (args.probability_threshold.is_some(), "--probability-threshold"),
    ] {
        reject_flag(!bayesian && present, flag, method)?;
    }

    let cost = match args.cost {
        CostArg::L2 => CostKind::L2,
        CostArg::Normal => CostKind::Normal,
    };

    let detector = match method {
        MethodArg::Cusum => {
            let mut config = CusumConfig::default();
            if let Some(threshold) = args.threshold {
                config.threshold = threshold;
            }
            DetectorConfig::Cusum(config)
        }
        MethodArg::Window => {
            let mut config = SlidingWindowConfig::default();
            if let Some(threshold) = args.threshold {
                config.threshold = threshold;
            }
            if let Some(width) = args.window_width {
                config.window_width = width;
            }
            DetectorConfig::Window(config)
        }
        MethodArg::Pelt => DetectorConfig::Pelt {
            cost,
            config: PeltConfig {
                stopping: resolve_stopping(args.k, args.penalty, args.penalty_value)?,
                ..PeltConfig::default()
            },
        },
        MethodArg::Binseg => DetectorConfig::BinSeg {
            cost,
            config: BinSegConfig {
                stopping: resolve_stopping(args.k, args.penalty, args.penalty_value)?,
                ..BinSegConfig::default()
            },
        },
        MethodArg::Bayesian => {
            let mut config = SamplerConfig::default();
            if let Some(change_points) = args.change_points {
                config.change_points = change_points;
            }
            if let Some(draws) = args.draws {
                config.draws = draws;
            }
            if let Some(chains) = args.chains {
                config.chains = chains;
            }
            if let Some(warmup) = args.warmup {
                config.warmup = warmup;
            }
            if let Some(seed) = args.seed {
                config.seed = seed;
            }
            DetectorConfig::Bayesian(config)
        }
    };

    let mut analyzer = AnalyzerConfig::default();
    if let Some(threshold) = args.probability_threshold {
        analyzer.probability_threshold = threshold;
    }
    let mut pipeline = PipelineSpec {
        detector,
        signal: match args.signal {
            SignalArg::LogPrice => SignalKind::LogPrice,
            SignalArg::LogReturn => SignalKind::LogReturn,
        },
        constraints: constraints_from_detect_args(args),
        analyzer,
        fail_on_empty: args.fail_on_empty,
        ..PipelineSpec::default()
    };
    if let Some(window_days) = args.window_days {
        pipeline.correlation.window_days = window_days;
    }
    Ok(pipeline)
}

fn resolve_stopping(
    k: Option<usize>,
    penalty: Option<PenaltyArg>,
    penalty_value: Option<f64>,
) -> Result<Stopping, CliError> {
    if let Some(k_value) = k {
        if k_value == 0 {
            return Err(CliError::invalid_args("--k must be >= 1 when provided"));
        }
        if penalty.is_some() {
            return Err(CliError::invalid_args("--penalty cannot be combined with --k"));
        }
        if penalty_value.is_some() {
            return Err(CliError::invalid_args(
                "--penalty-value cannot be combined with --k",
            ));
        }
        return Ok(Stopping::KnownK(k_value));
    }

    let parsed = match penalty.unwrap_or_default() {
        PenaltyArg::Bic | PenaltyArg::Aic if penalty_value.is_some() => {
            return Err(CliError::invalid_args(
                "--penalty-value requires --penalty=manual",
            ));
        }
        PenaltyArg::Bic => Penalty::BIC,
        PenaltyArg::Aic => Penalty::AIC,
        PenaltyArg::Manual => {
            let value = penalty_value.ok_or_else(|| {
                CliError::invalid_args("--penalty=manual requires --penalty-value")
            })?;
            if !value.is_finite() || value <= 0.0 {
                return Err(CliError::invalid_args(
                    "--penalty-value must be finite and > 0.0",
                ));
            }
            Penalty::Manual(value)
        }
    };
    Ok(Stopping::Penalized(parsed))
}

fn constraints_from_detect_args(args: &DetectArgs) -> Constraints {
    let mut constraints = Constraints::default();
    if let Some(min_segment_len) = args.min_segment_len {
        constraints.min_segment_len = min_segment_len;
    }
    if let Some(max_change_points) = args.max_change_points {
        constraints.max_change_points = Some(max_change_points);
    }
    if let Some(time_budget_ms) = args.time_budget_ms {
        constraints.time_budget_ms = Some(time_budget_ms);
    }
    constraints
}

fn load_pipeline_spec(path: &Path) -> Result<PipelineSpec, CliError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| CliError::io(format!("failed to read '{}'", path.display()), source))?;
    Ok(PipelineSpec::from_json(&raw)?)
}

fn to_value<T: Serialize>(payload: &T) -> Result<Value, CliError> {
    serde_json::to_value(payload)
        .map_err(|source| CliError::json("failed to serialize JSON output", source))
}

fn write_json_output(payload: &Value, output_path: Option<&Path>) -> Result<(), CliError> {
    let encoded = serde_json::to_string_pretty(payload)
        .map_err(|source| CliError::json("failed to serialize JSON output", source))?;

    if let Some(path) = output_path {
        fs::write(path, format!("{encoded}\n"))
            .map_err(|source| CliError::io(format!("failed to write '{}'", path.display()), source))
    } else {
        println!("{encoded}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{build_detect_spec, resolve_stopping};
    use crate::cli::{Cli, Command, DetectArgs, PenaltyArg};
    use clap::Parser;
    use cpx_core::{Penalty, Stopping};
    use cpx_costs::CostKind;
    use cpx_pipeline::DetectorConfig;
    use cpx_preprocess::SignalKind;

    fn detect_args(extra: &[&str]) -> DetectArgs {
        let mut argv = vec!["cpx", "detect", "--prices", "p.csv"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("arguments should parse").command {
            Command::Detect(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn stopping_rules_follow_flags() {
        assert_eq!(
            resolve_stopping(None, None, None).expect("default"),
            Stopping::Penalized(Penalty::BIC)
        );
        assert_eq!(
            resolve_stopping(Some(3), None, None).expect("known k"),
            Stopping::KnownK(3)
        );
        assert_eq!(
            resolve_stopping(None, Some(PenaltyArg::Manual), Some(2.5)).expect("manual"),
            Stopping::Penalized(Penalty::Manual(2.5))
        );
        assert!(resolve_stopping(Some(0), None, None).is_err());
        assert!(resolve_stopping(Some(2), Some(PenaltyArg::Aic), None).is_err());
        assert!(resolve_stopping(None, Some(PenaltyArg::Manual), None).is_err());
        assert!(resolve_stopping(None, Some(PenaltyArg::Bic), Some(1.0)).is_err());
        assert!(resolve_stopping(None, Some(PenaltyArg::Manual), Some(-1.0)).is_err());
    }

    #[test]
    fn detect_flags_build_a_binseg_spec() {
        let spec = build_detect_spec(&detect_args(&[
            "--method",
            "binseg",
            "--cost",
            "normal",
            "--signal",
            "log-return",
            "--k",
            "2",
            "--min-segment-len",
            "5",
            "--window-days",
            "45",
            "--fail-on-empty",
        ]))
        .expect("spec should build");
        match &spec.detector {
            DetectorConfig::BinSeg { cost, config } => {
                assert_eq!(*cost, CostKind::Normal);
                assert_eq!(config.stopping, Stopping::KnownK(2));
            }
            other => panic!("unexpected detector {other:?}"),
        }
        assert_eq!(spec.signal, SignalKind::LogReturn);
        assert_eq!(spec.constraints.min_segment_len, 5);
        assert_eq!(spec.correlation.window_days, 45);
        assert!(spec.fail_on_empty);
    }

    #[test]
    fn bayesian_flags_reach_the_sampler() {
        let spec = build_detect_spec(&detect_args(&[
            "--method",
            "bayesian",
            "--draws",
            "400",
            "--chains",
            "3",
            "--seed",
            "9",
            "--probability-threshold",
            "0.1",
        ]))
        .expect("spec should build");
        let DetectorConfig::Bayesian(config) = &spec.detector else {
            panic!("expected bayesian detector");
        };
        assert_eq!((config.draws, config.chains, config.seed), (400, 3, 9));
        assert_eq!(spec.analyzer.probability_threshold, 0.1);
    }

    #[test]
    fn flags_for_other_methods_are_rejected() {
        let err = build_detect_spec(&detect_args(&["--method", "cusum", "--k", "2"]))
            .expect_err("--k does not apply to cusum");
        assert_eq!(err.to_string(), "--k is not supported with --method=cusum");
        assert!(build_detect_spec(&detect_args(&["--seed", "3"])).is_err());
        assert!(
            build_detect_spec(&detect_args(&["--method", "pelt", "--threshold", "2"])).is_err()
        );
        assert!(
            build_detect_spec(&detect_args(&["--method", "cusum", "--window-width", "5"])).is_err()
        );
        assert!(
            build_detect_spec(&detect_args(&["--method", "window", "--window-width", "5"])).is_ok()
        );
    }
}
