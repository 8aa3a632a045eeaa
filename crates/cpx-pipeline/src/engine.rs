// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::analyzer::ResultAnalyzer;
use crate::spec::{DetectorConfig, PipelineSpec};
use cpx_bayes::{BayesianSampler, SamplerConfig, SamplerDiagnostics};
use cpx_core::{
    CacheStats, CancelToken, ChangePointRecord, CpxError, DetectionMethod, Diagnostics,
    ExecutionContext, FingerprintCache, OfflineDetector, PriceSeries, SeriesFingerprint,
    elapsed_ms,
};
use cpx_costs::{CostKind, CostL2Mean, CostNormalMeanVar};
use cpx_events::{Correlation, EventCorrelator, EventRecord, ImpactQuantifier, ImpactRecord};
use cpx_offline::{BinSeg, Cusum, Pelt, SlidingWindow};
use cpx_preprocess::{PreprocessedSeries, Preprocessor, PreprocessorConfig, SignalKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_PREPROCESS_CACHE_CAPACITY: usize = 32;
const DEFAULT_DETECTION_CACHE_CAPACITY: usize = 64;

/// Analyzed change points of one detection run, before event correlation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub method: DetectionMethod,
    pub change_points: Vec<ChangePointRecord>,
    pub diagnostics: Diagnostics,
    /// Present for Bayesian runs only.
    pub sampler: Option<SamplerDiagnostics>,
}

/// Final output of [`execute_pipeline`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub method: DetectionMethod,
    pub signal: SignalKind,
    pub n_prices: usize,
    pub n_returns: usize,
    /// Most probable first; ties go to the earlier date.
    pub change_points: Vec<ChangePointRecord>,
    pub correlations: Vec<Correlation>,
    /// Descending combined confidence.
    pub impacts: Vec<ImpactRecord>,
    pub diagnostics: Diagnostics,
    pub sampler: Option<SamplerDiagnostics>,
    /// Preprocessing, detector and convergence warnings.
    pub warnings: Vec<String>,
    /// Whether the change points were served from the engine cache.
    pub cached: bool,
}

/// Runs the detector of `spec` and analyzes its output.
pub fn detect(
    series: &PreprocessedSeries,
    spec: &PipelineSpec,
    ctx: &ExecutionContext<'_>,
) -> Result<Detection, CpxError> {
    let analyzer = ResultAnalyzer::new(spec.analyzer.clone())?;
    let method = spec.detector.method();

    let signal = series.signal(spec.signal);
    let result = match &spec.detector {
        DetectorConfig::Cusum(config) => Cusum::new(config.clone())?.detect(signal, ctx)?,
        DetectorConfig::Window(config) => SlidingWindow::new(config.clone())?.detect(signal, ctx)?,
        DetectorConfig::Pelt { cost, config } => match cost {
            CostKind::L2 => Pelt::new(CostL2Mean::new(), config.clone())?.detect(signal, ctx)?,
            CostKind::Normal => {
                Pelt::new(CostNormalMeanVar::new(), config.clone())?.detect(signal, ctx)?
            }
        },
        DetectorConfig::BinSeg { cost, config } => match cost {
            CostKind::L2 => BinSeg::new(CostL2Mean::new(), config.clone())?.detect(signal, ctx)?,
            CostKind::Normal => {
                BinSeg::new(CostNormalMeanVar::new(), config.clone())?.detect(signal, ctx)?
            }
        },
        DetectorConfig::Bayesian(config) => {
            return detect_bayesian(series, config, &analyzer, ctx);
        }
    };

    let mut diagnostics = result.diagnostics;
    diagnostics
        .notes
        .push(format!("signal={}", signal_name(spec.signal)));
    let change_points = analyzer.from_indices(series, &result.change_points, method)?;
    Ok(Detection {
        method,
        change_points,
        diagnostics,
        sampler: None,
    })
}

fn detect_bayesian(
    series: &PreprocessedSeries,
    config: &SamplerConfig,
    analyzer: &ResultAnalyzer,
    ctx: &ExecutionContext<'_>,
) -> Result<Detection, CpxError> {
    let batch = BayesianSampler::new(config.clone())?.sample(series.returns().values(), ctx)?;
    let change_points = analyzer.from_posterior(series, &batch)?;
    let diagnostics = Diagnostics {
        runtime_ms: Some(batch.diagnostics.runtime_ms),
        warnings: batch.diagnostics.warnings.clone(),
        seed: Some(batch.diagnostics.seed),
        thread_count: Some(batch.diagnostics.thread_count),
        ..Diagnostics::for_algorithm(DetectionMethod::Bayesian.as_str(), "student_t", batch.n)
    };
    Ok(Detection {
        method: DetectionMethod::Bayesian,
        change_points,
        diagnostics,
        sampler: Some(batch.diagnostics),
    })
}

fn signal_name(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::LogPrice => "log_price",
        SignalKind::LogReturn => "log_return",
    }
}

/// Runs detection, correlation and impact ranking against `events`.
pub fn execute_pipeline(
    series: &PreprocessedSeries,
    events: &[EventRecord],
    spec: &PipelineSpec,
) -> Result<PipelineReport, CpxError> {
    let ctx = ExecutionContext::new(&spec.constraints);
    let detection = detect(series, spec, &ctx)?;
    finish_report(series, events, spec, detection, false)
}

fn finish_report(
    series: &PreprocessedSeries,
    events: &[EventRecord],
    spec: &PipelineSpec,
    detection: Detection,
    cached: bool,
) -> Result<PipelineReport, CpxError> {
    let Detection {
        method,
        change_points,
        diagnostics,
        sampler,
    } = detection;

    if change_points.is_empty() && spec.fail_on_empty {
        return Err(CpxError::no_change_points_found(format!(
            "{method} found no change points in {} returns",
            series.n_returns()
        )));
    }

    let correlator = EventCorrelator::new(spec.correlation.clone())?;
    let quantifier = ImpactQuantifier::new(spec.impact.clone())?;
    let correlations = correlator.correlate(&change_points, events);
    let impacts = quantifier.quantify(&change_points, &correlations)?;

    let mut warnings = series.warnings().to_vec();
    warnings.extend(diagnostics.warnings.iter().cloned());

    info!(
        method = method.as_str(),
        change_points = change_points.len(),
        correlations = correlations.len(),
        impacts = impacts.len(),
        cached,
        "pipeline finished"
    );

    Ok(PipelineReport {
        method,
        signal: spec.signal,
        n_prices: series.prices().len(),
        n_returns: series.n_returns(),
        change_points,
        correlations,
        impacts,
        diagnostics,
        sampler,
        warnings,
        cached,
    })
}

/// Cache capacities for [`Engine`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub preprocess_cache_capacity: usize,
    pub detection_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preprocess_cache_capacity: DEFAULT_PREPROCESS_CACHE_CAPACITY,
            detection_cache_capacity: DEFAULT_DETECTION_CACHE_CAPACITY,
        }
    }
}

type DetectionKey = (SeriesFingerprint, u64);

/// Long-lived pipeline runner.
///
/// Detections are cached by the series fingerprint and
/// [`PipelineSpec::detection_key`], so re-running with another event catalog or correlation
/// window skips the detector. Both caches evict least-recently-used entries.
#[derive(Debug)]
pub struct Engine {
    preprocessor: Preprocessor,
    detections: FingerprintCache<DetectionKey, Arc<Detection>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, CpxError> {
        let preprocessor = Preprocessor::new(PreprocessorConfig {
            cache_capacity: config.preprocess_cache_capacity,
        })?;
        let detections = FingerprintCache::new(config.detection_cache_capacity)?;
        Ok(Self {
            preprocessor,
            detections,
        })
    }

    pub fn preprocess(&self, series: &PriceSeries) -> Result<Arc<PreprocessedSeries>, CpxError> {
        self.preprocessor.process(series)
    }

    pub fn run(
        &self,
        series: &PriceSeries,
        events: &[EventRecord],
        spec: &PipelineSpec,
    ) -> Result<PipelineReport, CpxError> {
        self.run_with_cancel(series, events, spec, None)
    }

    /// Like [`Engine::run`], aborting cooperatively once `cancel` fires.
    pub fn run_with_cancel(
        &self,
        series: &PriceSeries,
        events: &[EventRecord],
        spec: &PipelineSpec,
        cancel: Option<&CancelToken>,
    ) -> Result<PipelineReport, CpxError> {
        let started_at = Instant::now();
        let preprocessed = self.preprocess(series)?;
        let key = (preprocessed.fingerprint(), spec.detection_key()?);

        debug!(
            method = spec.detector.method().as_str(),
            signal = signal_name(spec.signal),
            n = preprocessed.n_returns(),
            "running pipeline"
        );

        let (detection, cached) = match self.detections.get(&key) {
            Some(hit) => (hit, true),
            None => {
                let mut ctx = ExecutionContext::new(&spec.constraints);
                if let Some(cancel) = cancel {
                    ctx = ctx.with_cancel(cancel);
                }
                let fresh = Arc::new(detect(&preprocessed, spec, &ctx)?);
                self.detections.insert(key, Arc::clone(&fresh));
                (fresh, false)
            }
        };

        let report = finish_report(
            &preprocessed,
            events,
            spec,
            Detection::clone(&detection),
            cached,
        )?;
        debug!(runtime_ms = elapsed_ms(started_at), "engine run complete");
        Ok(report)
    }

    pub fn preprocess_cache_stats(&self) -> CacheStats {
        self.preprocessor.cache_stats()
    }

    pub fn detection_cache_stats(&self) -> CacheStats {
        self.detections.stats()
    }

    pub fn clear_cache(&self) {
        self.detections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{Engine, EngineConfig, execute_pipeline};
    use crate::spec::{DetectorConfig, PipelineSpec};
    use chrono::NaiveDate;
    use cpx_core::{CancelToken, CpxError, DetectionMethod, PriceSeries};
    use cpx_events::{CorrelatorConfig, EventRecord, ImpactMagnitude};
    use cpx_offline::CusumConfig;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, 3).expect("valid date") + chrono::Duration::days(offset)
    }

    fn doubling(n: usize, at: usize) -> PriceSeries {
        let dates: Vec<NaiveDate> = (0..n).map(|i| day(i as i64)).collect();
        let prices: Vec<f64> = (0..n).map(|i| if i < at { 50.0 } else { 100.0 }).collect();
        PriceSeries::from_columns(&dates, &prices).expect("series should build")
    }

    fn event(name: &str, offset: i64) -> EventRecord {
        EventRecord::new(name, day(offset), "Supply", ImpactMagnitude::High)
            .expect("valid event")
    }

    #[test]
    fn engine_caches_detection_across_correlation_settings() {
        let engine = Engine::new(EngineConfig::default()).expect("valid config");
        let series = doubling(120, 60);
        let events = vec![event("embargo", 62)];

        let first = engine
            .run(&series, &events, &PipelineSpec::default())
            .expect("first run should succeed");
        assert!(!first.cached);
        assert_eq!(first.change_points.len(), 1);
        assert_eq!(first.impacts.len(), 1);

        let narrow = PipelineSpec {
            correlation: CorrelatorConfig { window_days: 2 },
            ..PipelineSpec::default()
        };
        let second = engine
            .run(&series, &events, &narrow)
            .expect("second run should succeed");
        assert!(second.cached);
        assert_eq!(second.change_points, first.change_points);
        assert!(second.correlations.is_empty());

        let stats = engine.detection_cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.len, 1);
        assert_eq!(engine.preprocess_cache_stats().hits, 1);

        engine.clear_cache();
        let third = engine
            .run(&series, &events, &PipelineSpec::default())
            .expect("third run should succeed");
        assert!(!third.cached);
    }

    #[test]
    fn different_detectors_do_not_share_cache_entries() {
        let engine = Engine::new(EngineConfig::default()).expect("valid config");
        let series = doubling(120, 60);
        let pelt = engine
            .run(&series, &[], &PipelineSpec::default())
            .expect("pelt run");
        let cusum = engine
            .run(
                &series,
                &[],
                &PipelineSpec {
                    detector: DetectorConfig::Cusum(CusumConfig::default()),
                    ..PipelineSpec::default()
                },
            )
            .expect("cusum run");
        assert!(!cusum.cached);
        assert_eq!(pelt.method, DetectionMethod::Pelt);
        assert_eq!(cusum.method, DetectionMethod::Cusum);
    }

    #[test]
    fn fail_on_empty_raises_no_change_points_found() {
        let dates: Vec<NaiveDate> = (0..80).map(day).collect();
        let flat = PriceSeries::from_columns(&dates, &[42.0; 80]).expect("series should build");
        let engine = Engine::new(EngineConfig::default()).expect("valid config");

        let lenient = engine
            .run(&flat, &[event("anything", 10)], &PipelineSpec::default())
            .expect("empty result is not an error by default");
        assert!(lenient.change_points.is_empty());
        assert!(lenient.impacts.is_empty());

        let strict = PipelineSpec {
            fail_on_empty: true,
            ..PipelineSpec::default()
        };
        let err = engine
            .run(&flat, &[], &strict)
            .expect_err("strict spec must fail");
        assert!(matches!(err, CpxError::NoChangePointsFound(_)));
    }

    #[test]
    fn cancelled_token_stops_the_detector() {
        let engine = Engine::new(EngineConfig::default()).expect("valid config");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = engine
            .run_with_cancel(&doubling(120, 60), &[], &PipelineSpec::default(), Some(&cancel))
            .expect_err("cancelled run must fail");
        assert_eq!(err, CpxError::Cancelled);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = Engine::new(EngineConfig {
            detection_cache_capacity: 0,
            ..EngineConfig::default()
        })
        .expect_err("zero capacity must fail");
        assert!(matches!(err, CpxError::InvalidInput(_)));
    }

    #[test]
    fn execute_pipeline_reports_preprocessing_warnings() {
        let dates: Vec<NaiveDate> = (0..60).map(day).collect();
        let mut prices: Vec<f64> = (0..60).map(|i| if i < 30 { 20.0 } else { 30.0 }).collect();
        prices[5] = f64::NAN;
        let raw = PriceSeries::from_columns(&dates, &prices).expect("series should build");
        let engine = Engine::new(EngineConfig::default()).expect("valid config");
        let pre = engine.preprocess(&raw).expect("preprocess should succeed");
        let report =
            execute_pipeline(&pre, &[], &PipelineSpec::default()).expect("pipeline should run");
        assert_eq!(report.n_prices, 59);
        assert_eq!(report.n_returns, 58);
        assert!(report.warnings.iter().any(|w| w.contains("dropped 1")));
        assert_eq!(report.change_points.len(), 1);
        assert_eq!(report.change_points[0].date, day(30));
    }
}
