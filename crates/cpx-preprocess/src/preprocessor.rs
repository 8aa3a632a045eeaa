// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use chrono::NaiveDate;
use cpx_core::math::{mean, sample_std};
use cpx_core::{
    CacheStats, CpxError, FingerprintCache, PriceSeries, ReturnSeries, SeriesFingerprint,
};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_CACHE_CAPACITY: usize = 32;
const STD_FLOOR: f64 = 1e-8;

/// Which representation the deterministic strategies segment.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Log-price levels (n + 1 points). A level shift is a clean mean change here.
    #[default]
    LogPrice,
    /// Log-returns (n points).
    LogReturn,
}

/// Informed-prior parameters taken from the return series.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReturnStats {
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation, floored at 1e-8 so priors stay proper.
    pub std: f64,
}

impl ReturnStats {
    pub fn from_returns(values: &[f64]) -> Self {
        Self {
            n: values.len(),
            mean: mean(values),
            std: sample_std(values).max(STD_FLOOR),
        }
    }
}

/// Cleaned prices with the derived representations every stage reads.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessedSeries {
    fingerprint: SeriesFingerprint,
    dates: Vec<NaiveDate>,
    prices: Vec<f64>,
    log_prices: Vec<f64>,
    returns: ReturnSeries,
    stats: ReturnStats,
    dropped: usize,
    warnings: Vec<String>,
}

impl PreprocessedSeries {
    pub fn fingerprint(&self) -> SeriesFingerprint {
        self.fingerprint
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn log_prices(&self) -> &[f64] {
        &self.log_prices
    }

    pub fn returns(&self) -> &ReturnSeries {
        &self.returns
    }

    pub fn stats(&self) -> ReturnStats {
        self.stats
    }

    /// Number of price rows removed as non-finite or non-positive.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Number of returns, `n`. Valid change-point indices lie in `(0, n)`.
    pub fn n_returns(&self) -> usize {
        self.returns.len()
    }

    pub fn signal(&self, kind: SignalKind) -> &[f64] {
        match kind {
            SignalKind::LogPrice => &self.log_prices,
            SignalKind::LogReturn => self.returns.values(),
        }
    }

    /// Maps a split position in either signal to a return index.
    ///
    /// Both representations share the index: a level break at `k` separates
    /// `prices[..k]` from `prices[k..]`, and a return break at `k` separates
    /// `returns[..k]` from `returns[k..]`. Positions outside `(0, n)` are
    /// rejected.
    pub fn return_index(&self, split: usize) -> Option<usize> {
        (split > 0 && split < self.n_returns()).then_some(split)
    }
}

/// Preprocessor configuration.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreprocessorConfig {
    pub cache_capacity: usize,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl PreprocessorConfig {
    fn validate(&self) -> Result<(), CpxError> {
        if self.cache_capacity == 0 {
            return Err(CpxError::invalid_input(
                "PreprocessorConfig.cache_capacity must be >= 1; got 0",
            ));
        }
        Ok(())
    }
}

/// Derives log-prices, log-returns and prior statistics, cached per series content.
#[derive(Debug)]
pub struct Preprocessor {
    config: PreprocessorConfig,
    cache: FingerprintCache<SeriesFingerprint, Arc<PreprocessedSeries>>,
}

impl Preprocessor {
    pub fn new(config: PreprocessorConfig) -> Result<Self, CpxError> {
        config.validate()?;
        let cache = FingerprintCache::new(config.cache_capacity)?;
        Ok(Self { config, cache })
    }

    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Returns the preprocessed form of `series`, reusing a cached result when
    /// the same content was processed before.
    pub fn process(&self, series: &PriceSeries) -> Result<Arc<PreprocessedSeries>, CpxError> {
        let fingerprint = SeriesFingerprint::of(series);
        self.cache.get_or_try_insert_with(fingerprint, || {
            preprocess(series, fingerprint).map(Arc::new)
        })
    }
}

fn preprocess(
    series: &PriceSeries,
    fingerprint: SeriesFingerprint,
) -> Result<PreprocessedSeries, CpxError> {
    let mut dates = Vec::with_capacity(series.len());
    let mut prices = Vec::with_capacity(series.len());
    let mut dropped = 0usize;

    for point in series.points() {
        if point.price.is_finite() && point.price > 0.0 {
            dates.push(point.date);
            prices.push(point.price);
        } else {
            dropped += 1;
        }
    }

    let mut warnings = vec![];
    if dropped > 0 {
        let msg = format!("dropped {dropped} non-finite or non-positive price rows");
        warn!(dropped, total = series.len(), "{msg}");
        warnings.push(msg);
    }

    if prices.len() < 2 {
        return Err(CpxError::insufficient_data(format!(
            "need at least 2 usable prices after cleaning; got {} of {}",
            prices.len(),
            series.len()
        )));
    }

    let log_prices: Vec<f64> = prices.iter().map(|p| p.ln()).collect();
    let returns = ReturnSeries::from_prices(&dates, &prices)?;
    let stats = ReturnStats::from_returns(returns.values());

    debug!(
        prices = prices.len(),
        returns = returns.len(),
        mean = stats.mean,
        std = stats.std,
        "preprocessed price series"
    );

    Ok(PreprocessedSeries {
        fingerprint,
        dates,
        prices,
        log_prices,
        returns,
        stats,
        dropped,
        warnings,
    })
}
