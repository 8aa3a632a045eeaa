// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use cpx_bayes::PosteriorBatch;
use cpx_core::math::{mean, sample_std};
use cpx_core::{ChangePointRecord, CpxError, DetectionMethod, pct_change};
use cpx_preprocess::PreprocessedSeries;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

pub const DEFAULT_PROBABILITY_THRESHOLD: f64 = 0.05;

/// Configuration for [`ResultAnalyzer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Posterior positions must be sampled strictly more often than this.
    pub probability_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            probability_threshold: DEFAULT_PROBABILITY_THRESHOLD,
        }
    }
}

impl AnalyzerConfig {
    fn validate(&self) -> Result<(), CpxError> {
        if !self.probability_threshold.is_finite()
            || !(0.0..1.0).contains(&self.probability_threshold)
        {
            return Err(CpxError::invalid_input(format!(
                "AnalyzerConfig.probability_threshold must be within [0, 1); got {}",
                self.probability_threshold
            )));
        }
        Ok(())
    }
}

fn by_probability(a: &ChangePointRecord, b: &ChangePointRecord) -> Ordering {
    b.probability
        .total_cmp(&a.probability)
        .then_with(|| a.date.cmp(&b.date))
        .then_with(|| a.index.cmp(&b.index))
}

/// Turns raw detector output into dated, quantified change-point records.
///
/// Segment statistics always come from the observed returns split at the
/// candidate index, never from sampled latent parameters.
#[derive(Clone, Debug, Default)]
pub struct ResultAnalyzer {
    config: AnalyzerConfig,
}

impl ResultAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, CpxError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Records for every sampled position whose posterior frequency exceeds
    /// the threshold, most probable first (ties: earlier date).
    pub fn from_posterior(
        &self,
        series: &PreprocessedSeries,
        batch: &PosteriorBatch,
    ) -> Result<Vec<ChangePointRecord>, CpxError> {
        if batch.n != series.n_returns() {
            return Err(CpxError::invalid_input(format!(
                "posterior was sampled on {} returns but the series has {}",
                batch.n,
                series.n_returns()
            )));
        }

        let frequencies = batch.position_frequencies();
        let mut records = Vec::new();
        for (position, probability) in &frequencies {
            if *probability <= self.config.probability_threshold {
                continue;
            }
            let index = series.return_index(*position).ok_or_else(|| {
                CpxError::invalid_input(format!(
                    "sampled position {position} lies outside (0, {})",
                    series.n_returns()
                ))
            })?;
            records.push(build_record(
                series,
                index,
                *probability,
                None,
                DetectionMethod::Bayesian,
            )?);
        }
        records.sort_by(by_probability);

        debug!(
            distinct_positions = frequencies.len(),
            kept = records.len(),
            threshold = self.config.probability_threshold,
            "analyzed posterior"
        );
        Ok(records)
    }

    /// Records for deterministic split positions.
    ///
    /// Positions are mapped through [`PreprocessedSeries::return_index`];
    /// those outside `(0, n)` are dropped. Probability is fixed at 1.0 and
    /// confidence is the standardized mean shift.
    pub fn from_indices(
        &self,
        series: &PreprocessedSeries,
        splits: &[usize],
        method: DetectionMethod,
    ) -> Result<Vec<ChangePointRecord>, CpxError> {
        if method.is_probabilistic() {
            return Err(CpxError::invalid_input(format!(
                "{method} output must be analyzed from its posterior"
            )));
        }
        let mut indices: Vec<usize> = splits
            .iter()
            .filter_map(|&split| series.return_index(split))
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let mut records = Vec::with_capacity(indices.len());
        for index in indices {
            records.push(build_record(series, index, 1.0, Some(series.stats().std), method)?);
        }
        records.sort_by(by_probability);
        Ok(records)
    }
}

/// `shift_scale` is `Some(s)` for deterministic records, whose confidence is
/// `|mean_after - mean_before| / s`; Bayesian confidence equals probability.
fn build_record(
    series: &PreprocessedSeries,
    index: usize,
    probability: f64,
    shift_scale: Option<f64>,
    method: DetectionMethod,
) -> Result<ChangePointRecord, CpxError> {
    let returns = series.returns().values();
    let prices = series.prices();
    if index == 0 || index >= returns.len() {
        return Err(CpxError::invalid_input(format!(
            "change point index {index} must lie in (0, {})",
            returns.len()
        )));
    }
    let date = *series.dates().get(index).ok_or_else(|| {
        CpxError::invalid_input(format!("no price date at change point index {index}"))
    })?;

    let (before, after) = returns.split_at(index);
    let mean_before = mean(before);
    let mean_after = mean(after);
    let price_before = mean(&prices[..index]);
    let price_after = mean(&prices[index..]);

    let confidence = match shift_scale {
        Some(scale) => (mean_after - mean_before).abs() / scale,
        None => probability,
    };

    Ok(ChangePointRecord {
        index,
        date,
        probability,
        confidence,
        mean_before,
        mean_after,
        volatility_before: sample_std(before),
        volatility_after: sample_std(after),
        price_before,
        price_after,
        pct_change: pct_change(price_before, price_after),
        method,
    })
}
