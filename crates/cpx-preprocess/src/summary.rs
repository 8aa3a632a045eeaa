// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::PreprocessedSeries;
use chrono::NaiveDate;
use cpx_core::math::{mean, quantile_sorted, sample_std};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const CALENDAR_DAYS_PER_YEAR: f64 = 365.0;
/// Lag-1 return autocorrelation beyond which volatility is called clustered.
const CLUSTERING_AUTOCORRELATION: f64 = 0.1;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceStats {
    pub current: f64,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    pub q1: f64,
    pub q3: f64,
    pub range: f64,
}

/// Statistics of simple daily returns, expressed in percent.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReturnStatsPct {
    pub mean_daily: f64,
    pub daily_volatility: f64,
    pub annualized_volatility: f64,
    /// `mean / std * sqrt(252)`; zero when the returns have no spread.
    pub sharpe_ratio: f64,
    pub positive_days: usize,
    pub negative_days: usize,
    pub max_gain: f64,
    pub max_loss: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub observations: usize,
}

/// Descriptive metrics of a cleaned price series.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeriesSummary {
    pub price: PriceStats,
    pub returns: ReturnStatsPct,
    pub date_range: DateRange,
    /// Least-squares price slope per observation, scaled to a year of days.
    pub trend_per_year: f64,
    /// Lag-1 autocorrelation of simple returns; zero when undefined.
    pub return_autocorrelation: f64,
    pub volatility_clustering: bool,
}

/// Ordinary least-squares slope of `values` against their index.
fn index_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    if sxx > 0.0 { sxy / sxx } else { 0.0 }
}

/// Pearson correlation of `values[1..]` with `values[..len - 1]`.
fn lag1_autocorrelation(values: &[f64]) -> f64 {
    if values.len() < 3 {
        return 0.0;
    }
    let (head, tail) = (&values[..values.len() - 1], &values[1..]);
    let (head_mean, tail_mean) = (mean(head), mean(tail));
    let (mut cov, mut head_var, mut tail_var) = (0.0, 0.0, 0.0);
    for (a, b) in head.iter().zip(tail) {
        cov += (a - head_mean) * (b - tail_mean);
        head_var += (a - head_mean).powi(2);
        tail_var += (b - tail_mean).powi(2);
    }
    let denominator = (head_var * tail_var).sqrt();
    if denominator > 0.0 { cov / denominator } else { 0.0 }
}

pub fn summarize(series: &PreprocessedSeries) -> SeriesSummary {
    let prices = series.prices();
    let dates = series.dates();

    let mut sorted = prices.to_vec();
    sorted.sort_by(f64::total_cmp);
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let q1 = quantile_sorted(&sorted, 0.25);
    let q3 = quantile_sorted(&sorted, 0.75);

    let price = PriceStats {
        current: prices[prices.len() - 1],
        mean: mean(prices),
        median: quantile_sorted(&sorted, 0.5),
        min,
        max,
        std: sample_std(prices),
        q1,
        q3,
        range: max - min,
    };

    let simple: Vec<f64> = prices
        .windows(2)
        .map(|w| (w[1] / w[0] - 1.0) * 100.0)
        .collect();
    let mean_daily = mean(&simple);
    let daily_volatility = sample_std(&simple);
    let sharpe_ratio = if daily_volatility > 0.0 {
        mean_daily / daily_volatility * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    let returns = ReturnStatsPct {
        mean_daily,
        daily_volatility,
        annualized_volatility: daily_volatility * TRADING_DAYS_PER_YEAR.sqrt(),
        sharpe_ratio,
        positive_days: simple.iter().filter(|r| **r > 0.0).count(),
        negative_days: simple.iter().filter(|r| **r < 0.0).count(),
        max_gain: simple.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        max_loss: simple.iter().copied().fold(f64::INFINITY, f64::min),
    };

    let return_autocorrelation = lag1_autocorrelation(&simple);

    SeriesSummary {
        price,
        returns,
        trend_per_year: index_slope(prices) * CALENDAR_DAYS_PER_YEAR,
        return_autocorrelation,
        volatility_clustering: return_autocorrelation.abs() > CLUSTERING_AUTOCORRELATION,
        date_range: DateRange {
            start: dates[0],
            end: dates[dates.len() - 1],
            observations: prices.len(),
        },
    }
}
