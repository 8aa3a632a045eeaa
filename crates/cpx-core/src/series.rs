// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::CpxError;
use chrono::NaiveDate;

/// One daily observation.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Chronologically ordered price observations with strictly increasing dates.
///
/// Prices are kept as loaded; non-finite or non-positive values are dropped
/// later by the preprocessor, which reports how many were removed.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(points: Vec<PricePoint>) -> Result<Self, CpxError> {
        for (idx, pair) in points.windows(2).enumerate() {
            if pair[1].date <= pair[0].date {
                return Err(CpxError::invalid_input(format!(
                    "price dates must be strictly increasing; row {} ({}) is not after row {} ({})",
                    idx + 1,
                    pair[1].date,
                    idx,
                    pair[0].date
                )));
            }
        }
        Ok(Self { points })
    }

    /// Builds a series from parallel date and price columns.
    pub fn from_columns(dates: &[NaiveDate], prices: &[f64]) -> Result<Self, CpxError> {
        if dates.len() != prices.len() {
            return Err(CpxError::invalid_input(format!(
                "date and price columns differ in length: dates={}, prices={}",
                dates.len(),
                prices.len()
            )));
        }
        Self::new(
            dates
                .iter()
                .zip(prices)
                .map(|(&date, &price)| PricePoint { date, price })
                .collect(),
        )
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Inclusive date-range filter. Open bounds are unbounded.
    pub fn between(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self, CpxError> {
        let points: Vec<PricePoint> = self
            .points
            .iter()
            .filter(|p| start.is_none_or(|s| p.date >= s) && end.is_none_or(|e| p.date <= e))
            .copied()
            .collect();
        if points.is_empty() {
            return Err(CpxError::insufficient_data(format!(
                "no price observations between {} and {}",
                start.map_or_else(|| "-inf".to_string(), |d| d.to_string()),
                end.map_or_else(|| "+inf".to_string(), |d| d.to_string()),
            )));
        }
        Ok(Self { points })
    }
}

/// Log-returns derived from a cleaned price series.
///
/// `values[i]` is the return from `dates[i]` to `dates[i + 1]`, so `dates`
/// always holds one more entry than `values`.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnSeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl ReturnSeries {
    pub fn from_prices(dates: &[NaiveDate], prices: &[f64]) -> Result<Self, CpxError> {
        if dates.len() != prices.len() {
            return Err(CpxError::invalid_input(format!(
                "date and price columns differ in length: dates={}, prices={}",
                dates.len(),
                prices.len()
            )));
        }
        if prices.len() < 2 {
            return Err(CpxError::insufficient_data(format!(
                "log-returns need at least 2 prices; got {}",
                prices.len()
            )));
        }
        let mut values = Vec::with_capacity(prices.len() - 1);
        for (idx, pair) in prices.windows(2).enumerate() {
            if pair[0] <= 0.0 || pair[1] <= 0.0 {
                return Err(CpxError::invalid_input(format!(
                    "log-returns need positive prices; got {} -> {} at index {idx}",
                    pair[0], pair[1]
                )));
            }
            let r = (pair[1] / pair[0]).ln();
            if !r.is_finite() {
                return Err(CpxError::numerical_issue(format!(
                    "non-finite log-return at index {idx}: {} -> {}",
                    pair[0], pair[1]
                )));
            }
            values.push(r);
        }
        Ok(Self {
            dates: dates.to_vec(),
            values,
        })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Price dates backing the returns; one longer than [`Self::values`].
    pub fn price_dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Date at which return `index` starts.
    pub fn date_at(&self, index: usize) -> Option<NaiveDate> {
        if index < self.values.len() {
            self.dates.get(index).copied()
        } else {
            None
        }
    }
}
