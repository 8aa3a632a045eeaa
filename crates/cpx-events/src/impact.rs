// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::correlator::Correlation;
use crate::event::ImpactMagnitude;
use chrono::NaiveDate;
use cpx_core::{ChangePointRecord, CpxError, DetectionMethod, pct_change};
use std::cmp::Ordering;
use tracing::info;

/// Configuration for [`ImpactQuantifier`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImpactConfig {
    /// Records with a combined confidence below this are dropped.
    pub min_combined_confidence: f64,
}

impl ImpactConfig {
    fn validate(&self) -> Result<(), CpxError> {
        if !self.min_combined_confidence.is_finite()
            || !(0.0..=1.0).contains(&self.min_combined_confidence)
        {
            return Err(CpxError::invalid_input(format!(
                "ImpactConfig.min_combined_confidence must be within [0, 1]; got {}",
                self.min_combined_confidence
            )));
        }
        Ok(())
    }
}

/// A ranked change-point/event pairing.
///
/// Price fields are segment means of the level series; `pct_change` is
/// always `(price_after / price_before - 1) * 100`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ImpactRecord {
    pub event_name: String,
    pub event_date: NaiveDate,
    pub change_point_date: NaiveDate,
    pub change_point_index: usize,
    pub days_difference: u32,
    pub price_before: f64,
    pub price_after: f64,
    pub pct_change: f64,
    /// Shift of the mean daily log-return, in percentage points.
    pub mean_shift_pct: f64,
    pub volatility_before: f64,
    pub volatility_after: f64,
    pub volatility_change_pct: f64,
    pub probability: f64,
    pub proximity: f64,
    /// `probability * proximity`, the primary ranking key.
    pub combined_confidence: f64,
    pub category: String,
    pub impact_magnitude: ImpactMagnitude,
    pub method: DetectionMethod,
}

fn by_rank(a: &ImpactRecord, b: &ImpactRecord) -> Ordering {
    b.combined_confidence
        .total_cmp(&a.combined_confidence)
        .then_with(|| a.change_point_date.cmp(&b.change_point_date))
        .then_with(|| a.days_difference.cmp(&b.days_difference))
        .then_with(|| a.event_name.cmp(&b.event_name))
}

/// Turns correlations into impact records ordered by combined confidence.
#[derive(Clone, Debug, Default)]
pub struct ImpactQuantifier {
    config: ImpactConfig,
}

impl ImpactQuantifier {
    pub fn new(config: ImpactConfig) -> Result<Self, CpxError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ImpactConfig {
        &self.config
    }

    /// Ties in combined confidence go to the earlier change point, then the
    /// closer event, then the event name.
    pub fn quantify(
        &self,
        change_points: &[ChangePointRecord],
        correlations: &[Correlation],
    ) -> Result<Vec<ImpactRecord>, CpxError> {
        let mut records = Vec::with_capacity(correlations.len());
        for correlation in correlations {
            let change_point = change_points.get(correlation.change_point).ok_or_else(|| {
                CpxError::invalid_input(format!(
                    "correlation refers to change point {} but only {} were supplied",
                    correlation.change_point,
                    change_points.len()
                ))
            })?;
            let record = impact_record(change_point, correlation);
            if record.combined_confidence > 0.0
                && record.combined_confidence >= self.config.min_combined_confidence
            {
                records.push(record);
            }
        }
        records.sort_by(by_rank);

        info!(
            correlations = correlations.len(),
            impacts = records.len(),
            top_confidence = records.first().map_or(0.0, |r| r.combined_confidence),
            "quantified event impacts"
        );
        Ok(records)
    }
}

fn impact_record(change_point: &ChangePointRecord, correlation: &Correlation) -> ImpactRecord {
    let probability = change_point.probability.clamp(0.0, 1.0);
    let proximity = correlation.proximity.clamp(0.0, 1.0);
    ImpactRecord {
        event_name: correlation.event.name.clone(),
        event_date: correlation.event.start_date,
        change_point_date: change_point.date,
        change_point_index: change_point.index,
        days_difference: correlation.days_diff,
        price_before: change_point.price_before,
        price_after: change_point.price_after,
        pct_change: pct_change(change_point.price_before, change_point.price_after),
        mean_shift_pct: (change_point.mean_after - change_point.mean_before) * 100.0,
        volatility_before: change_point.volatility_before,
        volatility_after: change_point.volatility_after,
        volatility_change_pct: pct_change(
            change_point.volatility_before,
            change_point.volatility_after,
        ),
        probability,
        proximity,
        combined_confidence: probability * proximity,
        category: correlation.event.category.clone(),
        impact_magnitude: correlation.event.impact_magnitude,
        method: change_point.method,
    }
}
