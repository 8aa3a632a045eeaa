// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::catalog::EventCatalog;
use crate::event::EventRecord;
use chrono::{Days, NaiveDate};
use cpx_core::math::{mean, sample_std};
use cpx_core::{CpxError, PriceSeries};
use tracing::debug;

/// Default half-width of the event window in calendar days.
pub const DEFAULT_EVENT_WINDOW_DAYS: u32 = 60;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Configuration for [`analyze_event_window`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventWindowConfig {
    pub window_days: u32,
}

impl Default for EventWindowConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_EVENT_WINDOW_DAYS,
        }
    }
}

impl EventWindowConfig {
    fn validate(&self) -> Result<(), CpxError> {
        if self.window_days == 0 {
            return Err(CpxError::invalid_window(
                "EventWindowConfig.window_days must be >= 1; got 0",
            ));
        }
        Ok(())
    }
}

/// Price behaviour in the windows on either side of an event.
///
/// The pre-window is `[start - w, start)` and the post-window is
/// `(start, start + w]`; the event day itself belongs to neither. Empty
/// windows contribute zeros.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct EventWindowAnalysis {
    pub event: EventRecord,
    pub window_days: u32,
    pub price_before: f64,
    pub price_after: f64,
    pub price_change_pct: f64,
    /// Annualized standard deviation of log-returns inside the pre-window.
    pub volatility_before: f64,
    pub volatility_after: f64,
    pub volatility_change: f64,
    /// `min(min(post) - max(pre), 0)`, or 0 when either side is empty.
    pub max_drawdown: f64,
    pub points_before: usize,
    pub points_after: usize,
}

fn annualized_volatility(prices: &[f64]) -> f64 {
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    sample_std(&returns) * TRADING_DAYS_PER_YEAR.sqrt()
}

fn shift(date: NaiveDate, days: u32, forward: bool) -> NaiveDate {
    let delta = Days::new(u64::from(days));
    let shifted = if forward {
        date.checked_add_days(delta)
    } else {
        date.checked_sub_days(delta)
    };
    shifted.unwrap_or(if forward { NaiveDate::MAX } else { NaiveDate::MIN })
}

/// Compares prices in the windows before and after `event`.
pub fn analyze_event_window(
    series: &PriceSeries,
    event: &EventRecord,
    config: &EventWindowConfig,
) -> Result<EventWindowAnalysis, CpxError> {
    config.validate()?;
    let start = event.start_date;
    let lower = shift(start, config.window_days, false);
    let upper = shift(start, config.window_days, true);

    let pre: Vec<f64> = series
        .points()
        .iter()
        .filter(|p| p.date >= lower && p.date < start)
        .map(|p| p.price)
        .collect();
    let post: Vec<f64> = series
        .points()
        .iter()
        .filter(|p| p.date > start && p.date <= upper)
        .map(|p| p.price)
        .collect();

    let price_before = mean(&pre);
    let price_after = mean(&post);
    let price_change_pct = if price_before > 0.0 {
        (price_after - price_before) / price_before * 100.0
    } else {
        0.0
    };
    let volatility_before = annualized_volatility(&pre);
    let volatility_after = annualized_volatility(&post);
    let max_drawdown = match (
        pre.iter().copied().reduce(f64::max),
        post.iter().copied().reduce(f64::min),
    ) {
        (Some(pre_max), Some(post_min)) => (post_min - pre_max).min(0.0),
        _ => 0.0,
    };

    debug!(
        event = %event.name,
        window_days = config.window_days,
        points_before = pre.len(),
        points_after = post.len(),
        "analyzed event window"
    );

    Ok(EventWindowAnalysis {
        event: event.clone(),
        window_days: config.window_days,
        price_before,
        price_after,
        price_change_pct,
        volatility_before,
        volatility_after,
        volatility_change: volatility_after - volatility_before,
        max_drawdown,
        points_before: pre.len(),
        points_after: post.len(),
    })
}

/// Looks the event up by case-insensitive name substring, then analyzes it.
pub fn analyze_named_event(
    series: &PriceSeries,
    catalog: &EventCatalog,
    name: &str,
    config: &EventWindowConfig,
) -> Result<EventWindowAnalysis, CpxError> {
    let event = catalog
        .find_by_name(name)
        .ok_or_else(|| CpxError::invalid_input(format!("no event matches '{name}'")))?;
    analyze_event_window(series, event, config)
}
