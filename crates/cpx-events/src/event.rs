// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use chrono::{Days, NaiveDate};
use cpx_core::CpxError;
use std::fmt;
use std::str::FromStr;

/// Duration assumed for events that do not state one.
pub const DEFAULT_EVENT_DURATION_DAYS: u32 = 30;

/// Ordinal severity of an event.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImpactMagnitude {
    Low,
    Medium,
    High,
    #[cfg_attr(feature = "serde", serde(rename = "Very High"))]
    VeryHigh,
}

impl ImpactMagnitude {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::VeryHigh];

    /// 1 for `Low` through 4 for `VeryHigh`.
    pub fn score(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::VeryHigh => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::VeryHigh => "Very High",
        }
    }
}

impl fmt::Display for ImpactMagnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImpactMagnitude {
    type Err = CpxError;

    /// Case-insensitive; inner whitespace, `_` and `-` are interchangeable.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "veryhigh" => Ok(Self::VeryHigh),
            _ => Err(CpxError::invalid_input(format!(
                "unknown impact magnitude '{raw}'; expected Low, Medium, High or Very High"
            ))),
        }
    }
}

/// A dated market event from the catalog.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub name: String,
    pub start_date: NaiveDate,
    pub category: String,
    pub impact_magnitude: ImpactMagnitude,
    #[cfg_attr(feature = "serde", serde(default))]
    pub duration_days: Option<u32>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub description: Option<String>,
}

impl EventRecord {
    pub fn new(
        name: impl Into<String>,
        start_date: NaiveDate,
        category: impl Into<String>,
        impact_magnitude: ImpactMagnitude,
    ) -> Result<Self, CpxError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CpxError::invalid_input("event name must not be empty"));
        }
        Ok(Self {
            name,
            start_date,
            category: category.into(),
            impact_magnitude,
            duration_days: None,
            description: None,
        })
    }

    pub fn with_duration(mut self, days: u32) -> Self {
        self.duration_days = Some(days);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// `start_date + duration`, defaulting to 30 days; saturates at the
    /// calendar maximum.
    pub fn end_date(&self) -> NaiveDate {
        let days = self.duration_days.unwrap_or(DEFAULT_EVENT_DURATION_DAYS);
        self.start_date
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Absolute calendar distance in days between the event start and `date`.
    pub fn days_from(&self, date: NaiveDate) -> u32 {
        let days = (self.start_date - date).num_days().unsigned_abs();
        u32::try_from(days).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::{EventRecord, ImpactMagnitude};
    use chrono::NaiveDate;
    use cpx_core::CpxError;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn magnitude_parses_loosely_and_orders_by_severity() {
        assert_eq!("very high".parse::<ImpactMagnitude>(), Ok(ImpactMagnitude::VeryHigh));
        assert_eq!("Very_High".parse::<ImpactMagnitude>(), Ok(ImpactMagnitude::VeryHigh));
        assert_eq!(" MEDIUM ".parse::<ImpactMagnitude>(), Ok(ImpactMagnitude::Medium));
        assert!(matches!(
            "extreme".parse::<ImpactMagnitude>(),
            Err(CpxError::InvalidInput(_))
        ));
        let scores: Vec<u8> = ImpactMagnitude::ALL.iter().map(|m| m.score()).collect();
        assert_eq!(scores, vec![1, 2, 3, 4]);
        assert!(ImpactMagnitude::Low < ImpactMagnitude::VeryHigh);
        assert_eq!(ImpactMagnitude::VeryHigh.to_string(), "Very High");
    }

    #[test]
    fn end_date_defaults_to_thirty_days() {
        let event = EventRecord::new(
            "Gulf War",
            date(1990, 8, 2),
            "Geopolitical",
            ImpactMagnitude::VeryHigh,
        )
        .expect("valid event");
        assert_eq!(event.end_date(), date(1990, 9, 1));
        assert_eq!(event.clone().with_duration(210).end_date(), date(1991, 2, 28));
    }

    #[test]
    fn days_from_is_symmetric() {
        let event = EventRecord::new("x", date(2020, 3, 11), "Economic", ImpactMagnitude::High)
            .expect("valid event");
        assert_eq!(event.days_from(date(2020, 3, 1)), 10);
        assert_eq!(event.days_from(date(2020, 3, 21)), 10);
        assert_eq!(event.days_from(date(2020, 3, 11)), 0);
    }

    #[test]
    fn blank_name_is_rejected() {
        assert!(matches!(
            EventRecord::new("  ", date(2020, 1, 1), "Economic", ImpactMagnitude::Low),
            Err(CpxError::InvalidInput(_))
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn magnitude_serializes_with_display_name() {
        let json = serde_json::to_string(&ImpactMagnitude::VeryHigh).expect("serializes");
        assert_eq!(json, "\"Very High\"");
    }
}
