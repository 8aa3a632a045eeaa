// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! CSV loaders for price series and event catalogs.
//!
//! Both formats need a header row. Header names are matched ignoring case,
//! spaces, `_` and `-`, so `Event_Name`, `event name` and `eventname` are
//! the same column. Fields may be double-quoted.

use crate::error::CliError;
use chrono::NaiveDate;
use cpx_core::{PricePoint, PriceSeries};
use cpx_events::{EventCatalog, EventRecord, ImpactMagnitude};
use std::fs;
use std::path::Path;
use tracing::debug;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d-%b-%y", "%m/%d/%Y", "%b %d, %Y"];

const DATE_COLUMNS: [&str; 1] = ["date"];
const PRICE_COLUMNS: [&str; 3] = ["price", "close", "value"];
const EVENT_NAME_COLUMNS: [&str; 3] = ["eventname", "name", "event"];
const EVENT_DATE_COLUMNS: [&str; 2] = ["startdate", "date"];
const CATEGORY_COLUMNS: [&str; 1] = ["category"];
const MAGNITUDE_COLUMNS: [&str; 3] = ["impactmagnitude", "impact", "magnitude"];
const DESCRIPTION_COLUMNS: [&str; 1] = ["description"];
const DURATION_COLUMNS: [&str; 2] = ["durationdays", "duration"];

/// Parses a calendar date in ISO (`2020-04-21`), `21-Apr-20`, US
/// (`04/21/2020`) or long (`Apr 21, 2020`) form.
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| format!("unrecognized date '{trimmed}'"))
}

struct CsvTable {
    header: Vec<String>,
    /// `(1-based line number, fields)`.
    rows: Vec<(usize, Vec<String>)>,
}

impl CsvTable {
    fn parse(raw: &str, origin: &str) -> Result<Self, CliError> {
        let mut lines = raw
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim_end_matches('\r')))
            .filter(|(_, line)| !line.trim().is_empty());

        let (header_line, header_raw) = lines
            .next()
            .ok_or_else(|| CliError::csv(origin, 1, "input is empty"))?;
        let header: Vec<String> = split_fields(header_raw)
            .map_err(|message| CliError::csv(origin, header_line, message))?
            .iter()
            .map(|name| normalize_header(name))
            .collect();

        let mut rows = vec![];
        for (line, raw_row) in lines {
            let fields =
                split_fields(raw_row).map_err(|message| CliError::csv(origin, line, message))?;
            if fields.len() != header.len() {
                return Err(CliError::csv(
                    origin,
                    line,
                    format!(
                        "row has {} fields but the header has {}",
                        fields.len(),
                        header.len()
                    ),
                ));
            }
            rows.push((line, fields));
        }
        Ok(Self { header, rows })
    }

    fn column(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.header.iter().position(|name| name == alias))
    }

    fn required_column(&self, aliases: &[&str], origin: &str) -> Result<usize, CliError> {
        self.column(aliases).ok_or_else(|| {
            CliError::csv(
                origin,
                1,
                format!("missing required column (one of: {})", aliases.join(", ")),
            )
        })
    }
}

fn normalize_header(name: &str) -> String {
    name.trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Splits one CSV record. Quoted fields may contain commas and `""`
/// escapes; unquoted fields are trimmed.
fn split_fields(line: &str) -> Result<Vec<String>, String> {
    let mut fields = vec![];
    let mut current = String::new();
    let mut in_quotes = false;
    let mut was_quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() && !was_quoted => {
                current.clear();
                in_quotes = true;
                was_quoted = true;
            }
            ',' if !in_quotes => {
                fields.push(finish_field(&current, was_quoted));
                current.clear();
                was_quoted = false;
            }
            _ => current.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(finish_field(&current, was_quoted));
    Ok(fields)
}

fn finish_field(raw: &str, quoted: bool) -> String {
    if quoted {
        raw.trim_end().to_string()
    } else {
        raw.trim().to_string()
    }
}

/// Parses a price CSV with `Date` and `Price` columns.
///
/// Rows are sorted by date; duplicate dates and unparseable cells are
/// rejected with their line number. Non-finite prices are kept and left to
/// the preprocessor, which drops them with a warning.
pub fn parse_prices(raw: &str, origin: &str) -> Result<PriceSeries, CliError> {
    let table = CsvTable::parse(raw, origin)?;
    let date_col = table.required_column(&DATE_COLUMNS, origin)?;
    let price_col = table.required_column(&PRICE_COLUMNS, origin)?;

    let mut points = Vec::with_capacity(table.rows.len());
    for (line, fields) in &table.rows {
        let date =
            parse_date(&fields[date_col]).map_err(|message| CliError::csv(origin, *line, message))?;
        let cell = &fields[price_col];
        let price = cell.parse::<f64>().map_err(|_| {
            CliError::csv(origin, *line, format!("price '{cell}' is not a number"))
        })?;
        points.push((*line, PricePoint { date, price }));
    }
    if points.is_empty() {
        return Err(CliError::csv(origin, 1, "no price rows after the header"));
    }

    points.sort_by_key(|(_, point)| point.date);
    for pair in points.windows(2) {
        if pair[0].1.date == pair[1].1.date {
            return Err(CliError::csv(
                origin,
                pair[1].0,
                format!("duplicate date {}", pair[1].1.date),
            ));
        }
    }

    debug!(origin, rows = points.len(), "loaded price rows");
    Ok(PriceSeries::new(
        points.into_iter().map(|(_, point)| point).collect(),
    )?)
}

/// Parses an event CSV with `Event_Name`, `Start_Date`, `Category` and
/// `Impact_Magnitude` columns, plus optional `Description` and
/// `Duration_Days`.
pub fn parse_events(raw: &str, origin: &str) -> Result<EventCatalog, CliError> {
    let table = CsvTable::parse(raw, origin)?;
    let name_col = table.required_column(&EVENT_NAME_COLUMNS, origin)?;
    let date_col = table.required_column(&EVENT_DATE_COLUMNS, origin)?;
    let category_col = table.required_column(&CATEGORY_COLUMNS, origin)?;
    let magnitude_col = table.required_column(&MAGNITUDE_COLUMNS, origin)?;
    let description_col = table.column(&DESCRIPTION_COLUMNS);
    let duration_col = table.column(&DURATION_COLUMNS);

    let mut events = Vec::with_capacity(table.rows.len());
    for (line, fields) in &table.rows {
        let at_line = |message: String| CliError::csv(origin, *line, message);
        let start_date = parse_date(&fields[date_col]).map_err(at_line)?;
        let magnitude: ImpactMagnitude = fields[magnitude_col]
            .parse()
            .map_err(|err: cpx_core::CpxError| at_line(err.to_string()))?;
        let mut event = EventRecord::new(
            fields[name_col].as_str(),
            start_date,
            fields[category_col].as_str(),
            magnitude,
        )
        .map_err(|err| at_line(err.to_string()))?;

        if let Some(col) = description_col
            && !fields[col].is_empty()
        {
            event = event.with_description(fields[col].as_str());
        }
        if let Some(col) = duration_col
            && !fields[col].is_empty()
        {
            let cell = &fields[col];
            let days = cell
                .parse::<u32>()
                .map_err(|_| at_line(format!("duration '{cell}' is not a whole number of days")))?;
            event = event.with_duration(days);
        }
        events.push(event);
    }

    debug!(origin, events = events.len(), "loaded event rows");
    Ok(EventCatalog::new(events))
}

fn read(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path)
        .map_err(|source| CliError::io(format!("failed to read '{}'", path.display()), source))
}

pub fn load_prices(path: &Path) -> Result<PriceSeries, CliError> {
    parse_prices(&read(path)?, &path.display().to_string())
}

pub fn load_events(path: &Path) -> Result<EventCatalog, CliError> {
    parse_events(&read(path)?, &path.display().to_string())
}
