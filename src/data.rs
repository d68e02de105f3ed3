//! Cell values and the lenient parsers applied while normalizing an upload.
//!
//! Every parser here returns `Option`: a value that cannot be coerced becomes a
//! missing cell instead of an error.

use std::{borrow::Cow, fmt};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use rusqlite::types::Value as SqlValue;
use serde::Serialize;

/// Year every season-derived date is anchored to.
pub const SEASON_REFERENCE_YEAR: i32 = 2024;

/// Dates more than this many years past the current year are treated as
/// data-entry errors.
pub const MAX_FUTURE_YEARS: i32 = 2;

const PLACEHOLDER_TOKENS: &[&str] = &["", "nan", "none", "na", "n/a"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%b %d, %Y",
    "%d %b %Y",
    "%m/%d/%y",
    "%d/%m/%y",
];

/// `%Y` accepts any digit count, so `10/19/21` would otherwise read as year 21.
const MIN_FOUR_DIGIT_YEAR: i32 = 1000;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
];

const KNOWN_TYPOS: &[(&str, &str)] = &[
    ("Brookln", "Brooklyn"),
    ("Manhatan", "Manhattan"),
    ("Queen", "Queens"),
    ("Statenisland", "Staten Island"),
];

/// Storage type of a normalized column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Text,
    Integer,
    Real,
    Date,
}

impl StorageType {
    /// Column type used in the `CREATE TABLE` statement. Dates are kept as
    /// ISO-8601 text so they sort and compare lexicographically.
    pub fn sql_declaration(self) -> &'static str {
        match self {
            StorageType::Text | StorageType::Date => "TEXT",
            StorageType::Integer => "INTEGER",
            StorageType::Real => "REAL",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StorageType::Text => "text",
            StorageType::Integer => "integer",
            StorageType::Real => "real",
            StorageType::Date => "date",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
}

impl Cell {
    /// Wraps raw CSV text, mapping the empty string to [`Cell::Missing`].
    pub fn from_raw(raw: &str) -> Self {
        if raw.is_empty() {
            Cell::Missing
        } else {
            Cell::Text(raw.to_string())
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn to_sql(&self) -> SqlValue {
        match self {
            Cell::Missing => SqlValue::Null,
            Cell::Text(s) => SqlValue::Text(s.clone()),
            Cell::Integer(i) => SqlValue::Integer(*i),
            Cell::Float(f) => SqlValue::Real(*f),
            Cell::Date(d) => SqlValue::Text(format_date(*d)),
        }
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn is_placeholder(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    PLACEHOLDER_TOKENS.contains(&lowered.as_str())
}

/// Parses currency-like text such as `"$1,234.56"` into a number.
pub fn parse_money(value: &str) -> Option<f64> {
    let cleaned = value.replace(['$', ','], "");
    let cleaned = cleaned.trim();
    if is_placeholder(cleaned) {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_rating(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if is_placeholder(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Maps a season name onto a synthetic mid-season date in
/// [`SEASON_REFERENCE_YEAR`].
pub fn season_to_date(value: &str) -> Option<NaiveDate> {
    let (month, day) = match value.trim().to_lowercase().as_str() {
        "spring" => (3, 15),
        "summer" => (6, 15),
        "autumn" | "fall" => (9, 15),
        "winter" => (12, 15),
        _ => return None,
    };
    NaiveDate::from_ymd_opt(SEASON_REFERENCE_YEAR, month, day)
}

/// Parses free-form date text, accepting plain dates, datetimes and RFC 3339
/// timestamps. Month-first wins for ambiguous slash dates, and two-digit
/// years are only read through the `%y` formats.
pub fn parse_loose_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if is_placeholder(trimmed) {
        return None;
    }
    let plausible = |date: &NaiveDate| date.year() >= MIN_FOUR_DIGIT_YEAR;
    let date = DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .find(plausible);
    if date.is_some() {
        return date;
    }
    let datetime = DATETIME_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|parsed| parsed.date())
        .find(plausible);
    if datetime.is_some() {
        return datetime;
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|parsed| parsed.date_naive())
        .filter(plausible)
}

/// Drops dates whose year lies more than [`MAX_FUTURE_YEARS`] past `today`.
pub fn discard_implausible_future(date: NaiveDate, today: NaiveDate) -> Option<NaiveDate> {
    if date.year() > today.year() + MAX_FUTURE_YEARS {
        None
    } else {
        Some(date)
    }
}

/// Upper-cases the first letter of every alphabetic run and lower-cases the rest.
pub fn title_case(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_is_alpha = false;
    for ch in value.chars() {
        if ch.is_alphabetic() {
            if previous_is_alpha {
                output.extend(ch.to_lowercase());
            } else {
                output.extend(ch.to_uppercase());
            }
            previous_is_alpha = true;
        } else {
            output.push(ch);
            previous_is_alpha = false;
        }
    }
    output
}

pub fn correct_known_typos(value: &str) -> Cow<'_, str> {
    KNOWN_TYPOS
        .iter()
        .find(|(typo, _)| *typo == value)
        .map(|(_, fixed)| Cow::Borrowed(*fixed))
        .unwrap_or(Cow::Borrowed(value))
}

/// Trims, title-cases and corrects a free-text value. Placeholders become `None`.
pub fn normalize_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if is_placeholder(trimmed) {
        return None;
    }
    let cased = title_case(trimmed);
    Some(correct_known_typos(&cased).into_owned())
}

/// Picks the narrowest storage type that fits every non-missing value.
pub fn infer_storage_type<'a, I>(values: I) -> StorageType
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen_any = false;
    let mut all_integer = true;
    let mut all_real = true;
    for value in values {
        let trimmed = value.trim();
        if is_placeholder(trimmed) {
            continue;
        }
        seen_any = true;
        if all_integer && trimmed.parse::<i64>().is_err() {
            all_integer = false;
        }
        if trimmed.parse::<f64>().is_err() {
            all_real = false;
            break;
        }
    }
    match (seen_any, all_integer, all_real) {
        (false, _, _) => StorageType::Text,
        (true, true, _) => StorageType::Integer,
        (true, false, true) => StorageType::Real,
        _ => StorageType::Text,
    }
}

/// Converts raw text into a cell of the inferred storage type.
pub fn parse_inferred(value: &str, ty: StorageType) -> Cell {
    let trimmed = value.trim();
    match ty {
        StorageType::Text => Cell::from_raw(value),
        StorageType::Integer => trimmed
            .parse::<i64>()
            .map(Cell::Integer)
            .unwrap_or(Cell::Missing),
        StorageType::Real => trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Cell::Float)
            .unwrap_or(Cell::Missing),
        StorageType::Date => parse_loose_date(trimmed)
            .map(Cell::Date)
            .unwrap_or(Cell::Missing),
    }
}

pub fn display_sql_value(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Blob(bytes) => Some(format!("<{} bytes>", bytes.len())),
    }
}
