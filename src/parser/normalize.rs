use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Month, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::extract::{Field, RawFieldSet};

/// "14 January 2022", "1st Mar, 2022", "21 Jan 2022"
static DAY_MONTH_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?:st|nd|rd|th)?\s+([A-Za-z]+)\.?,?\s+(\d{4})$").unwrap()
});
static ISO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap());

/// Canonical metadata of one case. Field order is the JSON output order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub case_title: String,
    pub case_number: String,
    /// `None` when the page had no date or an unparsable one; serialized as `null`.
    #[serde(with = "iso_date")]
    pub date_delivered: Option<NaiveDate>,
    pub judge: String,
    pub court: String,
    pub parties: String,
    pub advocates: String,
    pub citation: String,
}

impl From<&CaseRecord> for RawFieldSet {
    fn from(record: &CaseRecord) -> Self {
        let mut raw = RawFieldSet::default();
        raw.set(Field::CaseTitle, record.case_title.as_str());
        raw.set(Field::CaseNumber, record.case_number.as_str());
        raw.set(
            Field::DateDelivered,
            record
                .date_delivered
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        );
        raw.set(Field::Judge, record.judge.as_str());
        raw.set(Field::Court, record.court.as_str());
        raw.set(Field::Parties, record.parties.as_str());
        raw.set(Field::Advocates, record.advocates.as_str());
        raw.set(Field::Citation, record.citation.as_str());
        raw
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum DateFormatError {
    #[error("no date given")]
    Empty,
    #[error("expected `day Month year`, got `{0}`")]
    Pattern(String),
    #[error("unknown month `{0}`")]
    Month(String),
    #[error("no such calendar day: {0}")]
    OutOfRange(String),
}

/// Trim every field and convert the delivery date to a calendar date.
///
/// A bad date never fails the record: it becomes `None` and is logged.
pub fn normalize(raw: &RawFieldSet) -> CaseRecord {
    let text = |field: Field| raw.get(field).trim().to_string();

    let date_delivered = match parse_delivery_date(raw.get(Field::DateDelivered)) {
        Ok(date) => Some(date),
        Err(DateFormatError::Empty) => {
            debug!(case = raw.get(Field::CaseTitle).trim(), "No delivery date");
            None
        }
        Err(err) => {
            warn!(case = raw.get(Field::CaseTitle).trim(), error = %err, "Unparsable delivery date");
            None
        }
    };

    CaseRecord {
        case_title: text(Field::CaseTitle),
        case_number: text(Field::CaseNumber),
        date_delivered,
        judge: text(Field::Judge),
        court: text(Field::Court),
        parties: text(Field::Parties),
        advocates: text(Field::Advocates),
        citation: text(Field::Citation),
    }
}

fn parse_delivery_date(raw: &str) -> Result<NaiveDate, DateFormatError> {
    let value = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if value.is_empty() {
        return Err(DateFormatError::Empty);
    }

    // Already-normalized input, so normalizing twice is stable.
    if let Some(caps) = ISO_RE.captures(&value) {
        let (y, m, d) = (
            caps[1].parse::<i32>(),
            caps[2].parse::<u32>(),
            caps[3].parse::<u32>(),
        );
        return match (y, m, d) {
            (Ok(y), Ok(m), Ok(d)) => {
                NaiveDate::from_ymd_opt(y, m, d).ok_or(DateFormatError::OutOfRange(value))
            }
            _ => Err(DateFormatError::Pattern(value)),
        };
    }

    let caps = DAY_MONTH_YEAR_RE
        .captures(&value)
        .ok_or_else(|| DateFormatError::Pattern(value.clone()))?;
    let day: u32 = caps[1]
        .parse()
        .map_err(|_| DateFormatError::Pattern(value.clone()))?;
    let month = Month::from_str(&caps[2]).map_err(|_| DateFormatError::Month(caps[2].to_string()))?;
    let year: i32 = caps[3]
        .parse()
        .map_err(|_| DateFormatError::Pattern(value.clone()))?;

    NaiveDate::from_ymd_opt(year, month.number_from_month(), day)
        .ok_or(DateFormatError::OutOfRange(value))
}

mod iso_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => s.serialize_str(&d.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let value: Option<String> = Option::deserialize(d)?;
        value
            .map(|v| NaiveDate::parse_from_str(&v, FORMAT).map_err(serde::de::Error::custom))
            .transpose()
    }
}
