use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// A raw price snapshot as supplied by the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Departure date, `YYYYMMDD`
    #[serde(rename = "Date")]
    pub date: String,
    /// Snapshots remaining before departure; larger means observed earlier
    #[serde(rename = "State")]
    pub state: i64,
    #[serde(rename = "MinimumPrice")]
    pub minimum_price: String,
}

/// A record with its date and price parsed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceObservation {
    pub departure: NaiveDate,
    pub state: i64,
    pub price: f64,
}

impl PriceObservation {
    pub fn parse(record: &RawRecord) -> PipelineResult<Self> {
        Ok(Self {
            departure: parse_date(&record.date)?,
            state: record.state,
            price: parse_price(&record.minimum_price)?,
        })
    }

    /// Departure date as the integer `YYYYMMDD`, used for split boundaries
    pub fn departure_key(&self) -> u32 {
        date_key(self.departure)
    }
}

pub fn date_key(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

pub fn parse_date(raw: &str) -> PipelineResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d")
        .map_err(|e| PipelineError::InvalidRecord(format!("bad date '{}': {}", raw, e)))
}

/// Parse a scraped price string such as `"€ 1.234,50"`, `"68.43 EUR"`,
/// `"12 345 Ft"` or `"3.000 ден"`. When both `.` and `,` appear, the later one
/// is the decimal separator. A lone comma with no dot is a decimal separator.
/// Dots with no comma are thousands separators when every group after the
/// first has exactly three digits (`"3.000"` is 3000), decimal otherwise.
pub fn parse_price(raw: &str) -> PipelineResult<f64> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
        .collect();

    let normalized = match (kept.rfind('.'), kept.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => kept.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => kept.replace(',', ""),
        (None, Some(_)) if kept.matches(',').count() == 1 => kept.replace(',', "."),
        (None, Some(_)) => kept.replace(',', ""),
        (Some(_), None) if is_dot_grouped(&kept) => kept.replace('.', ""),
        _ => kept,
    };

    let price: f64 = normalized
        .parse()
        .map_err(|_| PipelineError::InvalidRecord(format!("bad price '{}'", raw)))?;
    if !price.is_finite() || price < 0.0 {
        return Err(PipelineError::InvalidRecord(format!("bad price '{}'", raw)));
    }
    Ok(price)
}

fn is_dot_grouped(digits: &str) -> bool {
    let mut groups = digits.split('.');
    let leading = groups.next().unwrap_or_default().trim_start_matches('-');
    !leading.is_empty() && groups.all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_formats() {
        assert_eq!(parse_price("68.43").unwrap(), 68.43);
        assert_eq!(parse_price("€ 68,43").unwrap(), 68.43);
        assert_eq!(parse_price("1.234,50 €").unwrap(), 1234.5);
        assert_eq!(parse_price("1,234.50").unwrap(), 1234.5);
        assert_eq!(parse_price("12 345 Ft").unwrap(), 12345.0);
        assert!(parse_price("n/a").is_err());
    }

    #[test]
    fn test_dot_thousands_separator() {
        assert_eq!(parse_price("3.000").unwrap(), 3000.0);
        assert_eq!(parse_price("12.345 Ft").unwrap(), 12345.0);
        assert_eq!(parse_price("1.234.567").unwrap(), 1234567.0);
        assert_eq!(parse_price("2.50").unwrap(), 2.5);
        assert_eq!(parse_price("49.9999").unwrap(), 49.9999);
    }

    #[test]
    fn test_parse_record() {
        let record = RawRecord {
            date: "20160103".to_string(),
            state: 12,
            minimum_price: "49.99".to_string(),
        };
        let obs = PriceObservation::parse(&record).unwrap();
        assert_eq!(obs.departure_key(), 20160103);
        assert_eq!(obs.state, 12);
        assert_eq!(obs.price, 49.99);
    }

    #[test]
    fn test_bad_date_is_rejected() {
        assert!(matches!(parse_date("2016-01-03"), Err(PipelineError::InvalidRecord(_))));
    }
}
