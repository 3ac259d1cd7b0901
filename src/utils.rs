/// Utility functions
use chrono::{
    DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use serde_json::Value;

/// Extract number from JSON value
pub fn num(v: &Value) -> Option<f64> {
    if let Some(x) = v.as_f64() {
        return Some(x);
    }
    if let Some(s) = v.as_str() {
        return s.trim().parse::<f64>().ok();
    }
    None
}

/// Parse a flight start time into the given local offset.
///
/// RFC 3339 strings are instants; naive date-times are wall time in
/// `offset`; bare dates are UTC midnight.
pub fn parse_flight_date(raw: &str, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(offset));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return offset.from_local_datetime(&ndt).single();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&midnight).with_timezone(offset));
    }
    None
}

/// Round half away from zero to one decimal and format, `None` if not finite
pub fn one_decimal(x: f64) -> Option<String> {
    if !x.is_finite() {
        return None;
    }
    Some(format!("{:.1}", (x * 10.0).round() / 10.0))
}

/// `numerator / denominator` at one decimal, `None` for a zero denominator
pub fn ratio(numerator: f64, denominator: f64) -> Option<String> {
    if denominator == 0.0 {
        return None;
    }
    one_decimal(numerator / denominator)
}

/// Sunday on or before `date`
pub fn sunday_week_start(date: NaiveDate) -> NaiveDate {
    let back = date.weekday().num_days_from_sunday();
    date - Days::new(u64::from(back))
}

/// Monday on or before `date`
pub fn monday_week_start(date: NaiveDate) -> NaiveDate {
    let back = date.weekday().num_days_from_monday();
    date - Days::new(u64::from(back))
}
