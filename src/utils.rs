use chrono::{NaiveDate, NaiveDateTime};

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parses the date formats seen in portfolio extracts. Datetimes are
/// truncated to their date part; RFC 3339 timestamps are accepted too.
pub fn parse_date_str(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(datetime.date());
        }
    }

    chrono::DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Rounds half away from zero to `precision` decimal places.
/// Non-finite values pass through untouched.
pub fn round_to_precision(value: f64, precision: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

pub fn clamp(value: f64, low: f64, high: f64) -> f64 {
    value.max(low).min(high)
}

/// Lowercases, trims and snake-cases a header, e.g. `" Loan Amount "` -> `"loan_amount"`.
pub fn normalize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_whitespace = false;

    for ch in name.trim().to_lowercase().chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;

        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }

    out
}

/// Serializes a metric value with NaN written as `null` and reads `null`
/// back as NaN, so undefined values survive a JSON round trip.
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Like [`nan_as_null`] for an optional value: an absent field is `None`,
/// an explicit `null` is `Some(NaN)`. Pair with `#[serde(default)]`.
pub mod optional_nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => super::nan_as_null::serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        Ok(Some(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(parse_date_str("2025-01-31"), Some(expected));
        assert_eq!(parse_date_str("2025/01/31"), Some(expected));
        assert_eq!(parse_date_str("31/01/2025"), Some(expected));
        assert_eq!(parse_date_str("2025-01-31T10:15:00"), Some(expected));
        assert_eq!(parse_date_str("2025-01-31T10:15:00+00:00"), Some(expected));
        assert_eq!(parse_date_str(" 2025-01-31 "), Some(expected));
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert_eq!(parse_date_str(""), None);
        assert_eq!(parse_date_str("not a date"), None);
        assert_eq!(parse_date_str("2025-13-45"), None);
    }

    #[test]
    fn test_round_to_precision() {
        assert_eq!(round_to_precision(8.2249, 2), 8.22);
        assert_eq!(round_to_precision(15.0, 4), 15.0);
        assert_eq!(round_to_precision(-1.25, 1), -1.3);
        assert!(round_to_precision(f64::NAN, 2).is_nan());
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(12.0, 0.0, 10.0), 10.0);
        assert_eq!(clamp(-3.0, 0.0, 10.0), 0.0);
        assert_eq!(clamp(8.22, 0.0, 10.0), 8.22);
    }

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name(" Loan Amount "), "loan_amount");
        assert_eq!(normalize_column_name("DPD 30-60 (USD)"), "dpd_30_60__usd_");
        assert_eq!(normalize_column_name("total_receivable_usd"), "total_receivable_usd");
        assert_eq!(normalize_column_name("Cash\t Available"), "cash_available");
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Sample {
        #[serde(with = "nan_as_null")]
        value: f64,
        #[serde(
            default,
            with = "optional_nan_as_null",
            skip_serializing_if = "Option::is_none"
        )]
        maybe: Option<f64>,
    }

    #[test]
    fn test_nan_round_trips_through_null() {
        let json = serde_json::to_string(&Sample {
            value: f64::NAN,
            maybe: Some(f64::NAN),
        })
        .unwrap();
        assert_eq!(json, r#"{"value":null,"maybe":null}"#);

        let back: Sample = serde_json::from_str(&json).unwrap();
        assert!(back.value.is_nan());
        assert!(back.maybe.unwrap().is_nan());

        let back: Sample = serde_json::from_str(r#"{"value":1.5}"#).unwrap();
        assert_eq!(back.value, 1.5);
        assert!(back.maybe.is_none());
    }
}
