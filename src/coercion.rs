//! Best-effort numeric cleansing of raw cells.
//!
//! Coercion never fails: anything that cannot be read as a finite number
//! becomes `None` ("missing"). Deciding whether a column is numeric at all is
//! the validator's job.

use crate::schema::CellValue;
use crate::utils::parse_date_str;
use chrono::NaiveDate;

/// Decorations stripped from currency-formatted text before parsing.
const CURRENCY_DECORATIONS: [char; 8] = ['₡', '$', '€', '£', '¥', '₽', '%', ','];

/// Text tokens that mean "no value" in source extracts.
const MISSING_MARKERS: [&str; 6] = ["nan", "na", "n/a", "null", "none", "-"];

pub fn is_missing_marker(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty()
        || MISSING_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
}

/// True when the cell carries no value at all (missing, blank or a marker).
pub fn is_absent(value: &CellValue) -> bool {
    match value {
        CellValue::Text(s) => is_missing_marker(s),
        other => other.is_missing(),
    }
}

pub fn coerce_value(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Number(_) => None,
        CellValue::Text(s) => parse_numeric_text(s),
        CellValue::Date(_) | CellValue::Missing => None,
    }
}

fn parse_numeric_text(text: &str) -> Option<f64> {
    if is_missing_marker(text) {
        return None;
    }

    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !CURRENCY_DECORATIONS.contains(c) && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Same-length numeric view of a column.
pub fn coerce_column<'a, I>(values: I) -> Vec<Option<f64>>
where
    I: IntoIterator<Item = &'a CellValue>,
{
    values.into_iter().map(coerce_value).collect()
}

/// Sum of present values; a fully-missing column sums to zero.
pub fn sum_present(values: &[Option<f64>]) -> f64 {
    values.iter().flatten().sum()
}

pub fn mean_present(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f64>() / present.len() as f64)
}

pub fn count_present(values: &[Option<f64>]) -> usize {
    values.iter().filter(|v| v.is_some()).count()
}

/// A column is numeric unless it has values and none of them coerce.
pub fn is_numeric_column<'a, I>(values: I) -> bool
where
    I: IntoIterator<Item = &'a CellValue>,
{
    let mut saw_value = false;
    for value in values {
        if is_absent(value) {
            continue;
        }
        if coerce_value(value).is_some() {
            return true;
        }
        saw_value = true;
    }
    !saw_value
}

pub fn coerce_date(value: &CellValue) -> Option<NaiveDate> {
    match value {
        CellValue::Date(d) => Some(*d),
        CellValue::Text(s) => parse_date_str(s),
        CellValue::Number(_) | CellValue::Missing => None,
    }
}

/// Date analogue of [`is_numeric_column`].
pub fn is_date_column<'a, I>(values: I) -> bool
where
    I: IntoIterator<Item = &'a CellValue>,
{
    let mut saw_value = false;
    for value in values {
        if is_absent(value) {
            continue;
        }
        if coerce_date(value).is_some() {
            return true;
        }
        saw_value = true;
    }
    !saw_value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_numbers_pass_through() {
        assert_eq!(coerce_value(&CellValue::Number(12.5)), Some(12.5));
        assert_eq!(coerce_value(&CellValue::Number(-3.0)), Some(-3.0));
        assert_eq!(coerce_value(&CellValue::Number(f64::NAN)), None);
        assert_eq!(coerce_value(&CellValue::Number(f64::INFINITY)), None);
    }

    #[test]
    fn test_currency_text_is_cleaned() {
        assert_eq!(coerce_value(&text("$1,234.50")), Some(1234.5));
        assert_eq!(coerce_value(&text("₡ 972,000")), Some(972000.0));
        assert_eq!(coerce_value(&text("€-15")), Some(-15.0));
        assert_eq!(coerce_value(&text("97.2%")), Some(97.2));
        assert_eq!(coerce_value(&text("  42 ")), Some(42.0));
    }

    #[test]
    fn test_blanks_and_markers_become_missing() {
        assert_eq!(coerce_value(&text("")), None);
        assert_eq!(coerce_value(&text("   ")), None);
        assert_eq!(coerce_value(&text("NaN")), None);
        assert_eq!(coerce_value(&text("null")), None);
        assert_eq!(coerce_value(&CellValue::Missing), None);
    }

    #[test]
    fn test_unparseable_text_becomes_missing() {
        assert_eq!(coerce_value(&text("abc")), None);
        assert_eq!(coerce_value(&text("12abc")), None);
        assert_eq!(coerce_value(&text("inf")), None);
        assert_eq!(coerce_value(&text("$")), None);
    }

    #[test]
    fn test_coerce_column_preserves_length() {
        let column = vec![text("100"), CellValue::Missing, text("x"), CellValue::Number(2.0)];
        let coerced = coerce_column(&column);
        assert_eq!(coerced, vec![Some(100.0), None, None, Some(2.0)]);
    }

    #[test]
    fn test_fully_missing_column_sums_to_zero() {
        let coerced = coerce_column(&[CellValue::Missing, text("")]);
        assert_eq!(sum_present(&coerced), 0.0);
        assert_eq!(mean_present(&coerced), None);
        assert_eq!(count_present(&coerced), 0);
    }

    #[test]
    fn test_is_numeric_column() {
        assert!(is_numeric_column(&[text("1"), text("abc")]));
        assert!(is_numeric_column(&[CellValue::Missing, text("")]));
        assert!(!is_numeric_column(&[text("abc"), text("def"), CellValue::Missing]));
    }

    #[test]
    fn test_is_date_column() {
        assert!(is_date_column(&[text("2025-01-31"), text("garbage")]));
        assert!(!is_date_column(&[text("garbage"), CellValue::Number(3.0)]));
        assert!(is_date_column(&[CellValue::Missing]));
    }
}
