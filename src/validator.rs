use crate::coercion::{is_date_column, is_numeric_column};
use crate::schema::{ColumnContract, Dataset};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Case-insensitive map from column name to position, built once per check.
#[derive(Debug, Clone)]
pub struct ColumnLookup {
    by_lower: HashMap<String, usize>,
    names: Vec<String>,
}

impl ColumnLookup {
    pub fn new(columns: &[String]) -> Self {
        let mut by_lower = HashMap::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            by_lower.entry(name.to_lowercase()).or_insert(idx);
        }
        Self {
            by_lower,
            names: columns.to_vec(),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.by_lower.get(&name.to_lowercase()).copied()
    }

    /// The dataset's own spelling of a column.
    pub fn original_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "column", rename_all = "snake_case")]
pub enum Violation {
    MissingColumn(String),
    NonNumericColumn(String),
    InvalidDateColumn(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingColumn(c) => write!(f, "missing required column '{}'", c),
            Violation::NonNumericColumn(c) => write!(f, "column '{}' is not numeric", c),
            Violation::InvalidDateColumn(c) => write!(f, "column '{}' contains no valid dates", c),
        }
    }
}

/// Every rule a dataset broke, in check order.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{}", render_violations(.violations))]
pub struct ValidationFailure {
    pub violations: Vec<Violation>,
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationFailure {
    pub fn missing_columns(&self) -> Vec<String> {
        self.violations
            .iter()
            .filter_map(|v| match v {
                Violation::MissingColumn(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn non_numeric_columns(&self) -> Vec<String> {
        self.violations
            .iter()
            .filter_map(|v| match v {
                Violation::NonNumericColumn(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn invalid_date_columns(&self) -> Vec<String> {
        self.violations
            .iter()
            .filter_map(|v| match v {
                Violation::InvalidDateColumn(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Checks `dataset` against required, numeric and date column sets and
/// reports every violation at once.
///
/// A numeric (or date) column only fails when none of its non-missing values
/// coerce; element-level noise is left to cleansing. Type checks skip
/// columns that are absent, those are already reported as missing.
pub fn validate(
    dataset: &Dataset,
    required: &[&str],
    numeric: &[&str],
    date: &[&str],
) -> std::result::Result<(), ValidationFailure> {
    let lookup = dataset.lookup();
    let mut violations = Vec::new();

    for name in required {
        if lookup.resolve(name).is_none() {
            violations.push(Violation::MissingColumn(name.to_string()));
        }
    }

    for name in numeric {
        if let Some(idx) = lookup.resolve(name) {
            if !is_numeric_column(dataset.column_values(idx)) {
                let original = lookup.original_name(idx).unwrap_or(name);
                violations.push(Violation::NonNumericColumn(original.to_string()));
            }
        }
    }

    for name in date {
        if let Some(idx) = lookup.resolve(name) {
            if !is_date_column(dataset.column_values(idx)) {
                let original = lookup.original_name(idx).unwrap_or(name);
                violations.push(Violation::InvalidDateColumn(original.to_string()));
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure { violations })
    }
}

pub fn validate_contract(
    dataset: &Dataset,
    contract: &ColumnContract,
) -> std::result::Result<(), ValidationFailure> {
    validate(dataset, contract.required, contract.numeric, contract.date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CellValue;

    fn sample() -> Dataset {
        Dataset::from_columns(vec![
            ("Total_Receivable_USD", vec!["1,000".into(), "2000".into()]),
            ("notes", vec!["abc".into(), "def".into()]),
            ("mixed", vec!["12".into(), "oops".into()]),
            ("Measurement_Date", vec!["2025-01-31".into(), CellValue::Missing]),
            ("bad_date", vec!["yesterday".into(), "soon".into()]),
        ])
        .unwrap()
    }

    #[test]
    fn test_valid_dataset_passes() {
        let result = validate(
            &sample(),
            &["total_receivable_usd", "mixed"],
            &["total_receivable_usd", "mixed"],
            &["measurement_date"],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_all_missing_columns_reported_together() {
        let failure = validate(
            &sample(),
            &["dpd_30_60_usd", "total_receivable_usd", "dpd_90_plus_usd"],
            &[],
            &[],
        )
        .unwrap_err();

        assert_eq!(
            failure.missing_columns(),
            vec!["dpd_30_60_usd".to_string(), "dpd_90_plus_usd".to_string()]
        );
    }

    #[test]
    fn test_type_checks_run_alongside_missing_check() {
        let failure = validate(
            &sample(),
            &["absent", "notes"],
            &["notes", "absent"],
            &["bad_date"],
        )
        .unwrap_err();

        assert_eq!(failure.violations.len(), 3);
        assert_eq!(failure.missing_columns(), vec!["absent".to_string()]);
        assert_eq!(failure.non_numeric_columns(), vec!["notes".to_string()]);
        assert_eq!(failure.invalid_date_columns(), vec!["bad_date".to_string()]);
    }

    #[test]
    fn test_error_message_uses_dataset_casing() {
        let dataset =
            Dataset::from_columns(vec![("Cash_Available_USD", vec!["n/a?".into()])]).unwrap();
        let failure = validate(&dataset, &[], &["cash_available_usd"], &[]).unwrap_err();
        assert_eq!(failure.non_numeric_columns(), vec!["Cash_Available_USD".to_string()]);
        assert!(failure.to_string().contains("Cash_Available_USD"));
    }

    #[test]
    fn test_lookup_resolves_any_casing() {
        let lookup = ColumnLookup::new(&["Loan_Status".to_string()]);
        assert_eq!(lookup.resolve("loan_status"), Some(0));
        assert_eq!(lookup.resolve("LOAN_STATUS"), Some(0));
        assert_eq!(lookup.resolve("status"), None);
        assert_eq!(lookup.original_name(0), Some("Loan_Status"));
    }
}
