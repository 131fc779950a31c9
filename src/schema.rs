use crate::error::{KpiError, Result};
use crate::formulas::ZeroPolicy;
use crate::utils::normalize_column_name;
use crate::validator::ColumnLookup;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Label used for rows whose segment value is missing.
pub const MISSING_SEGMENT: &str = "(missing)";

/// A single raw cell as handed over by a source reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Date(NaiveDate),
    Text(String),
    Missing,
}

impl CellValue {
    /// True for `Missing` and for blank text. Missing-marker text such as
    /// `"nan"` is still a value here; coercion decides what it means.
    pub fn is_missing(&self) -> bool {
        match self {
            CellValue::Missing => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(n) => n.is_nan(),
            CellValue::Date(_) => false,
        }
    }

    /// Text rendering used for status matching and segment keys.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Missing => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    /// Stable key used when comparing whole rows (f64 is not `Hash`).
    pub(crate) fn canonical_key(&self) -> String {
        match self {
            CellValue::Missing => "\u{0}missing".to_string(),
            CellValue::Number(n) => format!("n:{:?}", n),
            CellValue::Date(d) => format!("d:{}", d),
            CellValue::Text(s) => format!("t:{}", s),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::Date(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Missing)
    }
}

/// Row-major table with named columns. Column names are unique
/// case-insensitively; every row has exactly one value per column.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.to_lowercase()) {
                return Err(KpiError::DuplicateColumn(name.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Result<Self> {
        let mut dataset = Self::new(columns)?;
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    /// Builds a dataset from `(name, values)` pairs, one per column.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<CellValue>)>) -> Result<Self> {
        let expected_len = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut names = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());

        for (name, column) in columns {
            let name = name.into();
            if column.len() != expected_len {
                return Err(KpiError::Ingestion(format!(
                    "Column '{}' has {} values, expected {}",
                    name,
                    column.len(),
                    expected_len
                )));
            }
            names.push(name);
            values.push(column);
        }

        let mut dataset = Self::new(names)?;
        for row_idx in 0..expected_len {
            let row = values.iter().map(|col| col[row_idx].clone()).collect();
            dataset.rows.push(row);
        }
        Ok(dataset)
    }

    /// Builds a dataset from record maps. Columns appear in first-seen order;
    /// a key absent from a record becomes `Missing` for that row.
    pub fn from_records(records: &[BTreeMap<String, CellValue>]) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut dataset = Self::new(columns)?;
        for record in records {
            let row = dataset
                .columns
                .iter()
                .map(|c| record.get(c).cloned().unwrap_or(CellValue::Missing))
                .collect();
            dataset.rows.push(row);
        }
        Ok(dataset)
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(KpiError::RowLengthMismatch {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column lookup table for this dataset.
    pub fn lookup(&self) -> ColumnLookup {
        ColumnLookup::new(&self.columns)
    }

    pub fn column_values(&self, index: usize) -> Vec<&CellValue> {
        self.rows.iter().map(|row| &row[index]).collect()
    }

    /// Values of the named column, matched case-insensitively.
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        self.lookup()
            .resolve(name)
            .map(|index| self.column_values(index))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.lookup().resolve(name).is_some()
    }

    /// Splits rows into one dataset per distinct text value of a column.
    pub fn partition_by(&self, index: usize) -> BTreeMap<String, Dataset> {
        let mut groups: BTreeMap<String, Dataset> = BTreeMap::new();
        for row in &self.rows {
            let key = if row[index].is_missing() {
                MISSING_SEGMENT.to_string()
            } else {
                row[index]
                    .as_text()
                    .unwrap_or_else(|| MISSING_SEGMENT.to_string())
            };
            groups
                .entry(key)
                .or_insert_with(|| Dataset {
                    columns: self.columns.clone(),
                    rows: Vec::new(),
                })
                .rows
                .push(row.clone());
        }
        groups
    }

    /// Returns a copy with normalized column names. When two columns collapse
    /// to the same name the first one wins and the later one is dropped.
    pub fn normalize_columns(&self) -> Dataset {
        let mut kept: Vec<usize> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        for (idx, name) in self.columns.iter().enumerate() {
            let normalized = normalize_column_name(name);
            if !names.contains(&normalized) {
                names.push(normalized);
                kept.push(idx);
            }
        }

        let rows = self
            .rows
            .iter()
            .map(|row| kept.iter().map(|&i| row[i].clone()).collect())
            .collect();

        Dataset {
            columns: names,
            rows,
        }
    }
}

/// Snapshot date carried by factoring extracts.
pub const MEASUREMENT_DATE_COLUMN: &str = "measurement_date";

/// Column names a metric needs, declared statically next to its formula.
///
/// `required` columns must exist. `numeric` and `date` columns are
/// type-checked only when present, so a date column such as
/// `measurement_date` is optional but must parse if supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnContract {
    pub required: &'static [&'static str],
    pub numeric: &'static [&'static str],
    pub date: &'static [&'static str],
}

impl ColumnContract {
    pub const EMPTY: ColumnContract = ColumnContract {
        required: &[],
        numeric: &[],
        date: &[],
    };
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[serde(rename = "par_30")]
    Par30,
    #[serde(rename = "par_90")]
    Par90,
    CollectionRate,
    DelinquencyRate,
    DefaultRate,
    AverageLtv,
    AverageDti,
    PortfolioYield,
    LossGivenDefault,
    NonPerformingLoanRatio,
    PrepaymentRate,
    RepaymentVelocity,
    WeightedInterestRate,
    DataQualityScore,
    PortfolioHealth,
}

impl Metric {
    /// Metrics computed directly from the dataset, in `calculate_all` order.
    pub const DATASET_METRICS: [Metric; 14] = [
        Metric::Par30,
        Metric::Par90,
        Metric::CollectionRate,
        Metric::DelinquencyRate,
        Metric::DefaultRate,
        Metric::AverageLtv,
        Metric::AverageDti,
        Metric::PortfolioYield,
        Metric::LossGivenDefault,
        Metric::NonPerformingLoanRatio,
        Metric::PrepaymentRate,
        Metric::RepaymentVelocity,
        Metric::WeightedInterestRate,
        Metric::DataQualityScore,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Par30 => "par_30",
            Metric::Par90 => "par_90",
            Metric::CollectionRate => "collection_rate",
            Metric::DelinquencyRate => "delinquency_rate",
            Metric::DefaultRate => "default_rate",
            Metric::AverageLtv => "average_ltv",
            Metric::AverageDti => "average_dti",
            Metric::PortfolioYield => "portfolio_yield",
            Metric::LossGivenDefault => "loss_given_default",
            Metric::NonPerformingLoanRatio => "non_performing_loan_ratio",
            Metric::PrepaymentRate => "prepayment_rate",
            Metric::RepaymentVelocity => "repayment_velocity",
            Metric::WeightedInterestRate => "weighted_interest_rate",
            Metric::DataQualityScore => "data_quality_score",
            Metric::PortfolioHealth => "portfolio_health",
        }
    }

    pub fn contract(&self) -> ColumnContract {
        match self {
            Metric::Par30 => ColumnContract {
                required: &[
                    "dpd_30_60_usd",
                    "dpd_60_90_usd",
                    "dpd_90_plus_usd",
                    "total_receivable_usd",
                ],
                numeric: &[
                    "dpd_30_60_usd",
                    "dpd_60_90_usd",
                    "dpd_90_plus_usd",
                    "total_receivable_usd",
                ],
                date: &[MEASUREMENT_DATE_COLUMN],
            },
            Metric::Par90 => ColumnContract {
                required: &["dpd_90_plus_usd", "total_receivable_usd"],
                numeric: &["dpd_90_plus_usd", "total_receivable_usd"],
                date: &[MEASUREMENT_DATE_COLUMN],
            },
            Metric::CollectionRate => ColumnContract {
                required: &["cash_available_usd", "total_eligible_usd"],
                numeric: &["cash_available_usd", "total_eligible_usd"],
                date: &[MEASUREMENT_DATE_COLUMN],
            },
            Metric::DelinquencyRate | Metric::DefaultRate => ColumnContract {
                required: &["loan_status"],
                numeric: &[],
                date: &[],
            },
            Metric::AverageLtv => ColumnContract {
                required: &["loan_amount", "appraised_value"],
                numeric: &["loan_amount", "appraised_value"],
                date: &[],
            },
            Metric::AverageDti => ColumnContract {
                required: &["monthly_debt", "borrower_income"],
                numeric: &["monthly_debt", "borrower_income"],
                date: &[],
            },
            Metric::PortfolioYield => ColumnContract {
                required: &["interest_rate", "principal_balance"],
                numeric: &["interest_rate", "principal_balance"],
                date: &[],
            },
            Metric::LossGivenDefault => ColumnContract {
                // exposure column is added per call: `exposure_at_default`
                // when present, else `outstanding_principal`
                required: &["loan_status", "charge_off_amount", "recoveries"],
                numeric: &["charge_off_amount", "recoveries"],
                date: &[],
            },
            Metric::NonPerformingLoanRatio => ColumnContract {
                required: &["loan_status", "days_in_arrears", "outstanding_principal"],
                numeric: &["days_in_arrears", "outstanding_principal"],
                date: &[],
            },
            Metric::PrepaymentRate => ColumnContract {
                required: &["paid_principal", "principal"],
                numeric: &["paid_principal", "principal"],
                date: &[],
            },
            Metric::RepaymentVelocity => ColumnContract {
                required: &["paid_principal", "principal", "term_months"],
                numeric: &["paid_principal", "principal", "term_months"],
                date: &[],
            },
            // `principal` is an optional fallback weight, type-checked when present
            Metric::WeightedInterestRate => ColumnContract {
                required: &["interest_rate", "outstanding_principal"],
                numeric: &["interest_rate", "outstanding_principal", "principal"],
                date: &[],
            },
            Metric::DataQualityScore | Metric::PortfolioHealth => ColumnContract::EMPTY,
        }
    }

    /// Inclusive range a successful value must fall in.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            Metric::AverageLtv | Metric::AverageDti | Metric::RepaymentVelocity => {
                (0.0, f64::INFINITY)
            }
            Metric::LossGivenDefault => (0.0, 1.0),
            Metric::PortfolioHealth => (0.0, 10.0),
            _ => (0.0, 100.0),
        }
    }

    pub fn zero_policy(&self) -> ZeroPolicy {
        match self {
            Metric::LossGivenDefault
            | Metric::NonPerformingLoanRatio
            | Metric::PrepaymentRate
            | Metric::RepaymentVelocity
            | Metric::WeightedInterestRate => ZeroPolicy::Undefined,
            _ => ZeroPolicy::Zero,
        }
    }

    /// Whether `value` is acceptable for this metric. NaN is accepted only
    /// under an undefined zero policy.
    pub fn accepts(&self, value: f64) -> bool {
        if value.is_nan() {
            return self.zero_policy() == ZeroPolicy::Undefined;
        }
        let (low, high) = self.bounds();
        value >= low && value <= high
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A computed metric: its value plus the raw aggregates that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricResult {
    pub metric: Metric,
    #[serde(with = "crate::utils::nan_as_null")]
    #[schemars(
        with = "Option<f64>",
        description = "Metric value; null when the metric is undefined (zero denominator under an undefined zero policy)"
    )]
    pub value: f64,
    pub details: BTreeMap<String, f64>,
}

impl MetricResult {
    pub fn new(metric: Metric, value: f64) -> Self {
        Self {
            metric,
            value,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: f64) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    pub fn detail(&self, key: &str) -> Option<f64> {
        self.details.get(key).copied()
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_columns_rejected_case_insensitively() {
        let result = Dataset::new(vec!["Amount".to_string(), "amount".to_string()]);
        assert!(matches!(result, Err(KpiError::DuplicateColumn(name)) if name == "amount"));
    }

    #[test]
    fn test_push_row_checks_length() {
        let mut dataset = Dataset::new(vec!["a".to_string(), "b".to_string()]).unwrap();
        let err = dataset.push_row(vec![CellValue::Number(1.0)]).unwrap_err();
        assert!(matches!(
            err,
            KpiError::RowLengthMismatch {
                row: 0,
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_from_records_fills_missing_keys() {
        let mut first = BTreeMap::new();
        first.insert("a".to_string(), CellValue::Number(1.0));
        let mut second = BTreeMap::new();
        second.insert("b".to_string(), CellValue::from("x"));

        let dataset = Dataset::from_records(&[first, second]).unwrap();
        assert_eq!(dataset.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(dataset.rows()[0][1], CellValue::Missing);
        assert_eq!(dataset.rows()[1][0], CellValue::Missing);
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let dataset = Dataset::from_columns(vec![("Total_Receivable_USD", vec![1.0.into()])]).unwrap();
        assert!(dataset.has_column("total_receivable_usd"));
        assert_eq!(dataset.column("TOTAL_RECEIVABLE_USD").unwrap().len(), 1);
    }

    #[test]
    fn test_partition_by_groups_rows() {
        let dataset = Dataset::from_columns(vec![
            (
                "segment",
                vec!["SME".into(), "Consumer".into(), "SME".into(), CellValue::Missing],
            ),
            ("v", vec![1.0.into(), 2.0.into(), 3.0.into(), 4.0.into()]),
        ])
        .unwrap();

        let groups = dataset.partition_by(0);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups["SME"].row_count(), 2);
        assert_eq!(groups["Consumer"].row_count(), 1);
        assert_eq!(groups[MISSING_SEGMENT].row_count(), 1);
    }

    #[test]
    fn test_normalize_columns_keeps_first_duplicate() {
        let dataset = Dataset::from_columns(vec![
            ("Loan Amount", vec![1.0.into()]),
            ("loan-amount", vec![2.0.into()]),
            (" Status ", vec!["ok".into()]),
        ])
        .unwrap();

        let normalized = dataset.normalize_columns();
        assert_eq!(
            normalized.columns(),
            &["loan_amount".to_string(), "status".to_string()]
        );
        assert_eq!(normalized.rows()[0][0], CellValue::Number(1.0));
    }

    #[test]
    fn test_metric_names_serialize_snake_case() {
        let json = serde_json::to_string(&Metric::Par30).unwrap();
        assert_eq!(json, "\"par_30\"");
        let json = serde_json::to_string(&Metric::LossGivenDefault).unwrap();
        assert_eq!(json, "\"loss_given_default\"");
        for metric in Metric::DATASET_METRICS {
            assert_eq!(
                serde_json::to_string(&metric).unwrap(),
                format!("\"{}\"", metric.name())
            );
        }
    }

    #[test]
    fn test_metric_accepts_bounds() {
        assert!(Metric::Par30.accepts(0.0));
        assert!(Metric::Par30.accepts(100.0));
        assert!(!Metric::Par30.accepts(100.1));
        assert!(!Metric::Par30.accepts(f64::NAN));
        assert!(Metric::PortfolioHealth.accepts(8.22));
        assert!(!Metric::PortfolioHealth.accepts(10.5));
        assert!(Metric::LossGivenDefault.accepts(f64::NAN));
        assert!(Metric::AverageLtv.accepts(250.0));
        assert!(Metric::PrepaymentRate.accepts(f64::NAN));
        assert!(Metric::RepaymentVelocity.accepts(1.4));
        assert!(!Metric::NonPerformingLoanRatio.accepts(120.0));
    }
}
