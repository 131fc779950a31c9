use crate::coercion::{coerce_value, is_absent};
use crate::formulas::data_quality_score;
use crate::schema::{Dataset, Metric, MetricResult};
use std::collections::HashSet;

/// Cell-level health of a dataset, all ratios in 0-1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityProfile {
    pub null_ratio: f64,
    pub invalid_numeric_ratio: f64,
    pub duplicate_ratio: f64,
}

impl QualityProfile {
    pub fn measure(dataset: &Dataset, numeric_columns: &[String]) -> Self {
        Self {
            null_ratio: null_ratio(dataset),
            invalid_numeric_ratio: invalid_numeric_ratio(dataset, numeric_columns),
            duplicate_ratio: duplicate_ratio(dataset),
        }
    }

    pub fn completeness(&self) -> f64 {
        1.0 - self.null_ratio
    }

    pub fn score(&self) -> f64 {
        data_quality_score(
            self.null_ratio,
            self.duplicate_ratio,
            self.invalid_numeric_ratio,
        )
    }

    pub fn to_result(&self) -> MetricResult {
        MetricResult::new(Metric::DataQualityScore, self.score())
            .with_detail("null_ratio", self.null_ratio)
            .with_detail("invalid_numeric_ratio", self.invalid_numeric_ratio)
            .with_detail("duplicate_ratio", self.duplicate_ratio)
            .with_detail("completeness", self.completeness())
    }
}

fn null_ratio(dataset: &Dataset) -> f64 {
    let total = dataset.row_count() * dataset.column_count();
    if total == 0 {
        return 0.0;
    }
    let nulls = dataset
        .rows()
        .iter()
        .flat_map(|row| row.iter())
        .filter(|cell| is_absent(cell))
        .count();
    nulls as f64 / total as f64
}

/// Share of cells in the configured numeric columns that hold a value which
/// does not parse. Columns absent from the dataset are skipped.
fn invalid_numeric_ratio(dataset: &Dataset, numeric_columns: &[String]) -> f64 {
    let lookup = dataset.lookup();
    let mut total = 0usize;
    let mut invalid = 0usize;

    for name in numeric_columns {
        let Some(idx) = lookup.resolve(name) else {
            continue;
        };
        for cell in dataset.column_values(idx) {
            total += 1;
            if !is_absent(cell) && coerce_value(cell).is_none() {
                invalid += 1;
            }
        }
    }

    if total == 0 {
        return 0.0;
    }
    invalid as f64 / total as f64
}

fn duplicate_ratio(dataset: &Dataset) -> f64 {
    if dataset.is_empty() {
        return 0.0;
    }
    let mut seen = HashSet::new();
    let mut duplicates = 0usize;
    for row in dataset.rows() {
        let key: Vec<String> = row.iter().map(|c| c.canonical_key()).collect();
        if !seen.insert(key) {
            duplicates += 1;
        }
    }
    duplicates as f64 / dataset.row_count() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CellValue;

    fn columns() -> Vec<String> {
        vec!["loan_amount".to_string()]
    }

    #[test]
    fn test_clean_dataset_scores_100() {
        let dataset = Dataset::from_columns(vec![
            ("loan_amount", vec![100.0.into(), 200.0.into()]),
            ("loan_status", vec!["current".into(), "defaulted".into()]),
        ])
        .unwrap();

        let profile = QualityProfile::measure(&dataset, &columns());
        assert_eq!(profile.score(), 100.0);
        assert_eq!(profile.completeness(), 1.0);
    }

    #[test]
    fn test_empty_dataset_scores_100() {
        let dataset = Dataset::new(vec!["loan_amount".to_string()]).unwrap();
        let profile = QualityProfile::measure(&dataset, &columns());
        assert_eq!(profile.score(), 100.0);
    }

    #[test]
    fn test_penalties_combine() {
        // 4 rows x 2 columns = 8 cells, 1 null; row 4 duplicates row 1;
        // loan_amount has 1 unparseable value out of 4 cells.
        let dataset = Dataset::from_columns(vec![
            (
                "loan_amount",
                vec![100.0.into(), "abc".into(), CellValue::Missing, 100.0.into()],
            ),
            (
                "loan_status",
                vec!["current".into(), "current".into(), "late".into(), "current".into()],
            ),
        ])
        .unwrap();

        let profile = QualityProfile::measure(&dataset, &columns());
        assert!((profile.null_ratio - 0.125).abs() < 1e-12);
        assert!((profile.invalid_numeric_ratio - 0.25).abs() < 1e-12);
        assert!((profile.duplicate_ratio - 0.25).abs() < 1e-12);

        let expected = 100.0 - 12.5 - 12.5 - 15.0;
        assert!((profile.score() - expected).abs() < 1e-9);

        let result = profile.to_result();
        assert_eq!(result.metric, Metric::DataQualityScore);
        assert!((result.detail("completeness").unwrap() - 0.875).abs() < 1e-12);
    }
}
