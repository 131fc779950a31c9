//! Adapters from already-read source data into a [`Dataset`].
//!
//! Reading files or calling APIs stays with the caller; these helpers only
//! reshape what a reader produced.

use crate::error::{KpiError, Result};
use crate::schema::{CellValue, Dataset};
use serde_json::Value;
use std::collections::BTreeMap;

/// Parses a JSON array of row objects (`[{"col": value, ...}, ...]`).
pub fn dataset_from_json_records(json: &str) -> Result<Dataset> {
    let parsed: Value = serde_json::from_str(json)?;
    let Value::Array(items) = parsed else {
        return Err(KpiError::Ingestion(
            "Expected a JSON array of row objects".to_string(),
        ));
    };

    let mut records = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let Value::Object(fields) = item else {
            return Err(KpiError::Ingestion(format!(
                "Row {} is not a JSON object",
                idx
            )));
        };
        let record: BTreeMap<String, CellValue> = fields
            .into_iter()
            .map(|(key, value)| (key, json_to_cell(value)))
            .collect();
        records.push(record);
    }

    Dataset::from_records(&records)
}

fn json_to_cell(value: Value) -> CellValue {
    match value {
        Value::Null => CellValue::Missing,
        Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or(CellValue::Missing),
        Value::String(s) => CellValue::Text(s),
        Value::Bool(b) => CellValue::Text(b.to_string()),
        other => CellValue::Text(other.to_string()),
    }
}

/// Builds a dataset from header + text rows, as produced by a CSV reader.
/// Every cell stays text; coercion happens at calculation time.
pub fn dataset_from_text_rows<S, R>(headers: &[S], rows: R) -> Result<Dataset>
where
    S: AsRef<str>,
    R: IntoIterator,
    R::Item: IntoIterator,
    <R::Item as IntoIterator>::Item: AsRef<str>,
{
    let columns = headers.iter().map(|h| h.as_ref().to_string()).collect();
    let mut dataset = Dataset::new(columns)?;

    for row in rows {
        let cells = row
            .into_iter()
            .map(|cell| CellValue::Text(cell.as_ref().to_string()))
            .collect();
        dataset.push_row(cells)?;
    }

    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_records() {
        let json = r#"[
            {"loan_status": "current", "loan_amount": 100, "appraised_value": null},
            {"loan_status": "defaulted", "loan_amount": "$250", "flag": true}
        ]"#;

        let dataset = dataset_from_json_records(json).unwrap();
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.column_count(), 4);

        let amounts = dataset.column("loan_amount").unwrap();
        assert_eq!(amounts[0], &CellValue::Number(100.0));
        assert_eq!(amounts[1], &CellValue::Text("$250".to_string()));

        let appraised = dataset.column("appraised_value").unwrap();
        assert_eq!(appraised[0], &CellValue::Missing);
        assert_eq!(appraised[1], &CellValue::Missing);

        let flags = dataset.column("flag").unwrap();
        assert_eq!(flags[1], &CellValue::Text("true".to_string()));
    }

    #[test]
    fn test_json_records_rejects_non_arrays() {
        assert!(matches!(
            dataset_from_json_records(r#"{"a": 1}"#),
            Err(KpiError::Ingestion(_))
        ));
        assert!(matches!(
            dataset_from_json_records(r#"[1, 2]"#),
            Err(KpiError::Ingestion(_))
        ));
        assert!(matches!(
            dataset_from_json_records("[{"),
            Err(KpiError::SerializationError(_))
        ));
    }

    #[test]
    fn test_text_rows() {
        let headers = ["cash_available_usd", "total_eligible_usd"];
        let rows = vec![vec!["972,000", "1,000,000"], vec!["", "0"]];

        let dataset = dataset_from_text_rows(&headers, rows).unwrap();
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.rows()[1][0], CellValue::Text(String::new()));
    }

    #[test]
    fn test_text_rows_length_mismatch() {
        let headers = ["a", "b"];
        let rows = vec![vec!["1"]];
        assert!(matches!(
            dataset_from_text_rows(&headers, rows),
            Err(KpiError::RowLengthMismatch { .. })
        ));
    }
}
