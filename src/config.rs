use crate::error::{KpiError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const MAX_REPORT_PRECISION: u32 = 12;

/// Explicit engine settings. Passed in by the caller; nothing here is global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    #[serde(default = "default_run_id_prefix")]
    #[schemars(description = "Prefix for run identifiers, e.g. 'kpi_run' -> 'kpi_run_20250131_120000_123456_0000'")]
    pub run_id_prefix: String,

    #[serde(default = "default_delinquent_statuses")]
    #[schemars(description = "loan_status values counted as delinquent (case-insensitive, trimmed)")]
    pub delinquent_statuses: Vec<String>,

    #[serde(default = "default_defaulted_statuses")]
    #[schemars(description = "loan_status values counted as defaulted (case-insensitive, trimmed)")]
    pub defaulted_statuses: Vec<String>,

    #[serde(default = "default_arrears_threshold_days")]
    #[schemars(description = "days_in_arrears at or above which a loan counts as non-performing")]
    pub arrears_threshold_days: f64,

    #[serde(default = "default_quality_numeric_columns")]
    #[schemars(description = "Columns checked for unparseable numbers by the data-quality score")]
    pub quality_numeric_columns: Vec<String>,

    #[serde(default = "default_report_precision")]
    #[schemars(description = "Decimal places applied to values in a KpiReport; null keeps full precision")]
    pub report_precision: Option<u32>,
}

fn default_run_id_prefix() -> String {
    "kpi_run".to_string()
}

fn default_delinquent_statuses() -> Vec<String> {
    vec![
        "30-59 days past due".to_string(),
        "60-89 days past due".to_string(),
        "90+ days past due".to_string(),
        "delinquent".to_string(),
    ]
}

fn default_defaulted_statuses() -> Vec<String> {
    vec!["defaulted".to_string()]
}

fn default_arrears_threshold_days() -> f64 {
    90.0
}

fn default_quality_numeric_columns() -> Vec<String> {
    [
        "loan_amount",
        "appraised_value",
        "borrower_income",
        "monthly_debt",
        "interest_rate",
        "principal_balance",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_report_precision() -> Option<u32> {
    Some(4)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_id_prefix: default_run_id_prefix(),
            delinquent_statuses: default_delinquent_statuses(),
            defaulted_statuses: default_defaulted_statuses(),
            arrears_threshold_days: default_arrears_threshold_days(),
            quality_numeric_columns: default_quality_numeric_columns(),
            report_precision: default_report_precision(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_id_prefix.trim().is_empty() {
            return Err(KpiError::InvalidConfig(
                "run_id_prefix must not be empty".to_string(),
            ));
        }
        if self.delinquent_statuses.is_empty() {
            return Err(KpiError::InvalidConfig(
                "delinquent_statuses must list at least one status".to_string(),
            ));
        }
        if self.defaulted_statuses.is_empty() {
            return Err(KpiError::InvalidConfig(
                "defaulted_statuses must list at least one status".to_string(),
            ));
        }
        if !self.arrears_threshold_days.is_finite() || self.arrears_threshold_days < 0.0 {
            return Err(KpiError::InvalidConfig(format!(
                "arrears_threshold_days must be a non-negative number, got {}",
                self.arrears_threshold_days
            )));
        }
        if let Some(precision) = self.report_precision {
            if precision > MAX_REPORT_PRECISION {
                return Err(KpiError::InvalidConfig(format!(
                    "report_precision {} exceeds the maximum of {}",
                    precision, MAX_REPORT_PRECISION
                )));
            }
        }
        Ok(())
    }

    pub fn is_delinquent(&self, status: &str) -> bool {
        matches_status(&self.delinquent_statuses, status)
    }

    pub fn is_defaulted(&self, status: &str) -> bool {
        matches_status(&self.defaulted_statuses, status)
    }

    /// Loans in arrears past the threshold, or defaulted, are non-performing.
    pub fn is_non_performing(&self, status: &str, days_in_arrears: Option<f64>) -> bool {
        self.is_defaulted(status)
            || days_in_arrears.is_some_and(|days| days >= self.arrears_threshold_days)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }
}

fn matches_status(statuses: &[String], status: &str) -> bool {
    let status = status.trim();
    statuses.iter().any(|s| s.trim().eq_ignore_ascii_case(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"defaulted_statuses": ["Defaulted", "Charged Off"]}"#)
            .unwrap();
        assert_eq!(config.run_id_prefix, "kpi_run");
        assert_eq!(config.delinquent_statuses.len(), 4);
        assert!(config.is_defaulted("charged off"));
        assert_eq!(config.report_precision, Some(4));
    }

    #[test]
    fn test_status_matching_is_case_insensitive() {
        let config = EngineConfig::default();
        assert!(config.is_delinquent(" 90+ Days Past Due "));
        assert!(config.is_delinquent("DELINQUENT"));
        assert!(!config.is_delinquent("current"));
        assert!(config.is_defaulted("Defaulted"));
    }

    #[test]
    fn test_non_performing_uses_threshold_or_default() {
        let config = EngineConfig::default();
        assert!(config.is_non_performing("current", Some(90.0)));
        assert!(!config.is_non_performing("current", Some(89.0)));
        assert!(!config.is_non_performing("current", None));
        assert!(config.is_non_performing("Defaulted", None));

        let err = EngineConfig::from_json(r#"{"arrears_threshold_days": -1}"#).unwrap_err();
        assert!(matches!(err, KpiError::InvalidConfig(_)));
    }

    #[test]
    fn test_validation_rejects_bad_config() {
        let config = EngineConfig {
            delinquent_statuses: vec![],
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(KpiError::InvalidConfig(_))));

        let err = EngineConfig::from_json(r#"{"report_precision": 40}"#).unwrap_err();
        assert!(err.to_string().contains("report_precision"));

        let err = EngineConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, KpiError::SerializationError(_)));
    }

    #[test]
    fn test_schema_generation() {
        let schema = serde_json::to_string(&EngineConfig::generate_json_schema()).unwrap();
        assert!(schema.contains("delinquent_statuses"));
        assert!(schema.contains("report_precision"));
    }
}
