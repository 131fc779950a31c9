use crate::audit::{AuditEntry, AuditTrail};
use crate::coercion::{coerce_column, count_present, sum_present};
use crate::config::EngineConfig;
use crate::error::{KpiError, Result};
use crate::formulas;
use crate::quality::QualityProfile;
use crate::schema::{Dataset, Metric, MetricResult};
use crate::utils::round_to_precision;
use crate::validator::{validate, validate_contract, ColumnLookup, ValidationFailure};
use chrono::{DateTime, Utc};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

const COLLECTIONS_AMOUNT_COLUMN: &str = "amount";
const LTV_RATIO_COLUMN: &str = "ltv_ratio";
const DTI_RATIO_COLUMN: &str = "dti_ratio";
const EXPOSURE_AT_DEFAULT_COLUMN: &str = "exposure_at_default";
const OUTSTANDING_PRINCIPAL_COLUMN: &str = "outstanding_principal";

/// Computes portfolio KPIs over one dataset snapshot and records every
/// attempt in its own audit trail. One engine per run; never reuse it for
/// another dataset.
#[derive(Debug)]
pub struct KpiEngine {
    dataset: Dataset,
    config: EngineConfig,
    audit: AuditTrail,
}

/// Serializable outcome of a run, handed to output writers as-is.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KpiReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub results: BTreeMap<Metric, MetricResult>,
    pub validation: BTreeMap<Metric, bool>,
    pub audit_trail: Vec<AuditEntry>,
}

impl KpiReport {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(KpiReport)
    }

    pub fn schema_as_json() -> Result<String> {
        Ok(serde_json::to_string_pretty(&Self::generate_json_schema())?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl KpiEngine {
    /// Takes a private copy of `dataset` so later changes by the caller
    /// cannot leak into results.
    pub fn new(dataset: &Dataset) -> Self {
        let config = EngineConfig::default();
        let run_id = new_run_id(&config.run_id_prefix);
        Self::from_snapshot(dataset.clone(), config, run_id)
    }

    pub fn with_config(dataset: &Dataset, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let run_id = new_run_id(&config.run_id_prefix);
        Ok(Self::from_snapshot(dataset.clone(), config, run_id))
    }

    pub fn with_run_id(
        dataset: &Dataset,
        config: EngineConfig,
        run_id: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_snapshot(dataset.clone(), config, run_id.into()))
    }

    fn from_snapshot(dataset: Dataset, config: EngineConfig, run_id: String) -> Self {
        info!(
            "Created KPI engine {} over {} rows x {} columns",
            run_id,
            dataset.row_count(),
            dataset.column_count()
        );
        Self {
            dataset,
            config,
            audit: AuditTrail::new(run_id),
        }
    }

    pub fn run_id(&self) -> &str {
        self.audit.run_id()
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-only view of every attempt so far, in call order.
    pub fn audit_trail(&self) -> &[AuditEntry] {
        self.audit.entries()
    }

    fn audited<F>(&mut self, metric: Metric, compute: F) -> Result<MetricResult>
    where
        F: FnOnce(&Dataset, &EngineConfig) -> Result<MetricResult>,
    {
        match compute(&self.dataset, &self.config) {
            Ok(result) => {
                self.audit.record_success(&result);
                Ok(result)
            }
            Err(err) => {
                self.audit.record_failure(metric, &err.to_string());
                Err(err)
            }
        }
    }

    pub fn calculate_par_30(&mut self) -> Result<MetricResult> {
        self.audited(Metric::Par30, |dataset, _| compute_par_30(dataset))
    }

    pub fn calculate_par_90(&mut self) -> Result<MetricResult> {
        self.audited(Metric::Par90, |dataset, _| compute_par_90(dataset))
    }

    pub fn calculate_collection_rate(&mut self) -> Result<MetricResult> {
        self.audited(Metric::CollectionRate, |dataset, _| {
            compute_collection_rate(dataset, None)
        })
    }

    /// Collection rate using the `amount` column of a separate collections
    /// extract instead of `cash_available_usd`.
    pub fn calculate_collection_rate_with(&mut self, collections: &Dataset) -> Result<MetricResult> {
        self.audited(Metric::CollectionRate, |dataset, _| {
            compute_collection_rate(dataset, Some(collections))
        })
    }

    pub fn calculate_delinquency_rate(&mut self) -> Result<MetricResult> {
        self.audited(Metric::DelinquencyRate, |dataset, config| {
            compute_status_rate(dataset, Metric::DelinquencyRate, |s| config.is_delinquent(s))
        })
    }

    pub fn calculate_default_rate(&mut self) -> Result<MetricResult> {
        self.audited(Metric::DefaultRate, |dataset, config| {
            compute_status_rate(dataset, Metric::DefaultRate, |s| config.is_defaulted(s))
        })
    }

    pub fn calculate_average_ltv(&mut self) -> Result<MetricResult> {
        self.audited(Metric::AverageLtv, |dataset, _| {
            compute_row_ratio_average(dataset, Metric::AverageLtv, LTV_RATIO_COLUMN, |row| {
                formulas::loan_to_value(row[0], row[1])
            })
        })
    }

    pub fn calculate_average_dti(&mut self) -> Result<MetricResult> {
        self.audited(Metric::AverageDti, |dataset, _| {
            compute_row_ratio_average(dataset, Metric::AverageDti, DTI_RATIO_COLUMN, |row| {
                formulas::debt_to_income(row[0], row[1])
            })
        })
    }

    pub fn calculate_portfolio_yield(&mut self) -> Result<MetricResult> {
        self.audited(Metric::PortfolioYield, |dataset, _| {
            compute_portfolio_yield(dataset)
        })
    }

    pub fn calculate_loss_given_default(&mut self) -> Result<MetricResult> {
        self.audited(Metric::LossGivenDefault, compute_loss_given_default)
    }

    pub fn calculate_non_performing_loan_ratio(&mut self) -> Result<MetricResult> {
        self.audited(Metric::NonPerformingLoanRatio, compute_non_performing_loan_ratio)
    }

    pub fn calculate_prepayment_rate(&mut self) -> Result<MetricResult> {
        self.audited(Metric::PrepaymentRate, |dataset, _| {
            compute_prepayment_rate(dataset)
        })
    }

    pub fn calculate_repayment_velocity(&mut self) -> Result<MetricResult> {
        self.audited(Metric::RepaymentVelocity, |dataset, _| {
            compute_repayment_velocity(dataset)
        })
    }

    /// Rate weighted by outstanding principal, falling back to original
    /// principal when nothing is outstanding.
    pub fn calculate_weighted_interest_rate(&mut self) -> Result<MetricResult> {
        self.audited(Metric::WeightedInterestRate, |dataset, _| {
            compute_weighted_interest_rate(dataset)
        })
    }

    pub fn calculate_data_quality(&mut self) -> Result<MetricResult> {
        self.audited(Metric::DataQualityScore, |dataset, config| {
            Ok(QualityProfile::measure(dataset, &config.quality_numeric_columns).to_result())
        })
    }

    /// Health score from two already-computed metrics. Does not read the
    /// dataset but is audited like every other calculation.
    pub fn portfolio_health(
        &mut self,
        par: Option<f64>,
        collection_rate: Option<f64>,
    ) -> Result<MetricResult> {
        self.audited(Metric::PortfolioHealth, |_, _| {
            let par = require_input(par, "par")?;
            let collection_rate = require_input(collection_rate, "collection_rate")?;
            Ok(
                MetricResult::new(
                    Metric::PortfolioHealth,
                    formulas::portfolio_health(par, collection_rate),
                )
                .with_detail("par", par)
                .with_detail("collection_rate", collection_rate),
            )
        })
    }

    /// Dispatches to the matching `calculate_*`. Portfolio health uses the
    /// latest successful PAR30 and collection rate of this run.
    pub fn calculate(&mut self, metric: Metric) -> Result<MetricResult> {
        match metric {
            Metric::Par30 => self.calculate_par_30(),
            Metric::Par90 => self.calculate_par_90(),
            Metric::CollectionRate => self.calculate_collection_rate(),
            Metric::DelinquencyRate => self.calculate_delinquency_rate(),
            Metric::DefaultRate => self.calculate_default_rate(),
            Metric::AverageLtv => self.calculate_average_ltv(),
            Metric::AverageDti => self.calculate_average_dti(),
            Metric::PortfolioYield => self.calculate_portfolio_yield(),
            Metric::LossGivenDefault => self.calculate_loss_given_default(),
            Metric::NonPerformingLoanRatio => self.calculate_non_performing_loan_ratio(),
            Metric::PrepaymentRate => self.calculate_prepayment_rate(),
            Metric::RepaymentVelocity => self.calculate_repayment_velocity(),
            Metric::WeightedInterestRate => self.calculate_weighted_interest_rate(),
            Metric::DataQualityScore => self.calculate_data_quality(),
            Metric::PortfolioHealth => {
                let par = self.latest_value(Metric::Par30);
                let collection_rate = self.latest_value(Metric::CollectionRate);
                self.portfolio_health(par, collection_rate)
            }
        }
    }

    fn latest_value(&self, metric: Metric) -> Option<f64> {
        self.audit.latest_success(metric).and_then(|e| e.value)
    }

    /// Runs every metric. A failing metric is left out of the map but still
    /// appears in the audit trail as a failure.
    pub fn calculate_all(&mut self) -> BTreeMap<Metric, MetricResult> {
        let mut results = BTreeMap::new();

        for metric in Metric::DATASET_METRICS {
            match self.calculate(metric) {
                Ok(result) => {
                    results.insert(metric, result);
                }
                Err(err) => debug!("Skipping {} in batch run: {}", metric, err),
            }
        }

        let par = results.get(&Metric::Par30).map(|r| r.value);
        let collection_rate = results.get(&Metric::CollectionRate).map(|r| r.value);
        if let Ok(health) = self.portfolio_health(par, collection_rate) {
            results.insert(Metric::PortfolioHealth, health);
        }

        info!(
            "Run {} computed {} metrics, {} failed",
            self.run_id(),
            results.len(),
            self.audit.failures().count()
        );
        results
    }

    /// Range check over successful audit entries; the latest entry per
    /// metric decides. Does not block anything.
    pub fn validate_calculations(&self) -> BTreeMap<Metric, bool> {
        let mut checks = BTreeMap::new();
        for entry in self.audit.entries().iter().filter(|e| e.is_success()) {
            let ok = entry
                .value
                .map(|v| entry.metric.accepts(v))
                .unwrap_or(false);
            checks.insert(entry.metric, ok);
        }
        checks
    }

    pub fn report(&self, results: &BTreeMap<Metric, MetricResult>) -> KpiReport {
        let results = match self.config.report_precision {
            Some(precision) => results
                .iter()
                .map(|(metric, result)| (*metric, round_result(result, precision)))
                .collect(),
            None => results.clone(),
        };

        KpiReport {
            run_id: self.run_id().to_string(),
            generated_at: Utc::now(),
            results,
            validation: self.validate_calculations(),
            audit_trail: self.audit.entries().to_vec(),
        }
    }

    /// Runs a fresh engine per distinct value of `column`. The parent's
    /// audit trail is left untouched.
    pub fn segment_kpis(&self, column: &str) -> Result<BTreeMap<String, KpiReport>> {
        let index = self
            .dataset
            .lookup()
            .resolve(column)
            .ok_or_else(|| KpiError::MissingColumns {
                metric: "segment_kpis".to_string(),
                columns: vec![column.to_string()],
            })?;

        let mut reports = BTreeMap::new();
        for (segment, subset) in self.dataset.partition_by(index) {
            let run_id = format!("{}:{}", self.run_id(), segment);
            let mut engine = KpiEngine::from_snapshot(subset, self.config.clone(), run_id);
            let results = engine.calculate_all();
            reports.insert(segment, engine.report(&results));
        }
        Ok(reports)
    }
}

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// `{prefix}_{YYYYmmdd_HHMMSS_micros}_{seq}`. The sequence keeps ids unique
/// for engines built within the same microsecond.
fn new_run_id(prefix: &str) -> String {
    let seq = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}_{}_{:04}",
        prefix,
        Utc::now().format("%Y%m%d_%H%M%S_%6f"),
        seq
    )
}

fn round_result(result: &MetricResult, precision: u32) -> MetricResult {
    MetricResult {
        metric: result.metric,
        value: round_to_precision(result.value, precision),
        details: result
            .details
            .iter()
            .map(|(k, v)| (k.clone(), round_to_precision(*v, precision)))
            .collect(),
    }
}

fn require_input(value: Option<f64>, input: &str) -> Result<f64> {
    value.filter(|v| v.is_finite()).ok_or_else(|| KpiError::MissingInput {
        metric: Metric::PortfolioHealth.name().to_string(),
        input: input.to_string(),
    })
}

/// Maps a validation failure onto the metric-level error taxonomy. The
/// narrow variants are used only when they cover every violation.
fn schema_error(metric: &str, failure: ValidationFailure) -> KpiError {
    let missing = failure.missing_columns();
    let non_numeric = failure.non_numeric_columns();
    let total = failure.violations.len();

    if missing.len() == total {
        KpiError::MissingColumns {
            metric: metric.to_string(),
            columns: missing,
        }
    } else if non_numeric.len() == total {
        KpiError::NonNumericInput {
            metric: metric.to_string(),
            columns: non_numeric,
        }
    } else {
        KpiError::Validation {
            metric: metric.to_string(),
            failure,
        }
    }
}

fn check_contract(dataset: &Dataset, metric: Metric) -> Result<ColumnLookup> {
    check_contract_with(dataset, metric, &[])
}

/// Contract check with extra numeric columns that are required only for
/// this call, so every violation still comes back in one failure.
fn check_contract_with(dataset: &Dataset, metric: Metric, extra: &[&str]) -> Result<ColumnLookup> {
    let contract = metric.contract();
    if extra.is_empty() {
        validate_contract(dataset, &contract)
            .map_err(|failure| schema_error(metric.name(), failure))?;
    } else {
        let required: Vec<&str> = contract.required.iter().chain(extra).copied().collect();
        let numeric: Vec<&str> = contract.numeric.iter().chain(extra).copied().collect();
        validate(dataset, &required, &numeric, contract.date)
            .map_err(|failure| schema_error(metric.name(), failure))?;
    }
    Ok(dataset.lookup())
}

fn numeric_column(dataset: &Dataset, lookup: &ColumnLookup, name: &str) -> Vec<Option<f64>> {
    match lookup.resolve(name) {
        Some(idx) => coerce_column(dataset.column_values(idx)),
        None => vec![None; dataset.row_count()],
    }
}

fn column_sum(dataset: &Dataset, lookup: &ColumnLookup, name: &str) -> f64 {
    let sum = sum_present(&numeric_column(dataset, lookup, name));
    debug!("sum({}) = {}", name, sum);
    sum
}

fn compute_par_30(dataset: &Dataset) -> Result<MetricResult> {
    let lookup = check_contract(dataset, Metric::Par30)?;
    let dpd_30_60 = column_sum(dataset, &lookup, "dpd_30_60_usd");
    let dpd_60_90 = column_sum(dataset, &lookup, "dpd_60_90_usd");
    let dpd_90_plus = column_sum(dataset, &lookup, "dpd_90_plus_usd");
    let receivable = column_sum(dataset, &lookup, "total_receivable_usd");

    Ok(MetricResult::new(
        Metric::Par30,
        formulas::par_30(dpd_30_60, dpd_60_90, dpd_90_plus, receivable),
    )
    .with_detail("30_plus_balance", dpd_30_60 + dpd_60_90 + dpd_90_plus)
    .with_detail("total_receivable", receivable))
}

fn compute_par_90(dataset: &Dataset) -> Result<MetricResult> {
    let lookup = check_contract(dataset, Metric::Par90)?;
    let dpd_90_plus = column_sum(dataset, &lookup, "dpd_90_plus_usd");
    let receivable = column_sum(dataset, &lookup, "total_receivable_usd");

    Ok(
        MetricResult::new(Metric::Par90, formulas::par_90(dpd_90_plus, receivable))
            .with_detail("90_plus_balance", dpd_90_plus)
            .with_detail("total_receivable", receivable),
    )
}

fn compute_collection_rate(dataset: &Dataset, collections: Option<&Dataset>) -> Result<MetricResult> {
    let metric = Metric::CollectionRate;

    let (cash, lookup) = match collections {
        None => {
            let lookup = check_contract(dataset, metric)?;
            (column_sum(dataset, &lookup, "cash_available_usd"), lookup)
        }
        Some(collections) => {
            let mut violations = Vec::new();
            if let Err(failure) =
                validate(dataset, &["total_eligible_usd"], &["total_eligible_usd"], &[])
            {
                violations.extend(failure.violations);
            }
            if let Err(failure) = validate(
                collections,
                &[COLLECTIONS_AMOUNT_COLUMN],
                &[COLLECTIONS_AMOUNT_COLUMN],
                &[],
            ) {
                violations.extend(failure.violations);
            }
            if !violations.is_empty() {
                return Err(schema_error(metric.name(), ValidationFailure { violations }));
            }
            let collected = column_sum(collections, &collections.lookup(), COLLECTIONS_AMOUNT_COLUMN);
            (collected, dataset.lookup())
        }
    };

    let eligible = column_sum(dataset, &lookup, "total_eligible_usd");
    let mut result = MetricResult::new(metric, formulas::collection_rate(cash, eligible))
        .with_detail("cash", cash)
        .with_detail("eligible", eligible)
        .with_detail("total", eligible);
    if collections.is_some() {
        result = result.with_detail("collections", cash);
    }
    Ok(result)
}

fn compute_status_rate<P>(dataset: &Dataset, metric: Metric, matches: P) -> Result<MetricResult>
where
    P: Fn(&str) -> bool,
{
    let lookup = check_contract(dataset, metric)?;
    let total_rows = dataset.row_count();
    let matching_rows = lookup
        .resolve("loan_status")
        .map(|idx| {
            dataset
                .column_values(idx)
                .into_iter()
                .filter_map(|cell| cell.as_text())
                .filter(|status| matches(status))
                .count()
        })
        .unwrap_or(0);

    let value = match metric {
        Metric::DefaultRate => formulas::default_rate(matching_rows, total_rows),
        _ => formulas::delinquency_rate(matching_rows, total_rows),
    };
    let count_key = match metric {
        Metric::DefaultRate => "defaulted_rows",
        _ => "delinquent_rows",
    };

    Ok(MetricResult::new(metric, value)
        .with_detail(count_key, matching_rows as f64)
        .with_detail("total_rows", total_rows as f64))
}

/// Average of a row-level ratio. A precomputed ratio column wins over
/// deriving the ratio from the metric's two input columns.
fn compute_row_ratio_average<F>(
    dataset: &Dataset,
    metric: Metric,
    precomputed_column: &str,
    row_ratio: F,
) -> Result<MetricResult>
where
    F: Fn([f64; 2]) -> Option<f64>,
{
    let lookup = dataset.lookup();

    let (ratios, precomputed) = if lookup.resolve(precomputed_column).is_some() {
        validate(dataset, &[], &[precomputed_column], &[])
            .map_err(|f| schema_error(metric.name(), f))?;
        (numeric_column(dataset, &lookup, precomputed_column), true)
    } else {
        let lookup = check_contract(dataset, metric)?;
        let contract = metric.contract();
        let numerators = numeric_column(dataset, &lookup, contract.required[0]);
        let denominators = numeric_column(dataset, &lookup, contract.required[1]);
        let ratios = numerators
            .iter()
            .zip(&denominators)
            .map(|(n, d)| match (n, d) {
                (Some(n), Some(d)) => row_ratio([*n, *d]),
                _ => None,
            })
            .collect();
        (ratios, false)
    };

    let valid_rows = count_present(&ratios);
    let rows = ratios.len();
    debug!("{}: {} of {} rows usable", metric, valid_rows, rows);

    Ok(
        MetricResult::new(metric, formulas::average_of_valid(&ratios))
            .with_detail("rows", rows as f64)
            .with_detail("valid_rows", valid_rows as f64)
            .with_detail("excluded_rows", (rows - valid_rows) as f64)
            .with_detail("precomputed", if precomputed { 1.0 } else { 0.0 }),
    )
}

fn compute_portfolio_yield(dataset: &Dataset) -> Result<MetricResult> {
    let lookup = check_contract(dataset, Metric::PortfolioYield)?;
    let rates = numeric_column(dataset, &lookup, "interest_rate");
    let principal = numeric_column(dataset, &lookup, "principal_balance");

    let weighted_interest: f64 = rates
        .iter()
        .zip(&principal)
        .map(|(r, p)| r.unwrap_or(0.0) * p.unwrap_or(0.0))
        .sum();
    let total_principal = sum_present(&principal);

    Ok(MetricResult::new(
        Metric::PortfolioYield,
        formulas::portfolio_yield(weighted_interest, total_principal),
    )
    .with_detail("weighted_interest", weighted_interest)
    .with_detail("total_principal", total_principal))
}

/// LGD over defaulted rows only. Exposure comes from `exposure_at_default`
/// when present, else max(outstanding principal, charge-off).
fn compute_loss_given_default(dataset: &Dataset, config: &EngineConfig) -> Result<MetricResult> {
    let metric = Metric::LossGivenDefault;
    let explicit_exposure = dataset.has_column(EXPOSURE_AT_DEFAULT_COLUMN);
    let exposure_column = if explicit_exposure {
        EXPOSURE_AT_DEFAULT_COLUMN
    } else {
        OUTSTANDING_PRINCIPAL_COLUMN
    };
    let lookup = check_contract_with(dataset, metric, &[exposure_column])?;

    let charge_offs = numeric_column(dataset, &lookup, "charge_off_amount");
    let recoveries = numeric_column(dataset, &lookup, "recoveries");
    let exposures = numeric_column(dataset, &lookup, exposure_column);
    let statuses = lookup
        .resolve("loan_status")
        .map(|idx| dataset.column_values(idx))
        .unwrap_or_default();

    let mut defaulted_rows = 0usize;
    let mut total_loss = 0.0;
    let mut total_exposure = 0.0;

    for (row, status) in statuses.iter().enumerate() {
        let is_defaulted = status
            .as_text()
            .map(|s| config.is_defaulted(&s))
            .unwrap_or(false);
        if !is_defaulted {
            continue;
        }

        let charge_off = charge_offs[row].unwrap_or(0.0);
        defaulted_rows += 1;
        total_loss += formulas::net_loss(charge_off, recoveries[row].unwrap_or(0.0));
        let exposure = exposures[row].unwrap_or(0.0);
        total_exposure += if explicit_exposure {
            exposure
        } else {
            exposure.max(charge_off)
        };
    }

    Ok(MetricResult::new(
        metric,
        formulas::loss_given_default(total_loss, total_exposure),
    )
    .with_detail("explicit_exposure", if explicit_exposure { 1.0 } else { 0.0 })
    .with_detail("defaulted_rows", defaulted_rows as f64)
    .with_detail("total_net_loss", total_loss)
    .with_detail("total_exposure", total_exposure))
}

fn compute_non_performing_loan_ratio(
    dataset: &Dataset,
    config: &EngineConfig,
) -> Result<MetricResult> {
    let metric = Metric::NonPerformingLoanRatio;
    let lookup = check_contract(dataset, metric)?;
    let arrears = numeric_column(dataset, &lookup, "days_in_arrears");
    let outstanding = numeric_column(dataset, &lookup, OUTSTANDING_PRINCIPAL_COLUMN);
    let statuses = lookup
        .resolve("loan_status")
        .map(|idx| dataset.column_values(idx))
        .unwrap_or_default();

    let mut npl_rows = 0usize;
    let mut npl_outstanding = 0.0;
    for (row, status) in statuses.iter().enumerate() {
        let status = status.as_text().unwrap_or_default();
        if config.is_non_performing(&status, arrears[row]) {
            npl_rows += 1;
            npl_outstanding += outstanding[row].unwrap_or(0.0);
        }
    }
    let total_outstanding = sum_present(&outstanding);

    Ok(MetricResult::new(
        metric,
        formulas::non_performing_loan_ratio(npl_outstanding, total_outstanding),
    )
    .with_detail("npl_rows", npl_rows as f64)
    .with_detail("npl_outstanding", npl_outstanding)
    .with_detail("total_outstanding", total_outstanding))
}

fn compute_prepayment_rate(dataset: &Dataset) -> Result<MetricResult> {
    let lookup = check_contract(dataset, Metric::PrepaymentRate)?;
    let paid = column_sum(dataset, &lookup, "paid_principal");
    let principal = column_sum(dataset, &lookup, "principal");

    Ok(
        MetricResult::new(Metric::PrepaymentRate, formulas::prepayment_rate(paid, principal))
            .with_detail("paid_principal", paid)
            .with_detail("total_principal", principal),
    )
}

fn compute_repayment_velocity(dataset: &Dataset) -> Result<MetricResult> {
    let lookup = check_contract(dataset, Metric::RepaymentVelocity)?;
    let paid = column_sum(dataset, &lookup, "paid_principal");
    let principal = numeric_column(dataset, &lookup, "principal");
    let terms = numeric_column(dataset, &lookup, "term_months");

    let scheduled: f64 = principal
        .iter()
        .zip(&terms)
        .map(|(p, t)| match (p, t) {
            (Some(p), Some(t)) => formulas::scheduled_principal(*p, *t),
            _ => 0.0,
        })
        .sum();

    Ok(MetricResult::new(
        Metric::RepaymentVelocity,
        formulas::repayment_velocity(paid, scheduled),
    )
    .with_detail("paid_principal", paid)
    .with_detail("scheduled_principal", scheduled))
}

fn compute_weighted_interest_rate(dataset: &Dataset) -> Result<MetricResult> {
    let lookup = check_contract(dataset, Metric::WeightedInterestRate)?;
    let rates = numeric_column(dataset, &lookup, "interest_rate");
    let outstanding = numeric_column(dataset, &lookup, OUTSTANDING_PRINCIPAL_COLUMN);
    let principal = numeric_column(dataset, &lookup, "principal");

    // rows without a rate carry no weight
    let weighted = |weights: &[Option<f64>]| -> (f64, f64) {
        rates
            .iter()
            .zip(weights)
            .filter_map(|(r, w)| Some((r.as_ref()?, w.unwrap_or(0.0))))
            .fold((0.0, 0.0), |(sum, total), (r, w)| (sum + r * w, total + w))
    };

    let (mut weighted_sum, mut total_weight) = weighted(&outstanding);
    let by_outstanding = total_weight > 0.0;
    if !by_outstanding {
        (weighted_sum, total_weight) = weighted(&principal);
    }
    debug!(
        "weighted_interest_rate weighted by {}",
        if by_outstanding { "outstanding principal" } else { "original principal" }
    );

    Ok(MetricResult::new(
        Metric::WeightedInterestRate,
        formulas::weighted_interest_rate(weighted_sum, total_weight),
    )
    .with_detail("total_weight", total_weight)
    .with_detail("weighted_by_outstanding", if by_outstanding { 1.0 } else { 0.0 }))
}
