//! # Portfolio KPI Engine
//!
//! Computes portfolio-risk KPIs for loan and factoring books from a tabular
//! extract, with a per-run audit trail of every calculation attempt.
//!
//! ## Core Concepts
//!
//! - **Dataset**: Named columns of raw cells (numbers, text, dates, missing) as supplied by a source reader
//! - **Coercion**: Currency-formatted text is cleaned into numbers; anything unreadable is treated as missing
//! - **Validation**: Required columns are resolved case-insensitively and every violation is reported at once
//! - **Formulas**: One pure function per metric, each with an explicit zero-denominator policy
//! - **Audit Trail**: Exactly one entry per calculation attempt, success or failure, owned by one engine run
//!
//! ## Example
//!
//! ```rust,ignore
//! use portfolio_kpi_engine::*;
//!
//! let dataset = Dataset::from_columns(vec![
//!     ("dpd_30_60_usd", vec![100.0.into(), 200.0.into()]),
//!     ("dpd_60_90_usd", vec![50.0.into(), 50.0.into()]),
//!     ("dpd_90_plus_usd", vec![25.0.into(), 25.0.into()]),
//!     ("total_receivable_usd", vec![1000.0.into(), 2000.0.into()]),
//! ])?;
//!
//! let mut engine = KpiEngine::new(&dataset);
//! let par_30 = engine.calculate_par_30()?;
//! assert!((par_30.value - 15.0).abs() < 1e-9);
//! assert_eq!(engine.audit_trail().len(), 1);
//! ```

pub mod audit;
pub mod coercion;
pub mod config;
pub mod engine;
pub mod error;
pub mod formulas;
pub mod ingestion;
pub mod quality;
pub mod schema;
pub mod utils;
pub mod validator;

pub use audit::{AuditEntry, AuditStatus, AuditTrail};
pub use config::EngineConfig;
pub use engine::{KpiEngine, KpiReport};
pub use error::{KpiError, Result};
pub use formulas::ZeroPolicy;
pub use ingestion::{dataset_from_json_records, dataset_from_text_rows};
pub use quality::QualityProfile;
pub use schema::*;
pub use validator::{validate, validate_contract, ColumnLookup, ValidationFailure, Violation};

use log::info;

/// Runs every metric over `dataset` in a fresh engine and returns the report.
pub fn compute_portfolio_kpis(dataset: &Dataset, config: EngineConfig) -> Result<KpiReport> {
    let mut engine = KpiEngine::with_config(dataset, config)?;
    let results = engine.calculate_all();
    let report = engine.report(&results);

    info!(
        "Portfolio KPI run {} finished with {} results",
        report.run_id,
        report.results.len()
    );

    Ok(report)
}
