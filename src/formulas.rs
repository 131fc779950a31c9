//! KPI formulas over pre-aggregated sums.
//!
//! Everything here is pure: no dataset access, no audit, no logging. Each
//! ratio names its own [`ZeroPolicy`] instead of sharing a global default.
//! Percentages are returned on a 0-100 scale unless noted otherwise.

use crate::utils::clamp;
use serde::{Deserialize, Serialize};

/// What a ratio returns when its denominator is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroPolicy {
    /// The ratio is reported as 0.
    Zero,
    /// The ratio is meaningless and reported as NaN.
    Undefined,
}

impl ZeroPolicy {
    fn fallback(self) -> f64 {
        match self {
            ZeroPolicy::Zero => 0.0,
            ZeroPolicy::Undefined => f64::NAN,
        }
    }
}

pub fn ratio(numerator: f64, denominator: f64, policy: ZeroPolicy) -> f64 {
    if denominator == 0.0 {
        policy.fallback()
    } else {
        numerator / denominator
    }
}

pub fn percentage(numerator: f64, denominator: f64, policy: ZeroPolicy) -> f64 {
    ratio(numerator, denominator, policy) * 100.0
}

/// PAR30: share of receivables 30+ days past due.
pub fn par_30(dpd_30_60: f64, dpd_60_90: f64, dpd_90_plus: f64, total_receivable: f64) -> f64 {
    percentage(
        dpd_30_60 + dpd_60_90 + dpd_90_plus,
        total_receivable,
        ZeroPolicy::Zero,
    )
}

/// PAR90: share of receivables 90+ days past due.
pub fn par_90(dpd_90_plus: f64, total_receivable: f64) -> f64 {
    percentage(dpd_90_plus, total_receivable, ZeroPolicy::Zero)
}

pub fn collection_rate(collected: f64, total_eligible: f64) -> f64 {
    percentage(collected, total_eligible, ZeroPolicy::Zero)
}

pub fn delinquency_rate(delinquent_rows: usize, total_rows: usize) -> f64 {
    percentage(delinquent_rows as f64, total_rows as f64, ZeroPolicy::Zero)
}

pub fn default_rate(defaulted_rows: usize, total_rows: usize) -> f64 {
    percentage(defaulted_rows as f64, total_rows as f64, ZeroPolicy::Zero)
}

/// Row-level LTV in percent; `None` when the appraisal is zero.
pub fn loan_to_value(loan_amount: f64, appraised_value: f64) -> Option<f64> {
    if appraised_value == 0.0 {
        return None;
    }
    Some(loan_amount / appraised_value * 100.0)
}

/// Row-level DTI in percent against monthly income; `None` when income is zero.
pub fn debt_to_income(monthly_debt: f64, annual_income: f64) -> Option<f64> {
    let monthly_income = annual_income / 12.0;
    if monthly_income == 0.0 {
        return None;
    }
    Some(monthly_debt / monthly_income * 100.0)
}

/// Mean over valid rows only. Excluded rows do not count as zero;
/// with no valid row at all the average falls back to 0.
pub fn average_of_valid(values: &[Option<f64>]) -> f64 {
    let valid: Vec<f64> = values.iter().flatten().copied().collect();
    if valid.is_empty() {
        return 0.0;
    }
    valid.iter().sum::<f64>() / valid.len() as f64
}

/// Principal-weighted yield: `weighted_interest` is sum(rate * principal).
pub fn portfolio_yield(weighted_interest: f64, total_principal: f64) -> f64 {
    percentage(weighted_interest, total_principal, ZeroPolicy::Zero)
}

/// Loss on a single defaulted exposure, floored at zero.
pub fn net_loss(charge_off: f64, recoveries: f64) -> f64 {
    (charge_off - recoveries).max(0.0)
}

/// LGD as a 0-1 ratio. Undefined (NaN) when there is no defaulted exposure.
pub fn loss_given_default(total_net_loss: f64, total_exposure: f64) -> f64 {
    ratio(total_net_loss, total_exposure, ZeroPolicy::Undefined)
}

/// Share of outstanding principal held by non-performing loans, in percent.
pub fn non_performing_loan_ratio(npl_outstanding: f64, total_outstanding: f64) -> f64 {
    percentage(npl_outstanding, total_outstanding, ZeroPolicy::Undefined)
}

/// Principal already repaid as a share of original principal, in percent.
pub fn prepayment_rate(paid_principal: f64, total_principal: f64) -> f64 {
    percentage(paid_principal, total_principal, ZeroPolicy::Undefined)
}

/// Paid principal over scheduled monthly principal, as a plain ratio.
pub fn repayment_velocity(paid_principal: f64, scheduled_principal: f64) -> f64 {
    ratio(paid_principal, scheduled_principal, ZeroPolicy::Undefined)
}

/// Scheduled monthly principal of one loan; zero for a missing or zero term.
pub fn scheduled_principal(principal: f64, term_months: f64) -> f64 {
    if term_months > 0.0 {
        principal / term_months
    } else {
        0.0
    }
}

/// Weighted average rate in percent: `weighted_sum` is sum(rate * weight).
pub fn weighted_interest_rate(weighted_sum: f64, total_weight: f64) -> f64 {
    percentage(weighted_sum, total_weight, ZeroPolicy::Undefined)
}

/// Health score on a 0-10 scale.
pub fn portfolio_health(par: f64, collection_rate: f64) -> f64 {
    clamp((collection_rate - par) / 10.0, 0.0, 10.0)
}

/// Data-quality score on a 0-100 scale from ratios in 0-1.
pub fn data_quality_score(null_ratio: f64, duplicate_ratio: f64, invalid_numeric_ratio: f64) -> f64 {
    (100.0 - null_ratio * 100.0 - duplicate_ratio * 50.0 - invalid_numeric_ratio * 60.0).max(0.0)
}
