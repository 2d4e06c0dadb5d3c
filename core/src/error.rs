use chrono::NaiveDate;
use thiserror::Error;

use crate::types::{PlanId, RuleId, VentureId};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rule {rule_id} misconfigured: {reason}")]
    RuleConfiguration { rule_id: RuleId, reason: String },

    #[error("Rule {rule_id} currency differs from its plan's currency")]
    CurrencyMismatch { rule_id: RuleId },

    #[error("Metric source failure: {detail}")]
    MetricSource { detail: String },

    #[error("Plan {plan_id} not found")]
    PlanNotFound { plan_id: PlanId },

    #[error("Plan {plan_id} is not active on {date}")]
    PlanNotActive { plan_id: PlanId, date: NaiveDate },

    #[error(
        "Run for venture {venture_id} on {date} would process {users} users, cap is {cap}"
    )]
    UserCapExceeded {
        venture_id: VentureId,
        date: NaiveDate,
        users: usize,
        cap: usize,
    },

    #[error("Concurrent commit detected for venture {venture_id} on {date}")]
    ConcurrencyConflict {
        venture_id: VentureId,
        date: NaiveDate,
    },

    #[error("Invalid date range: {from}..{to}")]
    InvalidDateRange { from: NaiveDate, to: NaiveDate },

    #[error("Date range {from}..{to} spans {days} days, simulation cap is {cap}")]
    DateRangeTooLarge {
        from: NaiveDate,
        to: NaiveDate,
        days: i64,
        cap: i64,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
