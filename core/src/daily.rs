//! Per-user daily aggregation: apply every matching enabled rule to one
//! user's metrics and produce an itemized breakdown that sums exactly to
//! the day total.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    error::EngineResult,
    metrics::{MetricQuery, MetricSource},
    plan::Rule,
    types::{Cents, RuleId, UserId, VentureId},
};

/// One rule's contribution to a user's day. Serialized into the stored
/// breakdown as `{"ruleId": …, "amountCents": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleContribution {
    pub rule_id: RuleId,
    pub amount_cents: Cents,
}

/// The itemized per-rule contributions summing exactly to a user's total.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Breakdown {
    pub rules: Vec<RuleContribution>,
}

impl Breakdown {
    pub fn total(&self) -> Cents {
        self.rules.iter().map(|r| r.amount_cents).sum()
    }
}

/// One user's computed day.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDaily {
    pub user_id: UserId,
    pub role_key: String,
    pub amount_cents: Cents,
    pub breakdown: Breakdown,
}

/// Apply all role-matching rules for one user, in stable rule order.
///
/// Zero-amount entries are kept — the breakdown is the audit trail. An
/// unavailable metric omits its entry rather than recording a false
/// zero. The total is the integer sum of already-rounded rule amounts,
/// so the breakdown-sum invariant holds with no cumulative drift. A user
/// with no matching rules still yields a (zero-amount) day.
pub fn compute_user_daily(
    user_id: UserId,
    role_key: &str,
    venture_id: VentureId,
    date: NaiveDate,
    rules: &[Rule],
    metrics: &dyn MetricSource,
) -> EngineResult<UserDaily> {
    let mut breakdown = Breakdown::default();

    for rule in rules.iter().filter(|r| r.applies_to_role(role_key)) {
        let query = MetricQuery {
            venture_id,
            user_id,
            role_key: role_key.to_string(),
            metric_key: rule.metric_key.clone(),
            date,
        };
        let Some(metric_value) = metrics.metric(&query)? else {
            log::debug!(
                "metric '{}' unavailable for user {user_id} on {date}; omitting rule {}",
                rule.metric_key,
                rule.id
            );
            continue;
        };
        breakdown.rules.push(RuleContribution {
            rule_id: rule.id,
            amount_cents: rule.evaluate(metric_value),
        });
    }

    Ok(UserDaily {
        user_id,
        role_key: role_key.to_string(),
        amount_cents: breakdown.total(),
        breakdown,
    })
}
