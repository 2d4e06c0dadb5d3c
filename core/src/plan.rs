//! Incentive plans and rules — the rule evaluator.
//!
//! RULES:
//!   - A calc type carries exactly its required fields; a stored rule
//!     that cannot be matched to a variant fails loading with the
//!     offending rule id. The evaluator never guesses a default.
//!   - `Rule::evaluate` is pure: one rule, one metric value, one rounded
//!     amount. Rounding to cents happens here and nowhere else.
//!   - Disabled rules are filtered by the store query and never reach
//!     evaluation.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    error::{EngineError, EngineResult},
    money::round_to_cents,
    types::{Cents, PlanId, RuleId, VentureId},
};

/// A named, venture-scoped, versioned set of incentive rules.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: PlanId,
    pub venture_id: VentureId,
    pub name: String,
    pub currency: String,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub is_active: bool,
}

impl Plan {
    /// Whether this plan is authoritative for `date`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.is_active
            && self.effective_from <= date
            && self.effective_to.map_or(true, |to| date <= to)
    }
}

/// Calculation semantics, one variant per supported calc type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalcType {
    /// amount = metric × rate. The metric is a count.
    FlatPerUnit { rate: f64 },
    /// amount = metric × rate. `rate` is a pre-normalized fraction
    /// (0.005 = 0.5%), fixed and validated at rule creation — never
    /// inferred per call.
    PercentOfMetric { rate: f64 },
    /// The full bonus once the metric meets the threshold (inclusive).
    /// Does not scale beyond it.
    BonusOnTarget { threshold: f64, bonus: f64 },
}

/// One pay component: (role, metric, calculation).
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub plan_id: PlanId,
    /// None applies the rule to every role in the venture.
    pub role_key: Option<String>,
    pub metric_key: String,
    pub calc: CalcType,
    pub is_enabled: bool,
}

impl Rule {
    pub fn applies_to_role(&self, role_key: &str) -> bool {
        self.role_key.as_deref().map_or(true, |r| r == role_key)
    }

    /// The rule evaluator: one rule, one metric value, one rounded amount.
    pub fn evaluate(&self, metric_value: f64) -> Cents {
        match self.calc {
            CalcType::FlatPerUnit { rate } | CalcType::PercentOfMetric { rate } => {
                round_to_cents(metric_value * rate)
            }
            CalcType::BonusOnTarget { threshold, bonus } => {
                if metric_value >= threshold {
                    round_to_cents(bonus)
                } else {
                    0
                }
            }
        }
    }
}

/// Validate raw rule fields into a `CalcType`, or fail with the offending
/// rule id. Shared by the store's rule loader and custom simulation rules.
pub fn parse_calc_type(
    rule_id: RuleId,
    calc_type: &str,
    rate: Option<f64>,
    threshold_value: Option<f64>,
    bonus_amount: Option<f64>,
) -> EngineResult<CalcType> {
    let misconfigured = |reason: String| EngineError::RuleConfiguration { rule_id, reason };

    match calc_type {
        "FLAT_PER_UNIT" => {
            let rate =
                rate.ok_or_else(|| misconfigured("FLAT_PER_UNIT requires a rate".into()))?;
            if !rate.is_finite() || rate <= 0.0 {
                return Err(misconfigured("rate must be a positive number".into()));
            }
            Ok(CalcType::FlatPerUnit { rate })
        }
        "PERCENT_OF_METRIC" => {
            let rate =
                rate.ok_or_else(|| misconfigured("PERCENT_OF_METRIC requires a rate".into()))?;
            // Pre-normalized fraction: 0.005 means 0.5%. A value above 1
            // was almost certainly entered in percentage points.
            if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
                return Err(misconfigured("rate must be a fraction in (0, 1]".into()));
            }
            Ok(CalcType::PercentOfMetric { rate })
        }
        "BONUS_ON_TARGET" => {
            let threshold = threshold_value.ok_or_else(|| {
                misconfigured("BONUS_ON_TARGET requires a threshold_value".into())
            })?;
            let bonus = bonus_amount.ok_or_else(|| {
                misconfigured("BONUS_ON_TARGET requires a bonus_amount".into())
            })?;
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(misconfigured("threshold_value must be non-negative".into()));
            }
            if !bonus.is_finite() || bonus <= 0.0 {
                return Err(misconfigured("bonus_amount must be positive".into()));
            }
            Ok(CalcType::BonusOnTarget { threshold, bonus })
        }
        other => Err(misconfigured(format!("unknown calc type '{other}'"))),
    }
}

/// Raw rule fields as supplied for a custom simulation. Validated with
/// the same code path as stored rules; never persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDraft {
    pub role_key: Option<String>,
    pub metric_key: String,
    pub calc_type: String,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub threshold_value: Option<f64>,
    #[serde(default)]
    pub bonus_amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl RuleDraft {
    /// Turn a draft into an evaluable rule under `plan`, with a local id.
    pub fn into_rule(self, local_id: RuleId, plan: &Plan) -> EngineResult<Rule> {
        if let Some(currency) = &self.currency {
            if currency != &plan.currency {
                return Err(EngineError::CurrencyMismatch { rule_id: local_id });
            }
        }
        let calc = parse_calc_type(
            local_id,
            &self.calc_type,
            self.rate,
            self.threshold_value,
            self.bonus_amount,
        )?;
        Ok(Rule {
            id: local_id,
            plan_id: plan.id,
            role_key: self.role_key,
            metric_key: self.metric_key,
            calc,
            is_enabled: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(calc: CalcType) -> Rule {
        Rule {
            id: 1,
            plan_id: 1,
            role_key: None,
            metric_key: "loads_completed".into(),
            calc,
            is_enabled: true,
        }
    }

    #[test]
    fn flat_per_unit_multiplies_and_rounds() {
        let r = rule(CalcType::FlatPerUnit { rate: 50.0 });
        assert_eq!(r.evaluate(3.0), 15_000);
        assert_eq!(r.evaluate(0.0), 0);
    }

    #[test]
    fn percent_of_metric_uses_prenormalized_fraction() {
        let r = rule(CalcType::PercentOfMetric { rate: 0.005 });
        assert_eq!(r.evaluate(1000.0), 500);
    }

    #[test]
    fn bonus_threshold_is_inclusive_and_unscaled() {
        let r = rule(CalcType::BonusOnTarget {
            threshold: 10.0,
            bonus: 500.0,
        });
        assert_eq!(r.evaluate(9.0), 0);
        assert_eq!(r.evaluate(10.0), 50_000);
        assert_eq!(r.evaluate(15.0), 50_000);
    }

    #[test]
    fn unknown_calc_type_is_a_configuration_error() {
        let err = parse_calc_type(7, "TIERED_SLAB", Some(1.0), None, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::RuleConfiguration { rule_id: 7, .. }
        ));
    }

    #[test]
    fn missing_fields_are_configuration_errors() {
        assert!(parse_calc_type(1, "FLAT_PER_UNIT", None, None, None).is_err());
        assert!(parse_calc_type(2, "BONUS_ON_TARGET", None, Some(10.0), None).is_err());
        assert!(parse_calc_type(3, "BONUS_ON_TARGET", None, None, Some(500.0)).is_err());
    }

    #[test]
    fn percentage_points_are_rejected() {
        // 2 (meaning "2%") must be entered as 0.02.
        assert!(parse_calc_type(1, "PERCENT_OF_METRIC", Some(2.0), None, None).is_err());
    }

    #[test]
    fn plan_window_covers_inclusive_bounds() {
        let plan = Plan {
            id: 1,
            venture_id: 1,
            name: "Q3 dispatch".into(),
            currency: "USD".into(),
            effective_from: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            effective_to: Some(NaiveDate::from_ymd_opt(2025, 9, 30).unwrap()),
            is_active: true,
        };
        assert!(plan.covers(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()));
        assert!(plan.covers(NaiveDate::from_ymd_opt(2025, 9, 30).unwrap()));
        assert!(!plan.covers(NaiveDate::from_ymd_opt(2025, 10, 1).unwrap()));
    }
}
