use rusqlite::{params, OptionalExtension};

use super::{date_from_sql, date_to_sql, IncentiveStore};
use crate::{
    error::{EngineError, EngineResult},
    plan::{parse_calc_type, Plan, Rule},
    types::{PlanId, RuleId},
};

impl IncentiveStore {
    pub fn insert_plan(&self, plan: &Plan) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO incentive_plan
             (id, venture_id, name, currency, effective_from, effective_to, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                plan.id,
                plan.venture_id,
                plan.name,
                plan.currency,
                date_to_sql(plan.effective_from),
                plan.effective_to.map(date_to_sql),
                plan.is_active,
            ],
        )?;
        Ok(())
    }

    pub fn fetch_plan(&self, plan_id: PlanId) -> EngineResult<Plan> {
        let plan = self
            .conn
            .query_row(
                "SELECT id, venture_id, name, currency, effective_from, effective_to, is_active
                 FROM incentive_plan WHERE id = ?1",
                params![plan_id],
                |row| {
                    Ok(Plan {
                        id: row.get(0)?,
                        venture_id: row.get(1)?,
                        name: row.get(2)?,
                        currency: row.get(3)?,
                        effective_from: date_from_sql(&row.get::<_, String>(4)?)?,
                        effective_to: row
                            .get::<_, Option<String>>(5)?
                            .map(|t| date_from_sql(&t))
                            .transpose()?,
                        is_active: row.get(6)?,
                    })
                },
            )
            .optional()?;
        plan.ok_or(EngineError::PlanNotFound { plan_id })
    }

    /// Insert a rule row and return its id. Behavior changes should insert
    /// a new row and disable the old one, never mutate it.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_rule(
        &self,
        plan_id: PlanId,
        role_key: Option<&str>,
        metric_key: &str,
        calc_type: &str,
        rate: Option<f64>,
        threshold_value: Option<f64>,
        bonus_amount: Option<f64>,
        currency: Option<&str>,
        is_enabled: bool,
    ) -> EngineResult<RuleId> {
        self.conn.execute(
            "INSERT INTO incentive_rule
             (plan_id, role_key, metric_key, calc_type, rate,
              threshold_value, bonus_amount, currency, is_enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                plan_id,
                role_key,
                metric_key,
                calc_type,
                rate,
                threshold_value,
                bonus_amount,
                currency,
                is_enabled,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn set_rule_enabled(&self, rule_id: RuleId, is_enabled: bool) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE incentive_rule SET is_enabled = ?2 WHERE id = ?1",
            params![rule_id, is_enabled],
        )?;
        Ok(())
    }

    /// Load and validate the plan's enabled rules in stable (id) order.
    ///
    /// Any row that cannot be matched to a calc-type variant, is missing
    /// a required field, or carries a currency other than the plan's
    /// fails the load — a misconfigured rule must abort the whole run
    /// before any metric work happens.
    pub fn enabled_rules(&self, plan: &Plan) -> EngineResult<Vec<Rule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, role_key, metric_key, calc_type, rate,
                    threshold_value, bonus_amount, currency
             FROM incentive_rule
             WHERE plan_id = ?1 AND is_enabled = 1
             ORDER BY id ASC",
        )?;
        let raw = stmt
            .query_map(params![plan.id], |row| {
                Ok((
                    row.get::<_, RuleId>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut rules = Vec::with_capacity(raw.len());
        for (id, role_key, metric_key, calc_type, rate, threshold, bonus, currency) in raw {
            if let Some(rule_currency) = &currency {
                if rule_currency != &plan.currency {
                    return Err(EngineError::CurrencyMismatch { rule_id: id });
                }
            }
            let calc = parse_calc_type(id, &calc_type, rate, threshold, bonus)?;
            rules.push(Rule {
                id,
                plan_id: plan.id,
                role_key,
                metric_key,
                calc,
                is_enabled: true,
            });
        }
        Ok(rules)
    }
}
