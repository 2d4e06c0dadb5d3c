//! What-if simulation and diffing.
//!
//! RULES:
//!   - Simulation never writes. It reads plan/rule/roster/metric state
//!     and computes in memory; no path here touches the writer or
//!     mutates storage, so concurrent simulations are always safe.
//!   - Custom rule sets are validated exactly like stored rules, get
//!     local ids starting at 1, and live only for the duration of the
//!     call.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    config::EngineConfig,
    daily::compute_user_daily,
    error::{EngineError, EngineResult},
    metrics::MetricCache,
    plan::{Plan, Rule, RuleDraft},
    store::IncentiveStore,
    types::{Cents, PlanId, RuleId, UserId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    /// Evaluate the plan's live rules, read-only, as the baseline.
    CurrentPlan,
    /// Evaluate a caller-supplied rule set that is never persisted.
    CustomRules,
    /// Run both and diff simulated against baseline.
    Compare,
}

#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub plan_id: PlanId,
    /// Inclusive date range.
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Restrict to these users; empty means every venture member.
    pub user_ids: Vec<UserId>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub total_amount_cents: Cents,
    pub total_users: usize,
    pub total_days: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub amount_cents: Cents,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSimulation {
    pub user_id: UserId,
    pub role_key: String,
    pub total_amount_cents: Cents,
    pub days_with_incentives: usize,
    pub daily: Vec<DailyPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSimulation {
    pub role_key: String,
    pub total_amount_cents: Cents,
    pub user_count: usize,
}

/// Ephemeral result consumed by narrative-summary collaborators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub plan_label: String,
    pub summary: SimulationSummary,
    pub per_user: Vec<UserSimulation>,
    pub per_role: Vec<RoleSimulation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub total_delta_cents: Cents,
    pub total_delta_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDelta {
    pub user_id: UserId,
    pub role_key: String,
    pub baseline_cents: Cents,
    pub simulated_cents: Cents,
    pub delta_cents: Cents,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDelta {
    pub role_key: String,
    pub delta_cents: Cents,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationDiff {
    pub summary: DiffSummary,
    pub per_user: Vec<UserDelta>,
    pub per_role: Vec<RoleDelta>,
}

/// What a simulation call produced, by mode: baseline, simulated, or
/// both plus their diff.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOutcome {
    pub baseline: Option<SimulationResult>,
    pub simulated: Option<SimulationResult>,
    pub diff: Option<SimulationDiff>,
}

pub struct SimulationEngine<'a> {
    store: &'a IncentiveStore,
    config: &'a EngineConfig,
}

impl<'a> SimulationEngine<'a> {
    pub fn new(store: &'a IncentiveStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn simulate(
        &self,
        mode: SimulationMode,
        request: &SimulationRequest,
        custom_rules: Option<Vec<RuleDraft>>,
    ) -> EngineResult<SimulationOutcome> {
        let plan = self.store.fetch_plan(request.plan_id)?;
        let days = self.validate_range(request)?;

        let baseline = match mode {
            SimulationMode::CurrentPlan | SimulationMode::Compare => {
                let rules = self.store.enabled_rules(&plan)?;
                Some(self.run(&plan, request, &rules, &days, "Current plan")?)
            }
            SimulationMode::CustomRules => None,
        };

        let simulated = match mode {
            SimulationMode::CustomRules | SimulationMode::Compare => {
                let drafts = custom_rules.unwrap_or_default();
                let mut rules = Vec::with_capacity(drafts.len());
                for (idx, draft) in drafts.into_iter().enumerate() {
                    rules.push(draft.into_rule(idx as RuleId + 1, &plan)?);
                }
                let label = request.label.as_deref().unwrap_or("Custom simulation");
                Some(self.run(&plan, request, &rules, &days, label)?)
            }
            SimulationMode::CurrentPlan => None,
        };

        let diff = match (&baseline, &simulated) {
            (Some(base), Some(sim)) => Some(diff(base, sim)),
            _ => None,
        };

        Ok(SimulationOutcome {
            baseline,
            simulated,
            diff,
        })
    }

    fn validate_range(&self, request: &SimulationRequest) -> EngineResult<Vec<NaiveDate>> {
        if request.from > request.to {
            return Err(EngineError::InvalidDateRange {
                from: request.from,
                to: request.to,
            });
        }
        let span = (request.to - request.from).num_days() + 1;
        if span > self.config.simulation_max_days {
            return Err(EngineError::DateRangeTooLarge {
                from: request.from,
                to: request.to,
                days: span,
                cap: self.config.simulation_max_days,
            });
        }
        Ok(request
            .from
            .iter_days()
            .take(span as usize)
            .collect())
    }

    /// Evaluate one rule set over the range. Read-only: per-day metric
    /// snapshots in, in-memory accumulation out.
    fn run(
        &self,
        plan: &Plan,
        request: &SimulationRequest,
        rules: &[Rule],
        days: &[NaiveDate],
        label: &str,
    ) -> EngineResult<SimulationResult> {
        let roster = self.store.roster(plan.venture_id)?;
        let filter: BTreeSet<UserId> = request.user_ids.iter().copied().collect();
        let targets: Vec<&(UserId, String)> = roster
            .iter()
            .filter(|(user_id, _)| filter.is_empty() || filter.contains(user_id))
            .collect();

        let mut per_user: BTreeMap<UserId, UserSimulation> = targets
            .iter()
            .map(|(user_id, role_key)| {
                (
                    *user_id,
                    UserSimulation {
                        user_id: *user_id,
                        role_key: role_key.clone(),
                        total_amount_cents: 0,
                        days_with_incentives: 0,
                        daily: Vec::with_capacity(days.len()),
                    },
                )
            })
            .collect();

        for &date in days {
            let snapshot = self.store.load_metric_snapshot(plan.venture_id, date)?;
            let cache = MetricCache::new(&snapshot);
            for entry in per_user.values_mut() {
                let daily = compute_user_daily(
                    entry.user_id,
                    &entry.role_key,
                    plan.venture_id,
                    date,
                    rules,
                    &cache,
                )?;
                entry.total_amount_cents += daily.amount_cents;
                if daily.amount_cents > 0 {
                    entry.days_with_incentives += 1;
                }
                entry.daily.push(DailyPoint {
                    date,
                    amount_cents: daily.amount_cents,
                });
            }
        }

        let per_user: Vec<UserSimulation> = per_user.into_values().collect();

        let mut roles: BTreeMap<String, (Cents, usize)> = BTreeMap::new();
        for user in &per_user {
            let slot = roles.entry(user.role_key.clone()).or_default();
            slot.0 += user.total_amount_cents;
            slot.1 += 1;
        }
        let per_role = roles
            .into_iter()
            .map(|(role_key, (total_amount_cents, user_count))| RoleSimulation {
                role_key,
                total_amount_cents,
                user_count,
            })
            .collect();

        let summary = SimulationSummary {
            total_amount_cents: per_user.iter().map(|u| u.total_amount_cents).sum(),
            total_users: per_user.len(),
            total_days: days.len() as i64,
        };

        log::debug!(
            "simulated '{label}' for plan {}: {} users x {} days, total {}",
            plan.id,
            summary.total_users,
            summary.total_days,
            crate::money::fmt_dollars(summary.total_amount_cents),
        );

        Ok(SimulationResult {
            plan_label: label.to_string(),
            summary,
            per_user,
            per_role,
        })
    }
}

/// Per-user and per-role deltas between two simulation results. A user
/// absent from one side counts as zero on that side.
pub fn diff(baseline: &SimulationResult, simulated: &SimulationResult) -> SimulationDiff {
    let base: BTreeMap<UserId, &UserSimulation> =
        baseline.per_user.iter().map(|u| (u.user_id, u)).collect();
    let sim: BTreeMap<UserId, &UserSimulation> =
        simulated.per_user.iter().map(|u| (u.user_id, u)).collect();

    let all_users: BTreeSet<UserId> = base.keys().chain(sim.keys()).copied().collect();

    let mut per_user = Vec::with_capacity(all_users.len());
    let mut roles: BTreeMap<String, Cents> = BTreeMap::new();
    for user_id in all_users {
        let baseline_cents = base.get(&user_id).map_or(0, |u| u.total_amount_cents);
        let simulated_cents = sim.get(&user_id).map_or(0, |u| u.total_amount_cents);
        let role_key = sim
            .get(&user_id)
            .or_else(|| base.get(&user_id))
            .map(|u| u.role_key.clone())
            .unwrap_or_default();
        let delta_cents = simulated_cents - baseline_cents;
        *roles.entry(role_key.clone()).or_default() += delta_cents;
        per_user.push(UserDelta {
            user_id,
            role_key,
            baseline_cents,
            simulated_cents,
            delta_cents,
        });
    }

    let per_role = roles
        .into_iter()
        .map(|(role_key, delta_cents)| RoleDelta {
            role_key,
            delta_cents,
        })
        .collect();

    let total_delta_cents =
        simulated.summary.total_amount_cents - baseline.summary.total_amount_cents;
    let total_delta_pct = if baseline.summary.total_amount_cents != 0 {
        (total_delta_cents as f64 / baseline.summary.total_amount_cents as f64) * 100.0
    } else if simulated.summary.total_amount_cents != 0 {
        100.0
    } else {
        0.0
    };

    SimulationDiff {
        summary: DiffSummary {
            total_delta_cents,
            total_delta_pct,
        },
        per_user,
        per_role,
    }
}
