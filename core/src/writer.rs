//! The idempotent commit path.
//!
//! RULES:
//!   - Nothing is written until every user's day is computed; the write
//!     is one transactional delete+insert batch scoped to
//!     (venture, date). A cancelled or failed run leaves no partial day.
//!   - Re-running with unchanged inputs replaces the day with identical
//!     bytes and reports deleted == inserted.
//!   - Every invocation leaves a calc_run row recording the
//!     pending → computing → {committed | discarded} lifecycle.

use std::collections::HashSet;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    config::EngineConfig,
    daily::{compute_user_daily, UserDaily},
    error::{EngineError, EngineResult},
    metrics::{prefetch_bounded, MetricCache, MetricQuery, MetricSource},
    money::fmt_dollars,
    plan::Plan,
    store::{IncentiveStore, NewIncentiveRow},
    types::{Cents, PlanId},
};

/// Lifecycle of one calculation run. A committed day transitions back to
/// computing only via a later run for the same date, which replaces it
/// atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Computing,
    Committed,
    Discarded,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Computing => "computing",
            RunState::Committed => "committed",
            RunState::Discarded => "discarded",
        }
    }
}

/// What a commit did, returned for the caller's audit logging.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub run_id: String,
    pub inserted: usize,
    pub deleted: usize,
    pub items: Vec<UserDaily>,
}

impl CommitOutcome {
    pub fn total_cents(&self) -> Cents {
        self.items.iter().map(|i| i.amount_cents).sum()
    }
}

/// Orchestrates the full-venture/day commit. The scheduled daily job and
/// the on-demand admin action both funnel into `commit`.
pub struct IncentiveWriter<'a> {
    store: &'a IncentiveStore,
    config: &'a EngineConfig,
}

impl<'a> IncentiveWriter<'a> {
    pub fn new(store: &'a IncentiveStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Compute and atomically persist one venture day, reading metrics
    /// from the store's landing table.
    pub fn commit(&self, plan_id: PlanId, date: NaiveDate) -> EngineResult<CommitOutcome> {
        let plan = self.store.fetch_plan(plan_id)?;
        let snapshot = self.store.load_metric_snapshot(plan.venture_id, date)?;
        self.commit_with_source(plan_id, date, &snapshot)
    }

    /// Commit against a remote, thread-safe metric source: the day's
    /// distinct (user, metric) pairs are resolved up front through a
    /// worker pool bounded by `metric_workers`, never one thread per
    /// user, and the run proceeds against the pre-resolved values.
    pub fn commit_prefetched<S: MetricSource + Sync>(
        &self,
        plan_id: PlanId,
        date: NaiveDate,
        source: &S,
    ) -> EngineResult<CommitOutcome> {
        let plan = self.store.fetch_plan(plan_id)?;
        let rules = self.store.enabled_rules(&plan)?;
        let roster = self.store.roster(plan.venture_id)?;

        let mut seen = HashSet::new();
        let mut queries = Vec::new();
        for (user_id, role_key) in &roster {
            for rule in rules.iter().filter(|r| r.applies_to_role(role_key)) {
                if seen.insert((*user_id, rule.metric_key.clone())) {
                    queries.push(MetricQuery {
                        venture_id: plan.venture_id,
                        user_id: *user_id,
                        role_key: role_key.clone(),
                        metric_key: rule.metric_key.clone(),
                        date,
                    });
                }
            }
        }

        let resolved = prefetch_bounded(source, queries, self.config.metric_workers)?;
        self.commit_with_source(plan_id, date, &resolved)
    }

    /// Same commit path with an injected metric source. The engine never
    /// cares where the numbers come from; a source error aborts the run
    /// with nothing written.
    pub fn commit_with_source(
        &self,
        plan_id: PlanId,
        date: NaiveDate,
        metrics: &dyn MetricSource,
    ) -> EngineResult<CommitOutcome> {
        let plan = self.store.fetch_plan(plan_id)?;
        if !plan.covers(date) {
            return Err(EngineError::PlanNotActive { plan_id, date });
        }

        let run_id = Uuid::new_v4().to_string();
        self.store
            .insert_calc_run(&run_id, plan_id, plan.venture_id, date)?;

        match self.commit_inner(&plan, date, &run_id, metrics) {
            Ok(outcome) => {
                self.store.finish_calc_run(
                    &run_id,
                    RunState::Committed,
                    outcome.inserted,
                    outcome.deleted,
                )?;
                log::info!(
                    "plan {plan_id} {date}: committed {} rows ({} replaced), total {}",
                    outcome.inserted,
                    outcome.deleted,
                    fmt_dollars(outcome.total_cents()),
                );
                Ok(outcome)
            }
            Err(e) => {
                // Best-effort bookkeeping; the original error wins.
                if let Err(mark) = self.store.finish_calc_run(&run_id, RunState::Discarded, 0, 0)
                {
                    log::warn!("could not mark run {run_id} discarded: {mark}");
                }
                log::warn!("plan {plan_id} {date}: run {run_id} discarded: {e}");
                Err(e)
            }
        }
    }

    fn commit_inner(
        &self,
        plan: &Plan,
        date: NaiveDate,
        run_id: &str,
        metrics: &dyn MetricSource,
    ) -> EngineResult<CommitOutcome> {
        // Rules are validated in full before any metric work.
        let rules = self.store.enabled_rules(plan)?;
        let roster = self.store.roster(plan.venture_id)?;

        if roster.len() > self.config.max_users_per_run {
            return Err(EngineError::UserCapExceeded {
                venture_id: plan.venture_id,
                date,
                users: roster.len(),
                cap: self.config.max_users_per_run,
            });
        }

        self.store.mark_calc_run(run_id, RunState::Computing)?;

        // Metric rows for users without a membership row stay unpaid;
        // rules are role-scoped and roles live on memberships.
        let members: HashSet<_> = roster.iter().map(|(user_id, _)| *user_id).collect();
        for user_id in self.store.metric_user_ids(plan.venture_id, date)? {
            if !members.contains(&user_id) {
                log::debug!(
                    "metrics present for user {user_id} without a membership row in venture {}; ignored",
                    plan.venture_id
                );
            }
        }
        let cache = MetricCache::new(metrics);

        let mut items = Vec::with_capacity(roster.len());
        for (user_id, role_key) in &roster {
            items.push(compute_user_daily(
                *user_id,
                role_key,
                plan.venture_id,
                date,
                &rules,
                &cache,
            )?);
        }
        log::debug!(
            "plan {} {date}: {} users computed from {} distinct metric lookups",
            plan.id,
            items.len(),
            cache.distinct_lookups(),
        );

        let mut rows = Vec::with_capacity(items.len());
        for item in &items {
            rows.push(NewIncentiveRow {
                user_id: item.user_id,
                amount_cents: item.amount_cents,
                currency: plan.currency.clone(),
                breakdown_json: serde_json::to_string(&item.breakdown)?,
            });
        }

        let (deleted, inserted) = self.store.replace_day(plan.venture_id, date, &rows)?;

        Ok(CommitOutcome {
            run_id: run_id.to_string(),
            inserted,
            deleted,
            items,
        })
    }
}
