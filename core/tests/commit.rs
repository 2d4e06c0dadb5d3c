//! The idempotent commit path: replacement semantics, the breakdown-sum
//! invariant, eligibility, caps, and failure atomicity.

mod common;

use common::{base_store, day, seed_standard_rules, PLAN, VENTURE};
use incentive_core::config::EngineConfig;
use incentive_core::error::{EngineError, EngineResult};
use incentive_core::metrics::{MetricQuery, MetricSource};
use incentive_core::store::NewIncentiveRow;
use incentive_core::writer::IncentiveWriter;

fn seed_metrics(store: &incentive_core::store::IncentiveStore) {
    store.upsert_metric(VENTURE, 101, "loads_completed", day(), 3.0).unwrap();
    store.upsert_metric(VENTURE, 101, "loads_revenue", day(), 1000.0).unwrap();
    store.upsert_metric(VENTURE, 102, "loads_completed", day(), 12.0).unwrap();
    store.upsert_metric(VENTURE, 102, "loads_revenue", day(), 4800.0).unwrap();
}

/// Committing twice with unchanged inputs stores byte-identical rows and
/// reports deleted == inserted on the second run.
#[test]
fn commit_is_idempotent() {
    let store = base_store();
    seed_standard_rules(&store);
    seed_metrics(&store);
    let config = EngineConfig::default_test();
    let writer = IncentiveWriter::new(&store, &config);

    let first = writer.commit(PLAN, day()).unwrap();
    assert_eq!(first.deleted, 0);
    assert_eq!(first.inserted, 3, "all roster members get a row");
    let rows_first = store.day_rows(VENTURE, day()).unwrap();

    let second = writer.commit(PLAN, day()).unwrap();
    assert_eq!(second.deleted, second.inserted);
    assert_eq!(second.inserted, first.inserted);

    let rows_second = store.day_rows(VENTURE, day()).unwrap();
    assert_eq!(rows_first, rows_second, "stored rows must be byte-identical");
}

/// Every stored row satisfies sum(breakdown) == amount exactly.
#[test]
fn breakdown_sums_match_amounts_exactly() {
    let store = base_store();
    seed_standard_rules(&store);
    seed_metrics(&store);
    let config = EngineConfig::default_test();
    IncentiveWriter::new(&store, &config).commit(PLAN, day()).unwrap();

    let rows = store.day_rows(VENTURE, day()).unwrap();
    assert!(!rows.is_empty());
    for row in rows {
        let breakdown = row.breakdown().unwrap();
        assert_eq!(
            breakdown.total(),
            row.amount_cents,
            "user {} breakdown drifted from its total",
            row.user_id
        );
    }
}

/// User 102 had 12 loads: $50 x 12 + 0.5% of $4800 + the $500 bonus.
#[test]
fn amounts_combine_all_matching_rules() {
    let store = base_store();
    seed_standard_rules(&store);
    seed_metrics(&store);
    let config = EngineConfig::default_test();
    IncentiveWriter::new(&store, &config).commit(PLAN, day()).unwrap();

    let row = store.daily_breakdown(102, VENTURE, day()).unwrap().unwrap();
    assert_eq!(row.amount_cents, 60_000 + 2_400 + 50_000);
    assert_eq!(row.currency, "USD");
}

/// A member with no activity is still eligible: amount 0, zero-filled
/// breakdown for their role's rules, never omitted from the day.
#[test]
fn inactive_members_get_zero_rows() {
    let store = base_store();
    seed_standard_rules(&store);
    seed_metrics(&store);
    let config = EngineConfig::default_test();
    IncentiveWriter::new(&store, &config).commit(PLAN, day()).unwrap();

    // 103 is a csr; no dispatcher rule matches, breakdown is empty.
    let row = store.daily_breakdown(103, VENTURE, day()).unwrap().unwrap();
    assert_eq!(row.amount_cents, 0);
    assert!(row.breakdown().unwrap().rules.is_empty());
}

/// Disabling a rule and re-committing replaces the day: the old rows are
/// deleted wholesale, and the rule vanishes from every breakdown.
#[test]
fn recompute_after_rule_change_replaces_the_day() {
    let store = base_store();
    let (_, pct, _) = seed_standard_rules(&store);
    seed_metrics(&store);
    let config = EngineConfig::default_test();
    let writer = IncentiveWriter::new(&store, &config);

    let first = writer.commit(PLAN, day()).unwrap();
    store.set_rule_enabled(pct, false).unwrap();
    let second = writer.commit(PLAN, day()).unwrap();

    assert_eq!(second.deleted, first.inserted);
    let rows = store.day_rows(VENTURE, day()).unwrap();
    for row in rows {
        assert!(
            row.breakdown().unwrap().rules.iter().all(|r| r.rule_id != pct),
            "disabled rule must not survive recomputation"
        );
    }
}

/// Over the user cap nothing is committed — all-or-nothing, not a
/// truncated batch.
#[test]
fn user_cap_is_all_or_nothing() {
    let store = base_store();
    seed_standard_rules(&store);
    seed_metrics(&store);
    let config = EngineConfig {
        max_users_per_run: 2,
        ..EngineConfig::default_test()
    };

    let err = IncentiveWriter::new(&store, &config)
        .commit(PLAN, day())
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::UserCapExceeded { users: 3, cap: 2, .. }
    ));
    assert_eq!(store.day_row_count(VENTURE, day()).unwrap(), 0);
}

/// An unreachable metric source fails the whole run loudly; no partial
/// day is ever visible and the calc_run row ends up discarded.
#[test]
fn metric_infrastructure_failure_commits_nothing() {
    struct Unreachable;
    impl MetricSource for Unreachable {
        fn metric(&self, _q: &MetricQuery) -> EngineResult<Option<f64>> {
            Err(EngineError::MetricSource {
                detail: "aggregator connection refused".into(),
            })
        }
    }

    let store = base_store();
    seed_standard_rules(&store);
    let config = EngineConfig::default_test();

    let err = IncentiveWriter::new(&store, &config)
        .commit_with_source(PLAN, day(), &Unreachable)
        .unwrap_err();

    assert!(matches!(err, EngineError::MetricSource { .. }));
    assert_eq!(store.day_row_count(VENTURE, day()).unwrap(), 0);
}

/// calc_run bookkeeping: a successful run ends committed, a failed run
/// ends discarded.
#[test]
fn calc_runs_record_their_lifecycle() {
    let store = base_store();
    seed_standard_rules(&store);
    seed_metrics(&store);
    let config = EngineConfig::default_test();
    let writer = IncentiveWriter::new(&store, &config);

    let outcome = writer.commit(PLAN, day()).unwrap();
    assert_eq!(
        store.calc_run_state(&outcome.run_id).unwrap().as_deref(),
        Some("committed")
    );

    struct Unreachable;
    impl MetricSource for Unreachable {
        fn metric(&self, _q: &MetricQuery) -> EngineResult<Option<f64>> {
            Err(EngineError::MetricSource {
                detail: "down".into(),
            })
        }
    }
    let _ = writer.commit_with_source(PLAN, day(), &Unreachable).unwrap_err();

    // The failed run must not have disturbed the committed day.
    assert_eq!(store.day_row_count(VENTURE, day()).unwrap(), 3);
}

/// Commits against a plan outside its active window are rejected.
#[test]
fn plan_window_is_enforced() {
    let store = base_store();
    seed_standard_rules(&store);
    let config = EngineConfig::default_test();
    let writer = IncentiveWriter::new(&store, &config);

    let before_window = chrono::NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
    let err = writer.commit(PLAN, before_window).unwrap_err();
    assert!(matches!(err, EngineError::PlanNotActive { .. }));

    let err = writer.commit(999, day()).unwrap_err();
    assert!(matches!(err, EngineError::PlanNotFound { plan_id: 999 }));
}

/// The unique constraint backstops a corrupted batch: duplicate user
/// rows in one replacement surface as a clean conflict and the whole
/// transaction rolls back — never a mixed row set.
#[test]
fn unique_constraint_rolls_back_the_whole_batch() {
    let store = base_store();
    let row = NewIncentiveRow {
        user_id: 101,
        amount_cents: 100,
        currency: "USD".into(),
        breakdown_json: r#"{"rules":[]}"#.into(),
    };

    let err = store
        .replace_day(VENTURE, day(), &[row.clone(), row])
        .unwrap_err();

    assert!(matches!(err, EngineError::ConcurrencyConflict { .. }));
    assert_eq!(
        store.day_row_count(VENTURE, day()).unwrap(),
        0,
        "rollback must leave nothing behind"
    );
}

/// Metric rows for a user without a membership row never produce pay.
#[test]
fn non_member_metrics_are_ignored() {
    let store = base_store();
    seed_standard_rules(&store);
    seed_metrics(&store);
    store.insert_user(999, "Ghost Contractor").unwrap();
    store.upsert_metric(VENTURE, 999, "loads_completed", day(), 50.0).unwrap();

    let config = EngineConfig::default_test();
    IncentiveWriter::new(&store, &config).commit(PLAN, day()).unwrap();

    assert!(store.daily_breakdown(999, VENTURE, day()).unwrap().is_none());
    assert_eq!(store.day_row_count(VENTURE, day()).unwrap(), 3);
}

/// A remote thread-safe source resolved through the bounded prefetch
/// pool produces exactly the rows the store-backed path would.
#[test]
fn prefetched_commit_matches_the_snapshot_path() {
    struct RemoteAggregator;
    impl MetricSource for RemoteAggregator {
        fn metric(&self, q: &MetricQuery) -> EngineResult<Option<f64>> {
            Ok(Some(match (q.user_id, q.metric_key.as_str()) {
                (101, "loads_completed") => 3.0,
                (101, "loads_revenue") => 1000.0,
                (102, "loads_completed") => 12.0,
                (102, "loads_revenue") => 4800.0,
                _ => 0.0,
            }))
        }
    }

    let store = base_store();
    seed_standard_rules(&store);
    seed_metrics(&store);
    let config = EngineConfig::default_test();
    let writer = IncentiveWriter::new(&store, &config);

    writer.commit(PLAN, day()).unwrap();
    let snapshot_rows = store.day_rows(VENTURE, day()).unwrap();

    let outcome = writer.commit_prefetched(PLAN, day(), &RemoteAggregator).unwrap();
    assert_eq!(outcome.inserted, 3);

    assert_eq!(store.day_rows(VENTURE, day()).unwrap(), snapshot_rows);
}

/// The consumer-facing queries see exactly what the writer stored.
#[test]
fn timeseries_and_audit_queries_read_back_committed_days() {
    let store = base_store();
    seed_standard_rules(&store);
    seed_metrics(&store);
    let next_day = day().succ_opt().unwrap();
    store.upsert_metric(VENTURE, 101, "loads_completed", next_day, 2.0).unwrap();

    let config = EngineConfig::default_test();
    let writer = IncentiveWriter::new(&store, &config);
    writer.commit(PLAN, day()).unwrap();
    writer.commit(PLAN, next_day).unwrap();

    let series = store.user_timeseries(101, VENTURE, day(), next_day).unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0], (day(), 15_500));
    assert_eq!(series[1], (next_day, 10_000));

    let venture_series = store.venture_timeseries(VENTURE, day(), next_day).unwrap();
    assert_eq!(venture_series.len(), 2);
    assert_eq!(venture_series[0].user_count, 3);
    assert_eq!(venture_series[0].total_cents, 15_500 + 112_400 + 0);
}
