//! Shared fixtures: a migrated in-memory store with one freight venture,
//! a small roster, and an active plan.

use chrono::NaiveDate;
use incentive_core::plan::Plan;
use incentive_core::store::IncentiveStore;

pub const VENTURE: i64 = 1;
pub const PLAN: i64 = 10;

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 15).unwrap()
}

pub fn base_store() -> IncentiveStore {
    let store = IncentiveStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");

    store
        .insert_venture(VENTURE, "Atlas Freight", "freight")
        .unwrap();
    for (id, name, role) in [
        (101, "Dana Voss", "dispatcher"),
        (102, "Leo Marsh", "dispatcher"),
        (103, "Rita Okafor", "csr"),
    ] {
        store.insert_user(id, name).unwrap();
        store.insert_membership(id, VENTURE, role).unwrap();
    }

    store
        .insert_plan(&Plan {
            id: PLAN,
            venture_id: VENTURE,
            name: "Dispatch Q3".into(),
            currency: "USD".into(),
            effective_from: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            effective_to: None,
            is_active: true,
        })
        .unwrap();

    store
}

/// The standard three-rule plan used across tests:
/// flat $50 per completed load, 0.5% of revenue, $500 bonus at 10 loads.
pub fn seed_standard_rules(store: &IncentiveStore) -> (i64, i64, i64) {
    let flat = store
        .insert_rule(
            PLAN,
            Some("dispatcher"),
            "loads_completed",
            "FLAT_PER_UNIT",
            Some(50.0),
            None,
            None,
            None,
            true,
        )
        .unwrap();
    let pct = store
        .insert_rule(
            PLAN,
            Some("dispatcher"),
            "loads_revenue",
            "PERCENT_OF_METRIC",
            Some(0.005),
            None,
            None,
            None,
            true,
        )
        .unwrap();
    let bonus = store
        .insert_rule(
            PLAN,
            Some("dispatcher"),
            "loads_completed",
            "BONUS_ON_TARGET",
            None,
            Some(10.0),
            Some(500.0),
            None,
            true,
        )
        .unwrap();
    (flat, pct, bonus)
}
