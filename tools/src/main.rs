//! incentive-runner: headless driver for the incentive engine.
//!
//! The scheduled daily job and the on-demand admin action both funnel
//! into the same commit entrypoint; this binary is the reference caller
//! for both, plus a what-if simulation front end.
//!
//! Usage:
//!   incentive-runner --db run.db --seed-demo 42
//!   incentive-runner --db run.db --commit --plan 10 --date 2025-07-15
//!   incentive-runner --db run.db --simulate compare --plan 10 \
//!       --date 2025-07-15 --days 7

use anyhow::Result;
use chrono::NaiveDate;
use incentive_core::{
    config::EngineConfig,
    money::fmt_dollars,
    plan::{Plan, RuleDraft},
    simulate::{SimulationEngine, SimulationMode, SimulationRequest},
    store::IncentiveStore,
    writer::IncentiveWriter,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::env;

const DEMO_VENTURE: i64 = 1;
const DEMO_PLAN: i64 = 10;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = str_arg(&args, "--db").unwrap_or_else(|| ":memory:".to_string());
    let config = match str_arg(&args, "--config") {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };

    let store = IncentiveStore::open(&db)?;
    store.migrate()?;
    log::info!("database ready at {db}");

    if let Some(seed) = parse_arg::<u64>(&args, "--seed-demo") {
        seed_demo_data(&store, seed)?;
        println!("Seeded demo venture {DEMO_VENTURE} (plan {DEMO_PLAN}) with seed {seed}");
    }

    let plan_id = parse_arg::<i64>(&args, "--plan").unwrap_or(DEMO_PLAN);
    let date = str_arg(&args, "--date")
        .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
        .transpose()?
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(2025, 7, 15).unwrap());
    let days = parse_arg::<u64>(&args, "--days").unwrap_or(1);

    if args.iter().any(|a| a == "--commit") {
        run_commits(&store, &config, plan_id, date, days)?;
    }

    if let Some(mode) = str_arg(&args, "--simulate") {
        let custom_rules = match str_arg(&args, "--rules") {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
                Some(serde_json::from_str::<Vec<RuleDraft>>(&content)?)
            }
            None => None,
        };
        run_simulation(&store, &config, &mode, plan_id, date, days, custom_rules)?;
    }

    Ok(())
}

fn run_commits(
    store: &IncentiveStore,
    config: &EngineConfig,
    plan_id: i64,
    from: NaiveDate,
    days: u64,
) -> Result<()> {
    let writer = IncentiveWriter::new(store, config);

    println!("=== COMMIT ===");
    for date in from.iter_days().take(days as usize) {
        let outcome = writer.commit(plan_id, date)?;
        println!(
            "  {date} | run {} | rows: {} inserted, {} replaced | total {}",
            outcome.run_id,
            outcome.inserted,
            outcome.deleted,
            fmt_dollars(outcome.total_cents()),
        );
    }

    let plan = store.fetch_plan(plan_id)?;
    let to = from + chrono::Days::new(days.saturating_sub(1));
    println!();
    println!("=== VENTURE TIMESERIES ===");
    for day in store.venture_timeseries(plan.venture_id, from, to)? {
        println!(
            "  {} | {} users | {}",
            day.date,
            day.user_count,
            fmt_dollars(day.total_cents)
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_simulation(
    store: &IncentiveStore,
    config: &EngineConfig,
    mode: &str,
    plan_id: i64,
    from: NaiveDate,
    days: u64,
    custom_rules: Option<Vec<RuleDraft>>,
) -> Result<()> {
    let mode = match mode {
        "current" => SimulationMode::CurrentPlan,
        "custom" => SimulationMode::CustomRules,
        "compare" => SimulationMode::Compare,
        other => anyhow::bail!("unknown simulation mode '{other}' (current|custom|compare)"),
    };

    let request = SimulationRequest {
        plan_id,
        from,
        to: from + chrono::Days::new(days.saturating_sub(1)),
        user_ids: vec![],
        label: Some("Boosted flat rates".into()),
    };

    // Default custom scenario when no --rules file was given: raise the
    // flat dispatch rate to $60.
    let custom = custom_rules.unwrap_or_else(|| {
        vec![RuleDraft {
            role_key: Some("dispatcher".into()),
            metric_key: "loads_completed".into(),
            calc_type: "FLAT_PER_UNIT".into(),
            rate: Some(60.0),
            threshold_value: None,
            bonus_amount: None,
            currency: None,
        }]
    });
    let custom = match mode {
        SimulationMode::CurrentPlan => None,
        _ => Some(custom),
    };

    let outcome = SimulationEngine::new(store, config).simulate(mode, &request, custom)?;

    println!("=== SIMULATION ===");
    if let Some(result) = &outcome.baseline {
        println!(
            "  baseline '{}': {} users x {} days = {}",
            result.plan_label,
            result.summary.total_users,
            result.summary.total_days,
            fmt_dollars(result.summary.total_amount_cents),
        );
    }
    if let Some(result) = &outcome.simulated {
        println!(
            "  simulated '{}': {} users x {} days = {}",
            result.plan_label,
            result.summary.total_users,
            result.summary.total_days,
            fmt_dollars(result.summary.total_amount_cents),
        );
    }
    if let Some(diff) = &outcome.diff {
        println!(
            "  delta: {} ({:+.1}%)",
            fmt_dollars(diff.summary.total_delta_cents),
            diff.summary.total_delta_pct,
        );
        for role in &diff.per_role {
            println!("    {} {}", role.role_key, fmt_dollars(role.delta_cents));
        }
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Deterministic demo fixture: one freight venture, a dispatcher-heavy
/// roster, a three-rule plan, and a week of metrics.
fn seed_demo_data(store: &IncentiveStore, seed: u64) -> Result<()> {
    let mut rng = Pcg64::seed_from_u64(seed);

    store.insert_venture(DEMO_VENTURE, "Atlas Freight", "freight")?;

    let roles = ["dispatcher", "dispatcher", "dispatcher", "csr", "csr", "agent"];
    for (i, role) in roles.iter().enumerate() {
        let user_id = 101 + i as i64;
        store.insert_user(user_id, &format!("Demo User {user_id}"))?;
        store.insert_membership(user_id, DEMO_VENTURE, role)?;
    }

    store.insert_plan(&Plan {
        id: DEMO_PLAN,
        venture_id: DEMO_VENTURE,
        name: "Dispatch incentives Q3".into(),
        currency: "USD".into(),
        effective_from: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        effective_to: Some(NaiveDate::from_ymd_opt(2025, 9, 30).unwrap()),
        is_active: true,
    })?;

    store.insert_rule(
        DEMO_PLAN,
        Some("dispatcher"),
        "loads_completed",
        "FLAT_PER_UNIT",
        Some(50.0),
        None,
        None,
        None,
        true,
    )?;
    store.insert_rule(
        DEMO_PLAN,
        Some("dispatcher"),
        "loads_revenue",
        "PERCENT_OF_METRIC",
        Some(0.005),
        None,
        None,
        None,
        true,
    )?;
    store.insert_rule(
        DEMO_PLAN,
        Some("dispatcher"),
        "loads_completed",
        "BONUS_ON_TARGET",
        None,
        Some(10.0),
        Some(500.0),
        None,
        true,
    )?;
    store.insert_rule(
        DEMO_PLAN,
        Some("agent"),
        "bpo_connects",
        "FLAT_PER_UNIT",
        Some(2.5),
        None,
        None,
        None,
        true,
    )?;

    let start = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
    for date in start.iter_days().take(7) {
        for (i, role) in roles.iter().enumerate() {
            let user_id = 101 + i as i64;
            match *role {
                "dispatcher" => {
                    let loads = rng.gen_range(0..=14) as f64;
                    let revenue = loads * rng.gen_range(350.0..2200.0);
                    store.upsert_metric(DEMO_VENTURE, user_id, "loads_completed", date, loads)?;
                    store.upsert_metric(DEMO_VENTURE, user_id, "loads_revenue", date, revenue)?;
                }
                "agent" => {
                    let connects = rng.gen_range(0..=40) as f64;
                    store.upsert_metric(DEMO_VENTURE, user_id, "bpo_connects", date, connects)?;
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
}

fn str_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}
