//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database. The writer, the
//! simulation engine, and callers go through store methods — they never
//! execute SQL directly.

mod incentive;
mod metric;
mod plan;

pub use incentive::{IncentiveDailyRow, NewIncentiveRow, VentureDayTotal};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    error::EngineResult,
    types::{PlanId, UserId, VentureId},
    writer::RunState,
};

pub struct IncentiveStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl IncentiveStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        // A losing concurrent commit waits for the winner instead of
        // failing immediately on the write lock.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases this returns a new isolated database.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_incentive_plans.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_metric_daily.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_incentive_daily.sql"))?;
        Ok(())
    }

    // ── Ventures, users, roster ────────────────────────────────

    pub fn insert_venture(&self, id: VentureId, name: &str, kind: &str) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO venture (id, name, kind) VALUES (?1, ?2, ?3)",
            params![id, name, kind],
        )?;
        Ok(())
    }

    pub fn insert_user(&self, id: UserId, full_name: &str) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO app_user (id, full_name) VALUES (?1, ?2)",
            params![id, full_name],
        )?;
        Ok(())
    }

    pub fn insert_membership(
        &self,
        user_id: UserId,
        venture_id: VentureId,
        role_key: &str,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO venture_user (user_id, venture_id, role_key) VALUES (?1, ?2, ?3)",
            params![user_id, venture_id, role_key],
        )?;
        Ok(())
    }

    /// Every member of a venture with their role, in stable user order.
    pub fn roster(&self, venture_id: VentureId) -> EngineResult<Vec<(UserId, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, role_key FROM venture_user
             WHERE venture_id = ?1
             ORDER BY user_id ASC",
        )?;
        let rows = stmt
            .query_map(params![venture_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Calculation runs ───────────────────────────────────────

    pub fn insert_calc_run(
        &self,
        run_id: &str,
        plan_id: PlanId,
        venture_id: VentureId,
        date: NaiveDate,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO calc_run (run_id, plan_id, venture_id, date, state, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                plan_id,
                venture_id,
                date_to_sql(date),
                RunState::Pending.as_str(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn mark_calc_run(&self, run_id: &str, state: RunState) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE calc_run SET state = ?2 WHERE run_id = ?1",
            params![run_id, state.as_str()],
        )?;
        Ok(())
    }

    pub fn finish_calc_run(
        &self,
        run_id: &str,
        state: RunState,
        inserted: usize,
        deleted: usize,
    ) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE calc_run
             SET state = ?2, inserted = ?3, deleted = ?4, finished_at = ?5
             WHERE run_id = ?1",
            params![
                run_id,
                state.as_str(),
                inserted as i64,
                deleted as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn calc_run_state(&self, run_id: &str) -> EngineResult<Option<String>> {
        let state = self
            .conn
            .query_row(
                "SELECT state FROM calc_run WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state)
    }
}

pub(crate) fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn date_from_sql(text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}
