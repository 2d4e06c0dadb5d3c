use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::{date_from_sql, date_to_sql, IncentiveStore};
use crate::{
    daily::Breakdown,
    error::{EngineError, EngineResult},
    types::{Cents, UserId, VentureId},
};

/// A freshly computed row, ready for the replacement batch.
#[derive(Debug, Clone)]
pub struct NewIncentiveRow {
    pub user_id: UserId,
    pub amount_cents: Cents,
    pub currency: String,
    pub breakdown_json: String,
}

/// A stored daily incentive as read back for consumers and tests.
/// `breakdown_json` is kept verbatim so byte-identity is observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncentiveDailyRow {
    pub user_id: UserId,
    pub venture_id: VentureId,
    pub date: NaiveDate,
    pub amount_cents: Cents,
    pub currency: String,
    pub breakdown_json: String,
}

impl IncentiveDailyRow {
    pub fn breakdown(&self) -> EngineResult<Breakdown> {
        Ok(serde_json::from_str(&self.breakdown_json)?)
    }
}

/// One day's aggregate for the venture timeseries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VentureDayTotal {
    pub date: NaiveDate,
    pub total_cents: Cents,
    pub user_count: i64,
}

impl IncentiveStore {
    /// Atomically replace the whole (venture, date) batch: delete every
    /// existing row, insert the fresh set, commit. An IMMEDIATE
    /// transaction takes the write lock up front so two commit runs for
    /// the same key serialize instead of interleaving; the unique
    /// constraint on (user_id, venture_id, date) backstops the race.
    ///
    /// Returns (deleted, inserted).
    pub fn replace_day(
        &self,
        venture_id: VentureId,
        date: NaiveDate,
        rows: &[NewIncentiveRow],
    ) -> EngineResult<(usize, usize)> {
        let conflict = |e: rusqlite::Error| match &e {
            rusqlite::Error::SqliteFailure(f, _)
                if matches!(
                    f.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::ConstraintViolation
                ) =>
            {
                EngineError::ConcurrencyConflict { venture_id, date }
            }
            _ => EngineError::Database(e),
        };

        let tx = rusqlite::Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(conflict)?;

        let deleted = tx
            .execute(
                "DELETE FROM incentive_daily WHERE venture_id = ?1 AND date = ?2",
                params![venture_id, date_to_sql(date)],
            )
            .map_err(conflict)?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO incentive_daily
                 (user_id, venture_id, date, amount_cents, currency, breakdown_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.user_id,
                    venture_id,
                    date_to_sql(date),
                    row.amount_cents,
                    row.currency,
                    row.breakdown_json,
                ])
                .map_err(conflict)?;
                inserted += 1;
            }
        }

        tx.commit().map_err(conflict)?;
        Ok((deleted, inserted))
    }

    /// Every stored row for a venture day, in stable user order.
    pub fn day_rows(
        &self,
        venture_id: VentureId,
        date: NaiveDate,
    ) -> EngineResult<Vec<IncentiveDailyRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, venture_id, date, amount_cents, currency, breakdown_json
             FROM incentive_daily
             WHERE venture_id = ?1 AND date = ?2
             ORDER BY user_id ASC",
        )?;
        let rows = stmt
            .query_map(params![venture_id, date_to_sql(date)], map_daily_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn day_row_count(&self, venture_id: VentureId, date: NaiveDate) -> EngineResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM incentive_daily WHERE venture_id = ?1 AND date = ?2",
            params![venture_id, date_to_sql(date)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Audit lookup: one user's exact breakdown for a given day.
    pub fn daily_breakdown(
        &self,
        user_id: UserId,
        venture_id: VentureId,
        date: NaiveDate,
    ) -> EngineResult<Option<IncentiveDailyRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, venture_id, date, amount_cents, currency, breakdown_json
                 FROM incentive_daily
                 WHERE user_id = ?1 AND venture_id = ?2 AND date = ?3",
                params![user_id, venture_id, date_to_sql(date)],
                map_daily_row,
            )
            .optional()?;
        Ok(row)
    }

    /// One user's per-day amounts over an inclusive range.
    pub fn user_timeseries(
        &self,
        user_id: UserId,
        venture_id: VentureId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<(NaiveDate, Cents)>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, amount_cents FROM incentive_daily
             WHERE user_id = ?1 AND venture_id = ?2 AND date >= ?3 AND date <= ?4
             ORDER BY date ASC",
        )?;
        let rows = stmt
            .query_map(
                params![user_id, venture_id, date_to_sql(from), date_to_sql(to)],
                |row| {
                    Ok((
                        date_from_sql(&row.get::<_, String>(0)?)?,
                        row.get::<_, Cents>(1)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per-day venture totals over an inclusive range.
    pub fn venture_timeseries(
        &self,
        venture_id: VentureId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<VentureDayTotal>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, COALESCE(SUM(amount_cents), 0), COUNT(*)
             FROM incentive_daily
             WHERE venture_id = ?1 AND date >= ?2 AND date <= ?3
             GROUP BY date
             ORDER BY date ASC",
        )?;
        let rows = stmt
            .query_map(
                params![venture_id, date_to_sql(from), date_to_sql(to)],
                |row| {
                    Ok(VentureDayTotal {
                        date: date_from_sql(&row.get::<_, String>(0)?)?,
                        total_cents: row.get(1)?,
                        user_count: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_daily_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IncentiveDailyRow> {
    Ok(IncentiveDailyRow {
        user_id: row.get(0)?,
        venture_id: row.get(1)?,
        date: date_from_sql(&row.get::<_, String>(2)?)?,
        amount_cents: row.get(3)?,
        currency: row.get(4)?,
        breakdown_json: row.get(5)?,
    })
}
