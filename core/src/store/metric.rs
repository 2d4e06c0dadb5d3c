use chrono::NaiveDate;
use rusqlite::params;

use super::{date_to_sql, IncentiveStore};
use crate::{
    error::EngineResult,
    metrics::MetricSnapshot,
    types::{UserId, VentureId},
};

impl IncentiveStore {
    /// Record (or replace) one user's metric value for a day.
    pub fn upsert_metric(
        &self,
        venture_id: VentureId,
        user_id: UserId,
        metric_key: &str,
        date: NaiveDate,
        value: f64,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO metric_daily (venture_id, user_id, metric_key, date, value)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (venture_id, user_id, metric_key, date)
             DO UPDATE SET value = excluded.value",
            params![venture_id, user_id, metric_key, date_to_sql(date), value],
        )?;
        Ok(())
    }

    /// Bulk-load every metric value for one venture day in a single
    /// query. Rule evaluation runs against the returned snapshot and
    /// never touches the table again.
    pub fn load_metric_snapshot(
        &self,
        venture_id: VentureId,
        date: NaiveDate,
    ) -> EngineResult<MetricSnapshot> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, metric_key, value FROM metric_daily
             WHERE venture_id = ?1 AND date = ?2",
        )?;
        let rows = stmt
            .query_map(params![venture_id, date_to_sql(date)], |row| {
                Ok((
                    row.get::<_, UserId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut snapshot = MetricSnapshot::new(venture_id, date);
        for (user_id, metric_key, value) in rows {
            snapshot.insert(user_id, &metric_key, value);
        }
        Ok(snapshot)
    }

    /// Distinct users with at least one metric row for the day. Used to
    /// flag metric rows that arrived for non-members.
    pub fn metric_user_ids(
        &self,
        venture_id: VentureId,
        date: NaiveDate,
    ) -> EngineResult<Vec<UserId>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT user_id FROM metric_daily
             WHERE venture_id = ?1 AND date = ?2
             ORDER BY user_id ASC",
        )?;
        let rows = stmt
            .query_map(params![venture_id, date_to_sql(date)], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
