//! The metric-lookup seam between the engine and the operational data
//! sources that produce loads booked, calls handled, revenue and friends.
//!
//! RULES:
//!   - The engine never re-queries a (user, metric) pair within one run:
//!     lookups go through a memoizing `MetricCache`, usually backed by a
//!     bulk-loaded `MetricSnapshot`.
//!   - A source answers `Ok(Some(v))` with `v >= 0`, `Ok(None)` when it
//!     cannot say (no false zeros), and `Err` only for infrastructure
//!     failure — which aborts the whole run rather than silently
//!     under-paying a venture.

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::NaiveDate;

use crate::{
    error::{EngineError, EngineResult},
    types::{UserId, VentureId},
};

/// One metric lookup: a user's single-day activity value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricQuery {
    pub venture_id: VentureId,
    pub user_id: UserId,
    pub role_key: String,
    pub metric_key: String,
    pub date: NaiveDate,
}

/// The consumed interface. Implementations are injected; the engine never
/// knows where the numbers come from.
pub trait MetricSource {
    /// The day's value (zero when inactive), `None` when the metric is
    /// unavailable for this user/key, `Err` on infrastructure failure.
    fn metric(&self, q: &MetricQuery) -> EngineResult<Option<f64>>;
}

/// All of one venture's metric values for a single day, loaded in one
/// query up front so per-rule evaluation never touches the source again.
///
/// A missing entry reads as zero activity — the landing table only gets
/// rows when something happened.
#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    venture_id: VentureId,
    date: NaiveDate,
    values: HashMap<(UserId, String), f64>,
}

impl MetricSnapshot {
    pub fn new(venture_id: VentureId, date: NaiveDate) -> Self {
        Self {
            venture_id,
            date,
            values: HashMap::new(),
        }
    }

    pub fn insert(&mut self, user_id: UserId, metric_key: &str, value: f64) {
        self.values.insert((user_id, metric_key.to_string()), value);
    }

    /// Users with at least one metric row this day.
    pub fn user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        let mut seen: Vec<UserId> = self.values.keys().map(|(u, _)| *u).collect();
        seen.sort_unstable();
        seen.dedup();
        seen.into_iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl MetricSource for MetricSnapshot {
    fn metric(&self, q: &MetricQuery) -> EngineResult<Option<f64>> {
        if q.venture_id != self.venture_id || q.date != self.date {
            return Ok(None);
        }
        let value = self
            .values
            .get(&(q.user_id, q.metric_key.clone()))
            .copied()
            .unwrap_or(0.0);
        Ok(Some(value))
    }
}

/// Memoizes lookups per (user, metric key) so a source is asked at most
/// once per pair within a run, however many rules consume the pair. Also
/// the chokepoint that rejects contract-violating negative values.
pub struct MetricCache<'a> {
    source: &'a dyn MetricSource,
    seen: RefCell<HashMap<(UserId, String), Option<f64>>>,
}

impl<'a> MetricCache<'a> {
    pub fn new(source: &'a dyn MetricSource) -> Self {
        Self {
            source,
            seen: RefCell::new(HashMap::new()),
        }
    }

    /// Distinct pairs resolved so far. Used by tests to prove de-duping.
    pub fn distinct_lookups(&self) -> usize {
        self.seen.borrow().len()
    }
}

impl MetricSource for MetricCache<'_> {
    fn metric(&self, q: &MetricQuery) -> EngineResult<Option<f64>> {
        let key = (q.user_id, q.metric_key.clone());
        if let Some(cached) = self.seen.borrow().get(&key) {
            return Ok(*cached);
        }
        let value = self.source.metric(q)?;
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::MetricSource {
                    detail: format!(
                        "metric '{}' returned invalid value {v} for user {} on {}",
                        q.metric_key, q.user_id, q.date
                    ),
                });
            }
        }
        self.seen.borrow_mut().insert(key, value);
        Ok(value)
    }
}

/// A fixed set of pre-resolved lookups, as produced by
/// `prefetch_bounded`. Unavailable metrics stay `None`; a pair that was
/// never prefetched also reads as unavailable rather than a false zero.
#[derive(Debug, Clone, Default)]
pub struct PrefetchedMetrics {
    values: HashMap<(UserId, String), Option<f64>>,
}

impl PrefetchedMetrics {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl MetricSource for PrefetchedMetrics {
    fn metric(&self, q: &MetricQuery) -> EngineResult<Option<f64>> {
        Ok(self
            .values
            .get(&(q.user_id, q.metric_key.clone()))
            .copied()
            .flatten())
    }
}

/// Resolve a batch of queries against a thread-safe source with a bounded
/// worker pool. The pool never exceeds `workers` threads regardless of
/// batch size; any source error fails the whole batch.
pub fn prefetch_bounded<S: MetricSource + Sync>(
    source: &S,
    queries: Vec<MetricQuery>,
    workers: usize,
) -> EngineResult<PrefetchedMetrics> {
    let workers = workers.clamp(1, 64);
    let (work_tx, work_rx) = crossbeam_channel::unbounded::<MetricQuery>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded();

    for q in queries {
        // Receiver outlives this loop; send cannot fail here.
        let _ = work_tx.send(q);
    }
    drop(work_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for q in work_rx.iter() {
                    let resolved = source.metric(&q);
                    if result_tx.send((q, resolved)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut out = PrefetchedMetrics::default();
    for (q, resolved) in result_rx.iter() {
        out.values.insert((q.user_id, q.metric_key), resolved?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        hits: AtomicUsize,
    }

    impl MetricSource for CountingSource {
        fn metric(&self, q: &MetricQuery) -> EngineResult<Option<f64>> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(Some(q.user_id as f64))
        }
    }

    fn query(user_id: UserId, metric_key: &str) -> MetricQuery {
        MetricQuery {
            venture_id: 1,
            user_id,
            role_key: "dispatcher".into(),
            metric_key: metric_key.into(),
            date: NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
        }
    }

    #[test]
    fn cache_asks_the_source_once_per_pair() {
        let source = CountingSource {
            hits: AtomicUsize::new(0),
        };
        let cache = MetricCache::new(&source);

        for _ in 0..5 {
            cache.metric(&query(101, "loads_completed")).unwrap();
        }
        cache.metric(&query(101, "loads_revenue")).unwrap();
        cache.metric(&query(102, "loads_completed")).unwrap();

        assert_eq!(source.hits.load(Ordering::SeqCst), 3);
        assert_eq!(cache.distinct_lookups(), 3);
    }

    #[test]
    fn cache_rejects_negative_values() {
        struct Negative;
        impl MetricSource for Negative {
            fn metric(&self, _q: &MetricQuery) -> EngineResult<Option<f64>> {
                Ok(Some(-4.0))
            }
        }
        let cache = MetricCache::new(&Negative);
        assert!(matches!(
            cache.metric(&query(101, "loads_completed")),
            Err(EngineError::MetricSource { .. })
        ));
    }

    #[test]
    fn snapshot_reads_missing_entries_as_zero_activity() {
        let mut snap = MetricSnapshot::new(1, NaiveDate::from_ymd_opt(2025, 7, 15).unwrap());
        snap.insert(101, "loads_completed", 3.0);

        assert_eq!(snap.metric(&query(101, "loads_completed")).unwrap(), Some(3.0));
        assert_eq!(snap.metric(&query(101, "loads_revenue")).unwrap(), Some(0.0));
        // A different day is not this snapshot's to answer.
        let other_day = MetricQuery {
            date: NaiveDate::from_ymd_opt(2025, 7, 16).unwrap(),
            ..query(101, "loads_completed")
        };
        assert_eq!(snap.metric(&other_day).unwrap(), None);
    }

    #[test]
    fn prefetch_resolves_every_query_with_bounded_workers() {
        let source = CountingSource {
            hits: AtomicUsize::new(0),
        };
        let queries: Vec<_> = (1..=40).map(|u| query(u, "loads_completed")).collect();

        let resolved = prefetch_bounded(&source, queries, 3).unwrap();

        assert_eq!(resolved.len(), 40);
        assert_eq!(source.hits.load(Ordering::SeqCst), 40);
        assert_eq!(
            resolved.metric(&query(7, "loads_completed")).unwrap(),
            Some(7.0)
        );
        // A pair that was never prefetched reads as unavailable.
        assert_eq!(resolved.metric(&query(7, "loads_revenue")).unwrap(), None);
    }
}
