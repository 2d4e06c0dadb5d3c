//! Engine configuration — run caps and worker bounds.
//!
//! Everything here is passed explicitly through the call chain; there is
//! no process-wide mutable state, so commit and simulation runs stay
//! independently testable and safely concurrent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on users processed by one commit run. Exceeding it aborts
    /// before anything is written — all-or-nothing, never a partial batch.
    #[serde(default = "default_max_users")]
    pub max_users_per_run: usize,

    /// Worker threads for metric prefetch. Bounded; never one-per-user.
    #[serde(default = "default_metric_workers")]
    pub metric_workers: usize,

    /// Inclusive cap on a simulated date range, in days.
    #[serde(default = "default_simulation_max_days")]
    pub simulation_max_days: i64,

    #[serde(default = "default_currency")]
    pub default_currency: String,
}

fn default_max_users() -> usize {
    5_000
}

fn default_metric_workers() -> usize {
    4
}

fn default_simulation_max_days() -> i64 {
    90
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_users_per_run: default_max_users(),
            metric_workers: default_metric_workers(),
            simulation_max_days: default_simulation_max_days(),
            default_currency: default_currency(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Config with small caps for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            max_users_per_run: 100,
            metric_workers: 2,
            simulation_max_days: 31,
            default_currency: "USD".to_string(),
        }
    }
}
