//! Incentive Calculation & Simulation Engine for the multi-venture
//! operations platform (freight, hospitality, BPO, SaaS).
//!
//! Given a venture's configured plan, the engine computes each member's
//! daily incentive pay from operational metrics, persists the day
//! idempotently, and answers what-if simulations without side effects.
//!
//! RULES:
//!   - All money is integer cents; rounding happens once, per rule.
//!   - Only the store talks to the database.
//!   - A commit replaces the whole (venture, date) batch atomically; a
//!     failed or cancelled run leaves no partially-written day.
//!   - Simulation never persists anything, under any input.

pub mod config;
pub mod daily;
pub mod error;
pub mod metrics;
pub mod money;
pub mod plan;
pub mod simulate;
pub mod store;
pub mod types;
pub mod writer;
