//! Shared primitive types used across the engine.

/// A platform user id.
pub type UserId = i64;

/// A venture (business line) id.
pub type VentureId = i64;

/// An incentive plan id.
pub type PlanId = i64;

/// An incentive rule id. Custom simulation rules get local ids starting
/// at 1 that exist only for the duration of the call.
pub type RuleId = i64;

/// A monetary amount in integer cents.
pub type Cents = i64;
