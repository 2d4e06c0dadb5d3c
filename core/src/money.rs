//! Integer-cents money helpers.
//!
//! RULE: rounding from a metric computation to money happens exactly
//! once, at the rule level. Totals are integer sums of already-rounded
//! cents, so a breakdown always adds up to its total with no drift.

use crate::types::Cents;

/// Round a dollar amount to whole cents, half away from zero.
pub fn round_to_cents(dollars: f64) -> Cents {
    (dollars * 100.0).round() as Cents
}

/// Format cents as a dollar string for logs and run summaries.
pub fn fmt_dollars(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}
