//! Late-return penalty arithmetic

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// Fee owed for returning at `return_at` a loan due at `due_at`.
///
/// Each started day past the due instant costs `per_day_rate`; an on-time or
/// early return costs nothing.
pub fn compute_penalty(due_at: DateTime<Utc>, return_at: DateTime<Utc>, per_day_rate: Decimal) -> Decimal {
    if return_at <= due_at {
        return Decimal::ZERO;
    }
    Decimal::from(days_late(due_at, return_at)) * per_day_rate
}

/// Whole days late, a partial day counting as one
pub fn days_late(due_at: DateTime<Utc>, return_at: DateTime<Utc>) -> i64 {
    let late = return_at - due_at;
    if late <= Duration::zero() {
        return 0;
    }
    let whole = late.num_days();
    if late > Duration::days(whole) {
        whole + 1
    } else {
        whole
    }
}
