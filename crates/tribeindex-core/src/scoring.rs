//! Ranking scores for the trending and hot sort orders.
//!
//! Classic log-rshares-plus-age formulation: the vote magnitude contributes
//! logarithmically and creation time pushes newer posts up linearly, with a
//! decay window that differs between the two orders.

use chrono::{DateTime, Utc};

/// Seconds for one decade of rshares to age out of the trending order.
const TREND_DECAY_SECS: f64 = 480_000.0;
/// Hot reacts much faster.
const HOT_DECAY_SECS: f64 = 10_000.0;

fn vote_magnitude(rshares: i64) -> f64 {
    let abs = (rshares.abs().max(1)) as f64;
    let sign = if rshares < 0 { -1.0 } else { 1.0 };
    sign * abs.log10()
}

pub fn trending_score(rshares: i64, created: DateTime<Utc>) -> f64 {
    vote_magnitude(rshares) + created.timestamp() as f64 / TREND_DECAY_SECS
}

pub fn hot_score(rshares: i64, created: DateTime<Utc>) -> f64 {
    vote_magnitude(rshares) + created.timestamp() as f64 / HOT_DECAY_SECS
}
