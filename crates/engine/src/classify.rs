//! Confidence classification and review-queue ordering.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;

use crate::config::DedupConfig;
use crate::model::{ConfidenceBand, MatchStatus, ReviewItem};

/// Map a composite score onto the config's six confidence bands.
pub fn band_for(score: f64, config: &DedupConfig) -> ConfidenceBand {
    let b = &config.bands;
    if score >= b[4] {
        ConfidenceBand::Exact
    } else if score >= b[3] {
        ConfidenceBand::VeryHigh
    } else if score >= b[2] {
        ConfidenceBand::High
    } else if score >= b[1] {
        ConfidenceBand::Medium
    } else if score >= b[0] {
        ConfidenceBand::Low
    } else {
        ConfidenceBand::VeryLow
    }
}

/// Classification policy: at or above auto_confirm the pair auto-confirms;
/// in [review_floor, auto_confirm) it goes to human review; below the floor
/// it is recorded as rejected and never enqueued.
pub fn status_for(score: f64, config: &DedupConfig) -> MatchStatus {
    if score >= config.auto_confirm {
        MatchStatus::AutoConfirmed
    } else if score >= config.review_floor {
        MatchStatus::PendingReview
    } else {
        MatchStatus::Rejected
    }
}

/// Queue priority for a pending item. Currently the score itself; kept as a
/// named seam so the derivation can change without touching callers.
pub fn review_priority(score: f64) -> f64 {
    score
}

/// Total order for the pending queue: priority descending, then creation time
/// ascending (older items surface first at equal priority), then canonical
/// pair as the final deterministic tie-break.
pub fn queue_order(a: &ReviewItem, b: &ReviewItem) -> Ordering {
    OrderedFloat(b.priority)
        .cmp(&OrderedFloat(a.priority))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.pair.cmp(&b.pair))
}
