use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A single normalized listing from any source, read-only to the engine.
///
/// Every comparison field is optional: sources omit fields freely and a
/// missing field makes the corresponding signal unavailable rather than
/// failing the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSnapshot {
    pub listing_id: String,
    pub source: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    pub year: Option<i32>,
    pub price_cents: Option<i64>,
    pub mileage_km: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub postal_code: Option<String>,
    /// Pre-computed perceptual hash of the primary listing image.
    pub image_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Canonical pair
// ---------------------------------------------------------------------------

/// Unordered pair of listing ids, canonicalized so each pair has exactly one
/// representation: `low` is the lexicographically smaller id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub low: String,
    pub high: String,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self { low: a.to_string(), high: b.to_string() }
        } else {
            Self { low: b.to_string(), high: a.to_string() }
        }
    }

    /// The id on the other side of the pair from `id`.
    pub fn other(&self, id: &str) -> &str {
        if self.low == id { &self.high } else { &self.low }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.low, self.high)
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// One available signal's contribution to a composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalScore {
    pub name: String,
    /// Normalized similarity in [0, 1].
    pub similarity: f64,
    /// Configured weight, as given (renormalization happens at aggregation).
    pub weight: f64,
}

/// The explainable result of scoring one pair: composite plus the per-signal
/// breakdown it was computed from. Signals are in registry order, so the same
/// inputs always produce an identical breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub composite: f64,
    pub signals: Vec<SignalScore>,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
    Exact,
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VeryLow => write!(f, "very_low"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::VeryHigh => write!(f, "very_high"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    AutoConfirmed,
    PendingReview,
    Rejected,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoConfirmed => write!(f, "auto_confirmed"),
            Self::PendingReview => write!(f, "pending_review"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// One scored pair. At most one active match exists per canonical pair;
/// re-scoring updates the record in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub pair: PairKey,
    pub score: f64,
    pub band: ConfidenceBand,
    pub signals: Vec<SignalScore>,
    pub status: MatchStatus,
    /// Config version that produced `score`, for reproducibility.
    pub config_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    ConfirmedDuplicate,
    ConfirmedNotDuplicate,
    Skipped,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::ConfirmedDuplicate => write!(f, "confirmed_duplicate"),
            Self::ConfirmedNotDuplicate => write!(f, "confirmed_not_duplicate"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// A match awaiting (or past) human adjudication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: String,
    pub pair: PairKey,
    pub score: f64,
    /// Queue priority; higher surfaces first. Derived from score.
    pub priority: f64,
    pub status: ReviewStatus,
    pub config_version: u64,
    pub reviewer: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReviewItem {
    /// A resolved item is immutable; only a materially different re-score may
    /// create a fresh one for the same pair.
    pub fn is_terminal(&self) -> bool {
        self.status != ReviewStatus::Pending
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Immutable record of a state transition. Entries are append-only and carry
/// a hash chaining the previous entry, so the log is tamper-evident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub detail: String,
    pub at: DateTime<Utc>,
    /// SHA-256 over the previous entry's hash plus this entry's fields.
    pub hash: String,
}

impl AuditEntry {
    pub fn chained(
        prev_hash: Option<&str>,
        actor: &str,
        action: &str,
        detail: &str,
        at: DateTime<Utc>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(prev_hash.unwrap_or(""));
        hasher.update(actor);
        hasher.update(action);
        hasher.update(detail);
        hasher.update(at.to_rfc3339());
        let hash = format!("{:x}", hasher.finalize());
        Self {
            actor: actor.to_string(),
            action: action.to_string(),
            detail: detail.to_string(),
            at,
            hash,
        }
    }

    /// Recompute this entry's hash against `prev_hash` and compare.
    pub fn verify(&self, prev_hash: Option<&str>) -> bool {
        let recomputed = Self::chained(prev_hash, &self.actor, &self.action, &self.detail, self.at);
        recomputed.hash == self.hash
    }
}

/// Walk an ordered slice of entries and verify the whole chain.
pub fn verify_audit_chain(entries: &[AuditEntry]) -> bool {
    let mut prev: Option<&str> = None;
    for entry in entries {
        if !entry.verify(prev) {
            return false;
        }
        prev = Some(&entry.hash);
    }
    true
}

// ---------------------------------------------------------------------------
// Events + detection output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DedupEvent {
    DuplicateFound {
        pair: PairKey,
        score: f64,
        band: ConfidenceBand,
    },
    ReviewRequired {
        review_id: String,
        pair: PairKey,
        score: f64,
        priority: f64,
    },
    DetectionCompleted {
        listing_id: String,
        duplicates_found: usize,
        reviews_created: usize,
        elapsed_ms: u64,
    },
}

/// What one `detect` call did. Mirrors the completion event's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub listing_id: String,
    pub candidates_scored: usize,
    /// Matches auto-confirmed in this run.
    pub duplicates_found: usize,
    pub reviews_created: usize,
    /// Match rows created or materially updated.
    pub matches_updated: usize,
    pub elapsed_ms: u64,
}

/// Aggregated accuracy for one config version, recomputed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracySnapshot {
    pub config_version: u64,
    pub true_positives: usize,
    pub false_positives: usize,
    /// Externally reported missed duplicates only.
    pub false_negatives: usize,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
}

/// Per-band counts for a whole store, for operator summaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSummary {
    pub total: usize,
    pub auto_confirmed: usize,
    pub pending_review: usize,
    pub rejected: usize,
    pub band_counts: HashMap<String, usize>,
}

pub fn summarize_matches(matches: &[DuplicateMatch]) -> MatchSummary {
    let mut summary = MatchSummary::default();
    summary.total = matches.len();
    for m in matches {
        *summary.band_counts.entry(m.band.to_string()).or_insert(0) += 1;
        match m.status {
            MatchStatus::AutoConfirmed => summary.auto_confirmed += 1,
            MatchStatus::PendingReview => summary.pending_review += 1,
            MatchStatus::Rejected => summary.rejected += 1,
        }
    }
    summary
}
