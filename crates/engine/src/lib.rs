//! `lotmatch-engine` — duplicate-listing detection engine.
//!
//! Pure engine crate: receives listing snapshots, produces scores and
//! classifications. No persistence, no locking, no network.

pub mod candidates;
pub mod classify;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod score;
pub mod signals;

pub use candidates::BlockingIndex;
pub use config::{DedupConfig, Tolerances};
pub use error::DedupError;
pub use ingest::load_listings_csv;
pub use model::{
    summarize_matches, verify_audit_chain, AccuracySnapshot, AuditEntry, ConfidenceBand,
    DedupEvent, DetectionResult, DuplicateMatch, ListingSnapshot, MatchStatus, MatchSummary,
    PairKey, ReviewItem, ReviewStatus, ScoreBreakdown, SignalScore,
};
pub use score::score_pair;
pub use signals::SignalRegistry;
