//! `lotmatch-store` — persistence seams for the duplicate-detection engine.
//!
//! The engine itself is pure; everything stateful goes through the traits
//! here. Two backends ship: an in-memory store for tests and one-shot runs,
//! and a SQLite store for persistent operation.

pub mod memory;
pub mod sqlite;

use lotmatch_engine::{
    AuditEntry, DedupConfig, DedupError, DedupEvent, DuplicateMatch, ListingSnapshot, PairKey,
    ReviewItem,
};

pub use memory::{CollectingSink, MemoryStore, NullSink};
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, DedupError>;

/// Read access to canonical listing snapshots, supplied by the listing
/// service upstream of this engine.
pub trait ListingSource: Send + Sync {
    fn get(&self, listing_id: &str) -> StoreResult<Option<ListingSnapshot>>;
    fn all(&self) -> StoreResult<Vec<ListingSnapshot>>;
}

/// Upsert-by-canonical-pair storage for matches. Implementations must keep
/// at most one row per pair; `upsert` replaces the existing row atomically.
pub trait MatchStore: Send + Sync {
    fn get(&self, pair: &PairKey) -> StoreResult<Option<DuplicateMatch>>;
    fn upsert(&self, m: &DuplicateMatch) -> StoreResult<()>;
    fn all(&self) -> StoreResult<Vec<DuplicateMatch>>;
    fn for_version(&self, config_version: u64) -> StoreResult<Vec<DuplicateMatch>>;
}

pub trait ReviewStore: Send + Sync {
    fn create(&self, item: &ReviewItem) -> StoreResult<()>;
    fn get(&self, id: &str) -> StoreResult<Option<ReviewItem>>;
    fn update(&self, item: &ReviewItem) -> StoreResult<()>;
    /// All unresolved items, unordered; callers sort.
    fn pending(&self) -> StoreResult<Vec<ReviewItem>>;
    fn for_pair(&self, pair: &PairKey) -> StoreResult<Vec<ReviewItem>>;
    fn resolved(&self) -> StoreResult<Vec<ReviewItem>>;
}

/// Append-only audit log. `append` chains the new entry onto the last hash
/// under the store's own lock, so the chain stays consistent under
/// concurrent writers.
pub trait AuditLog: Send + Sync {
    fn append(&self, actor: &str, action: &str, detail: &str) -> StoreResult<AuditEntry>;
    fn entries(&self) -> StoreResult<Vec<AuditEntry>>;
}

/// Versioned config storage. Publishing assigns the next version and makes
/// it active; prior versions stay readable forever.
pub trait ConfigStore: Send + Sync {
    fn active(&self) -> StoreResult<DedupConfig>;
    fn publish(&self, config: DedupConfig) -> StoreResult<u64>;
    fn version(&self, version: u64) -> StoreResult<Option<DedupConfig>>;
}

/// Outbound event sink. Delivery semantics belong to the caller; the engine
/// only requires that emit never blocks indefinitely.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DedupEvent);
}
