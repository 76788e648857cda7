//! In-memory backend: RwLock-guarded maps, suitable for tests and one-shot
//! CLI runs where nothing needs to survive the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use lotmatch_engine::{
    AuditEntry, DedupConfig, DedupError, DedupEvent, DuplicateMatch, ListingSnapshot, PairKey,
    ReviewItem,
};

use crate::{
    AuditLog, ConfigStore, EventSink, ListingSource, MatchStore, ReviewStore, StoreResult,
};

#[derive(Default)]
pub struct MemoryStore {
    listings: RwLock<BTreeMap<String, ListingSnapshot>>,
    matches: RwLock<BTreeMap<PairKey, DuplicateMatch>>,
    reviews: RwLock<HashMap<String, ReviewItem>>,
    audit: RwLock<Vec<AuditEntry>>,
    configs: RwLock<Vec<DedupConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with listings and one published config version.
    pub fn seeded(listings: Vec<ListingSnapshot>, config: DedupConfig) -> StoreResult<Self> {
        let store = Self::new();
        for listing in listings {
            store.put_listing(listing);
        }
        store.publish(config)?;
        Ok(store)
    }

    pub fn put_listing(&self, listing: ListingSnapshot) {
        self.listings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(listing.listing_id.clone(), listing);
    }
}

impl ListingSource for MemoryStore {
    fn get(&self, listing_id: &str) -> StoreResult<Option<ListingSnapshot>> {
        Ok(self
            .listings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(listing_id)
            .cloned())
    }

    fn all(&self) -> StoreResult<Vec<ListingSnapshot>> {
        Ok(self
            .listings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }
}

impl MatchStore for MemoryStore {
    fn get(&self, pair: &PairKey) -> StoreResult<Option<DuplicateMatch>> {
        Ok(self
            .matches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(pair)
            .cloned())
    }

    fn upsert(&self, m: &DuplicateMatch) -> StoreResult<()> {
        self.matches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(m.pair.clone(), m.clone());
        Ok(())
    }

    fn all(&self) -> StoreResult<Vec<DuplicateMatch>> {
        Ok(self
            .matches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }

    fn for_version(&self, config_version: u64) -> StoreResult<Vec<DuplicateMatch>> {
        Ok(self
            .matches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|m| m.config_version == config_version)
            .cloned()
            .collect())
    }
}

impl ReviewStore for MemoryStore {
    fn create(&self, item: &ReviewItem) -> StoreResult<()> {
        let mut reviews = self.reviews.write().unwrap_or_else(|e| e.into_inner());
        if reviews.contains_key(&item.id) {
            return Err(DedupError::Conflict(format!(
                "review item '{}' already exists",
                item.id
            )));
        }
        reviews.insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<ReviewItem>> {
        Ok(self
            .reviews
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    fn update(&self, item: &ReviewItem) -> StoreResult<()> {
        let mut reviews = self.reviews.write().unwrap_or_else(|e| e.into_inner());
        if !reviews.contains_key(&item.id) {
            return Err(DedupError::NotFound(format!("review item '{}'", item.id)));
        }
        reviews.insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn pending(&self) -> StoreResult<Vec<ReviewItem>> {
        Ok(self
            .reviews
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|i| !i.is_terminal())
            .cloned()
            .collect())
    }

    fn for_pair(&self, pair: &PairKey) -> StoreResult<Vec<ReviewItem>> {
        Ok(self
            .reviews
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|i| &i.pair == pair)
            .cloned()
            .collect())
    }

    fn resolved(&self) -> StoreResult<Vec<ReviewItem>> {
        Ok(self
            .reviews
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|i| i.is_terminal())
            .cloned()
            .collect())
    }
}

impl AuditLog for MemoryStore {
    fn append(&self, actor: &str, action: &str, detail: &str) -> StoreResult<AuditEntry> {
        let mut audit = self.audit.write().unwrap_or_else(|e| e.into_inner());
        let prev = audit.last().map(|e| e.hash.clone());
        let entry = AuditEntry::chained(prev.as_deref(), actor, action, detail, Utc::now());
        audit.push(entry.clone());
        Ok(entry)
    }

    fn entries(&self) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.audit.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

impl ConfigStore for MemoryStore {
    fn active(&self) -> StoreResult<DedupConfig> {
        self.configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
            .ok_or_else(|| DedupError::NotFound("no published config".into()))
    }

    fn publish(&self, mut config: DedupConfig) -> StoreResult<u64> {
        config.validate()?;
        let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
        let version = configs.len() as u64 + 1;
        config.version = version;
        configs.push(config);
        Ok(version)
    }

    fn version(&self, version: u64) -> StoreResult<Option<DedupConfig>> {
        Ok(self
            .configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|c| c.version == version)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Event sinks
// ---------------------------------------------------------------------------

/// Records every event; tests assert on the captured sequence.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<DedupEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DedupEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: DedupEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Discards events.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: DedupEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotmatch_engine::model::verify_audit_chain;
    use lotmatch_engine::{ConfidenceBand, MatchStatus, ReviewStatus};

    fn a_match(pair: PairKey, score: f64) -> DuplicateMatch {
        let now = Utc::now();
        DuplicateMatch {
            pair,
            score,
            band: ConfidenceBand::High,
            signals: vec![],
            status: MatchStatus::PendingReview,
            config_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn match_upsert_replaces_existing_pair() {
        let store = MemoryStore::new();
        let pair = PairKey::new("a", "b");
        MatchStore::upsert(&store, &a_match(pair.clone(), 0.7)).unwrap();
        MatchStore::upsert(&store, &a_match(pair.clone(), 0.8)).unwrap();

        let all = MatchStore::all(&store).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].score, 0.8);
        assert_eq!(MatchStore::get(&store, &pair).unwrap().unwrap().score, 0.8);
    }

    #[test]
    fn review_create_twice_conflicts() {
        let store = MemoryStore::new();
        let item = ReviewItem {
            id: "rev_1".into(),
            pair: PairKey::new("a", "b"),
            score: 0.7,
            priority: 0.7,
            status: ReviewStatus::Pending,
            config_version: 1,
            reviewer: None,
            notes: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        ReviewStore::create(&store, &item).unwrap();
        let err = ReviewStore::create(&store, &item).unwrap_err();
        assert!(matches!(err, DedupError::Conflict(_)));
    }

    #[test]
    fn audit_chain_links_entries() {
        let store = MemoryStore::new();
        AuditLog::append(&store, "system", "config_published", "v1").unwrap();
        AuditLog::append(&store, "alice", "review_resolved", "rev_1").unwrap();
        let entries = AuditLog::entries(&store).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(verify_audit_chain(&entries));
    }

    #[test]
    fn config_versions_increment_and_stay_readable() {
        let store = MemoryStore::new();
        assert!(ConfigStore::active(&store).is_err());

        let v1 = ConfigStore::publish(&store, DedupConfig::default()).unwrap();
        let mut updated = DedupConfig::default();
        updated.auto_confirm = 0.95;
        let v2 = ConfigStore::publish(&store, updated).unwrap();

        assert_eq!((v1, v2), (1, 2));
        assert_eq!(ConfigStore::active(&store).unwrap().version, 2);
        assert_eq!(
            ConfigStore::version(&store, 1).unwrap().unwrap().auto_confirm,
            0.9
        );
    }

    #[test]
    fn publish_rejects_invalid_config() {
        let store = MemoryStore::new();
        let mut bad = DedupConfig::default();
        bad.max_candidates = 0;
        assert!(ConfigStore::publish(&store, bad).is_err());
        assert!(ConfigStore::active(&store).is_err(), "nothing persisted");
    }
}
