//! Detection orchestrator: the only writer of match rows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use lotmatch_engine::classify::{band_for, review_priority, status_for};
use lotmatch_engine::{
    score_pair, BlockingIndex, DedupConfig, DedupError, DedupEvent, DetectionResult,
    DuplicateMatch, ListingSnapshot, MatchStatus, PairKey, ReviewItem, ReviewStatus,
    ScoreBreakdown, SignalRegistry,
};
use lotmatch_store::{
    AuditLog, ConfigStore, EventSink, ListingSource, MatchStore, ReviewStore, StoreResult,
};

/// Score deltas below this are noise from float arithmetic, not a material
/// change; they never touch stored matches or reviews.
pub const SCORE_EPSILON: f64 = 1e-9;

pub struct Detector {
    listings: Arc<dyn ListingSource>,
    matches: Arc<dyn MatchStore>,
    reviews: Arc<dyn ReviewStore>,
    audit: Arc<dyn AuditLog>,
    configs: Arc<dyn ConfigStore>,
    events: Arc<dyn EventSink>,
    registry: SignalRegistry,
    index: RwLock<BlockingIndex>,
    // One lock per listing id so two detect calls for the same listing
    // serialize while unrelated listings proceed in parallel.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // One lock per canonical pair: detect calls reaching the same pair from
    // opposite sides serialize their read-modify-write on match and review
    // state. Always taken after the listing lock, never the other way.
    pair_locks: Mutex<HashMap<PairKey, Arc<Mutex<()>>>>,
}

impl Detector {
    /// Build a detector over the given stores, seeding the blocking index
    /// from every listing the source currently knows.
    pub fn new(
        listings: Arc<dyn ListingSource>,
        matches: Arc<dyn MatchStore>,
        reviews: Arc<dyn ReviewStore>,
        audit: Arc<dyn AuditLog>,
        configs: Arc<dyn ConfigStore>,
        events: Arc<dyn EventSink>,
    ) -> StoreResult<Self> {
        let index = BlockingIndex::build(&listings.all()?);
        Ok(Self {
            listings,
            matches,
            reviews,
            audit,
            configs,
            events,
            registry: SignalRegistry::builtin(),
            index: RwLock::new(index),
            locks: Mutex::new(HashMap::new()),
            pair_locks: Mutex::new(HashMap::new()),
        })
    }

    fn listing_lock(&self, listing_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(listing_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn pair_lock(&self, pair: &PairKey) -> Arc<Mutex<()>> {
        let mut locks = self.pair_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(pair.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run detection for one listing against all its blocking candidates.
    ///
    /// Idempotent: re-running with the same snapshots and config version
    /// leaves every stored match and review untouched. Unknown listing ids
    /// fail with `NotFound` before anything is written.
    pub fn detect(&self, listing_id: &str) -> StoreResult<DetectionResult> {
        let started = Instant::now();
        let config = self.configs.active()?;
        let listing = self
            .listings
            .get(listing_id)?
            .ok_or_else(|| DedupError::NotFound(format!("listing '{listing_id}'")))?;

        let lock = self.listing_lock(listing_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(&listing);
        let candidate_ids = self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .candidates_for(&listing, &config);
        debug!(listing_id, candidates = candidate_ids.len(), "blocking complete");

        let mut result = DetectionResult {
            listing_id: listing_id.to_string(),
            candidates_scored: 0,
            duplicates_found: 0,
            reviews_created: 0,
            matches_updated: 0,
            elapsed_ms: 0,
        };

        for candidate_id in candidate_ids {
            let Some(candidate) = self.listings.get(&candidate_id)? else {
                // Index can lag the source; a vanished candidate is skipped.
                continue;
            };
            let breakdown = score_pair(&listing, &candidate, &config, &self.registry);
            result.candidates_scored += 1;
            self.apply_score(&listing, &candidate, breakdown, &config, &mut result)?;
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            listing_id,
            scored = result.candidates_scored,
            duplicates = result.duplicates_found,
            reviews = result.reviews_created,
            "detection completed"
        );
        self.events.emit(DedupEvent::DetectionCompleted {
            listing_id: result.listing_id.clone(),
            duplicates_found: result.duplicates_found,
            reviews_created: result.reviews_created,
            elapsed_ms: result.elapsed_ms,
        });
        Ok(result)
    }

    /// Detect for every listing in the source, in id order. Pair symmetry
    /// makes the second visit of each pair a no-op.
    pub fn detect_all(&self) -> StoreResult<Vec<DetectionResult>> {
        let mut listings = self.listings.all()?;
        listings.sort_by(|a, b| a.listing_id.cmp(&b.listing_id));
        listings
            .iter()
            .map(|l| self.detect(&l.listing_id))
            .collect()
    }

    fn apply_score(
        &self,
        listing: &ListingSnapshot,
        candidate: &ListingSnapshot,
        breakdown: ScoreBreakdown,
        config: &DedupConfig,
        result: &mut DetectionResult,
    ) -> StoreResult<()> {
        let pair = PairKey::new(&listing.listing_id, &candidate.listing_id);
        let score = breakdown.composite;
        let lock = self.pair_lock(&pair);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let existing = self.matches.get(&pair)?;

        let unchanged = existing.as_ref().is_some_and(|m| {
            m.config_version == config.version && (m.score - score).abs() < SCORE_EPSILON
        });
        if unchanged {
            return Ok(());
        }

        let now = Utc::now();
        let status = status_for(score, config);
        let band = band_for(score, config);
        let updated = DuplicateMatch {
            pair: pair.clone(),
            score,
            band,
            signals: breakdown.signals,
            status,
            config_version: config.version,
            created_at: existing.as_ref().map(|m| m.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.matches.upsert(&updated)?;
        result.matches_updated += 1;

        let prev_status = existing.as_ref().map(|m| m.status);
        if prev_status != Some(status) {
            self.audit.append(
                "system",
                "match_status",
                &format!("{pair} {status} score {score:.4} v{}", config.version),
            )?;
        }

        match status {
            MatchStatus::AutoConfirmed => {
                self.withdraw_review(&pair)?;
                result.duplicates_found += 1;
                self.events.emit(DedupEvent::DuplicateFound { pair, score, band });
            }
            MatchStatus::PendingReview => {
                self.enqueue_review(&pair, score, config, result)?;
            }
            MatchStatus::Rejected => {
                self.withdraw_review(&pair)?;
            }
        }
        Ok(())
    }

    /// Close the open review item for a pair that re-scored out of the review
    /// band. The item is marked skipped rather than deleted so the queue
    /// history stays append-only; the match itself already carries the newer
    /// classification.
    fn withdraw_review(&self, pair: &PairKey) -> StoreResult<()> {
        let open = self
            .reviews
            .for_pair(pair)?
            .into_iter()
            .find(|i| !i.is_terminal());
        if let Some(mut item) = open {
            item.status = ReviewStatus::Skipped;
            item.reviewer = Some("system".to_string());
            item.notes = Some("superseded by re-score".to_string());
            item.resolved_at = Some(Utc::now());
            self.reviews.update(&item)?;
            self.audit
                .append("system", "review_withdrawn", &format!("{} {pair}", item.id))?;
        }
        Ok(())
    }

    /// Create or refresh the pending review item for a pair. An already
    /// pending item is refreshed in place; a fresh item is created otherwise,
    /// since reaching this point means the score changed materially and past
    /// terminal decisions no longer cover it.
    fn enqueue_review(
        &self,
        pair: &PairKey,
        score: f64,
        config: &DedupConfig,
        result: &mut DetectionResult,
    ) -> StoreResult<()> {
        let priority = review_priority(score);
        let open = self
            .reviews
            .for_pair(pair)?
            .into_iter()
            .find(|i| !i.is_terminal());

        if let Some(mut item) = open {
            item.score = score;
            item.priority = priority;
            item.config_version = config.version;
            self.reviews.update(&item)?;
            self.events.emit(DedupEvent::ReviewRequired {
                review_id: item.id,
                pair: pair.clone(),
                score,
                priority,
            });
            return Ok(());
        }

        let item = ReviewItem {
            id: format!("rev_{}", Uuid::new_v4()),
            pair: pair.clone(),
            score,
            priority,
            status: ReviewStatus::Pending,
            config_version: config.version,
            reviewer: None,
            notes: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.reviews.create(&item)?;
        result.reviews_created += 1;
        self.events.emit(DedupEvent::ReviewRequired {
            review_id: item.id,
            pair: pair.clone(),
            score,
            priority,
        });
        Ok(())
    }
}
