//! SQLite backend for matches, reviews, audit, configs, and listings.
//!
//! The `(pair_low, pair_high)` primary key enforces the one-row-per-pair
//! invariant at the database level; upserts run in explicit transactions so
//! read-modify-write per pair is atomic even when two detect runs converge
//! on the same pair from opposite sides.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use lotmatch_engine::{
    AuditEntry, ConfidenceBand, DedupConfig, DedupError, DuplicateMatch, ListingSnapshot,
    MatchStatus, PairKey, ReviewItem, ReviewStatus, SignalScore,
};

use crate::{
    AuditLog, ConfigStore, ListingSource, MatchStore, ReviewStore, StoreResult,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS listings (
    listing_id  TEXT PRIMARY KEY,
    snapshot    TEXT NOT NULL            -- full snapshot as JSON
);

CREATE TABLE IF NOT EXISTS matches (
    pair_low        TEXT NOT NULL,
    pair_high       TEXT NOT NULL,
    score           REAL NOT NULL,
    band            TEXT NOT NULL,
    signals         TEXT NOT NULL,       -- per-signal breakdown as JSON
    status          TEXT NOT NULL,
    config_version  INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (pair_low, pair_high)
);

CREATE TABLE IF NOT EXISTS reviews (
    id              TEXT PRIMARY KEY,
    pair_low        TEXT NOT NULL,
    pair_high       TEXT NOT NULL,
    score           REAL NOT NULL,
    priority        REAL NOT NULL,
    status          TEXT NOT NULL,
    config_version  INTEGER NOT NULL,
    reviewer        TEXT,
    notes           TEXT,
    created_at      TEXT NOT NULL,
    resolved_at     TEXT
);

CREATE TABLE IF NOT EXISTS audit (
    seq     INTEGER PRIMARY KEY AUTOINCREMENT,
    actor   TEXT NOT NULL,
    action  TEXT NOT NULL,
    detail  TEXT NOT NULL,
    at      TEXT NOT NULL,
    hash    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS configs (
    version     INTEGER PRIMARY KEY,
    body        TEXT NOT NULL,           -- full config as JSON
    created_at  TEXT NOT NULL
);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn storage(e: impl std::fmt::Display) -> DedupError {
    DedupError::Storage(e.to_string())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, DedupError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DedupError::Storage(format!("bad timestamp '{s}': {e}")))
}

fn band_from_str(s: &str) -> Result<ConfidenceBand, DedupError> {
    match s {
        "very_low" => Ok(ConfidenceBand::VeryLow),
        "low" => Ok(ConfidenceBand::Low),
        "medium" => Ok(ConfidenceBand::Medium),
        "high" => Ok(ConfidenceBand::High),
        "very_high" => Ok(ConfidenceBand::VeryHigh),
        "exact" => Ok(ConfidenceBand::Exact),
        other => Err(DedupError::Storage(format!("unknown band '{other}'"))),
    }
}

fn match_status_from_str(s: &str) -> Result<MatchStatus, DedupError> {
    match s {
        "auto_confirmed" => Ok(MatchStatus::AutoConfirmed),
        "pending_review" => Ok(MatchStatus::PendingReview),
        "rejected" => Ok(MatchStatus::Rejected),
        other => Err(DedupError::Storage(format!("unknown match status '{other}'"))),
    }
}

fn review_status_from_str(s: &str) -> Result<ReviewStatus, DedupError> {
    match s {
        "pending" => Ok(ReviewStatus::Pending),
        "confirmed_duplicate" => Ok(ReviewStatus::ConfirmedDuplicate),
        "confirmed_not_duplicate" => Ok(ReviewStatus::ConfirmedNotDuplicate),
        "skipped" => Ok(ReviewStatus::Skipped),
        other => Err(DedupError::Storage(format!("unknown review status '{other}'"))),
    }
}

// Raw row shapes read inside rusqlite closures, converted afterwards so
// parse failures surface as DedupError rather than panics.
type RawMatch = (String, String, f64, String, String, String, i64, String, String);
type RawReview = (
    String,
    String,
    String,
    f64,
    f64,
    String,
    i64,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
);

fn build_match(raw: RawMatch) -> Result<DuplicateMatch, DedupError> {
    let (low, high, score, band, signals, status, version, created, updated) = raw;
    let signals: Vec<SignalScore> = serde_json::from_str(&signals).map_err(storage)?;
    Ok(DuplicateMatch {
        pair: PairKey { low, high },
        score,
        band: band_from_str(&band)?,
        signals,
        status: match_status_from_str(&status)?,
        config_version: version as u64,
        created_at: parse_time(&created)?,
        updated_at: parse_time(&updated)?,
    })
}

fn build_review(raw: RawReview) -> Result<ReviewItem, DedupError> {
    let (id, low, high, score, priority, status, version, reviewer, notes, created, resolved) = raw;
    Ok(ReviewItem {
        id,
        pair: PairKey { low, high },
        score,
        priority,
        status: review_status_from_str(&status)?,
        config_version: version as u64,
        reviewer,
        notes,
        created_at: parse_time(&created)?,
        resolved_at: resolved.as_deref().map(parse_time).transpose()?,
    })
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn put_listing(&self, listing: &ListingSnapshot) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = serde_json::to_string(listing).map_err(storage)?;
        conn.execute(
            "INSERT INTO listings (listing_id, snapshot) VALUES (?1, ?2)
             ON CONFLICT(listing_id) DO UPDATE SET snapshot = excluded.snapshot",
            params![listing.listing_id, snapshot],
        )
        .map_err(storage)?;
        Ok(())
    }

    fn select_matches(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<DuplicateMatch>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!(
            "SELECT pair_low, pair_high, score, band, signals, status, config_version, created_at, updated_at
             FROM matches {where_clause} ORDER BY pair_low, pair_high"
        );
        let mut stmt = conn.prepare(&sql).map_err(storage)?;
        let raw: Vec<RawMatch> = stmt
            .query_map(args, |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })
            .map_err(storage)?
            .collect::<Result<_, _>>()
            .map_err(storage)?;
        raw.into_iter().map(build_match).collect()
    }

    fn select_reviews(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<ReviewItem>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!(
            "SELECT id, pair_low, pair_high, score, priority, status, config_version, reviewer, notes, created_at, resolved_at
             FROM reviews {where_clause} ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql).map_err(storage)?;
        let raw: Vec<RawReview> = stmt
            .query_map(args, |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                ))
            })
            .map_err(storage)?
            .collect::<Result<_, _>>()
            .map_err(storage)?;
        raw.into_iter().map(build_review).collect()
    }
}

impl ListingSource for SqliteStore {
    fn get(&self, listing_id: &str) -> StoreResult<Option<ListingSnapshot>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM listings WHERE listing_id = ?1",
                params![listing_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        snapshot
            .map(|s| serde_json::from_str(&s).map_err(storage))
            .transpose()
    }

    fn all(&self) -> StoreResult<Vec<ListingSnapshot>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare("SELECT snapshot FROM listings ORDER BY listing_id")
            .map_err(storage)?;
        let snapshots: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(storage)?
            .collect::<Result<_, _>>()
            .map_err(storage)?;
        snapshots
            .iter()
            .map(|s| serde_json::from_str(s).map_err(storage))
            .collect()
    }
}

impl MatchStore for SqliteStore {
    fn get(&self, pair: &PairKey) -> StoreResult<Option<DuplicateMatch>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let raw: Option<RawMatch> = conn
            .query_row(
                "SELECT pair_low, pair_high, score, band, signals, status, config_version, created_at, updated_at
                 FROM matches WHERE pair_low = ?1 AND pair_high = ?2",
                params![pair.low, pair.high],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                },
            )
            .optional()
            .map_err(storage)?;
        raw.map(build_match).transpose()
    }

    fn upsert(&self, m: &DuplicateMatch) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.unchecked_transaction().map_err(storage)?;
        let signals = serde_json::to_string(&m.signals).map_err(storage)?;
        tx.execute(
            "INSERT INTO matches
                 (pair_low, pair_high, score, band, signals, status, config_version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(pair_low, pair_high) DO UPDATE SET
                 score = excluded.score,
                 band = excluded.band,
                 signals = excluded.signals,
                 status = excluded.status,
                 config_version = excluded.config_version,
                 updated_at = excluded.updated_at",
            params![
                m.pair.low,
                m.pair.high,
                m.score,
                m.band.to_string(),
                signals,
                m.status.to_string(),
                m.config_version as i64,
                m.created_at.to_rfc3339(),
                m.updated_at.to_rfc3339(),
            ],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)
    }

    fn all(&self) -> StoreResult<Vec<DuplicateMatch>> {
        self.select_matches("", &[])
    }

    fn for_version(&self, config_version: u64) -> StoreResult<Vec<DuplicateMatch>> {
        self.select_matches(
            "WHERE config_version = ?1",
            &[&(config_version as i64)],
        )
    }
}

impl ReviewStore for SqliteStore {
    fn create(&self, item: &ReviewItem) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let result = conn.execute(
            "INSERT INTO reviews
                 (id, pair_low, pair_high, score, priority, status, config_version, reviewer, notes, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                item.id,
                item.pair.low,
                item.pair.high,
                item.score,
                item.priority,
                item.status.to_string(),
                item.config_version as i64,
                item.reviewer,
                item.notes,
                item.created_at.to_rfc3339(),
                item.resolved_at.map(|t| t.to_rfc3339()),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DedupError::Conflict(format!(
                    "review item '{}' already exists",
                    item.id
                )))
            }
            Err(e) => Err(storage(e)),
        }
    }

    fn get(&self, id: &str) -> StoreResult<Option<ReviewItem>> {
        let items = self.select_reviews("WHERE id = ?1", &[&id])?;
        Ok(items.into_iter().next())
    }

    fn update(&self, item: &ReviewItem) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.unchecked_transaction().map_err(storage)?;
        let changed = tx
            .execute(
                "UPDATE reviews SET score = ?2, priority = ?3, status = ?4, reviewer = ?5,
                     notes = ?6, resolved_at = ?7, config_version = ?8
                 WHERE id = ?1",
                params![
                    item.id,
                    item.score,
                    item.priority,
                    item.status.to_string(),
                    item.reviewer,
                    item.notes,
                    item.resolved_at.map(|t| t.to_rfc3339()),
                    item.config_version as i64,
                ],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(DedupError::NotFound(format!("review item '{}'", item.id)));
        }
        tx.commit().map_err(storage)
    }

    fn pending(&self) -> StoreResult<Vec<ReviewItem>> {
        self.select_reviews("WHERE status = 'pending'", &[])
    }

    fn for_pair(&self, pair: &PairKey) -> StoreResult<Vec<ReviewItem>> {
        self.select_reviews(
            "WHERE pair_low = ?1 AND pair_high = ?2",
            &[&pair.low, &pair.high],
        )
    }

    fn resolved(&self) -> StoreResult<Vec<ReviewItem>> {
        self.select_reviews("WHERE status != 'pending'", &[])
    }
}

impl AuditLog for SqliteStore {
    fn append(&self, actor: &str, action: &str, detail: &str) -> StoreResult<AuditEntry> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.unchecked_transaction().map_err(storage)?;
        let prev: Option<String> = tx
            .query_row(
                "SELECT hash FROM audit ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        let entry = AuditEntry::chained(prev.as_deref(), actor, action, detail, Utc::now());
        tx.execute(
            "INSERT INTO audit (actor, action, detail, at, hash) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.actor,
                entry.action,
                entry.detail,
                entry.at.to_rfc3339(),
                entry.hash,
            ],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;
        Ok(entry)
    }

    fn entries(&self) -> StoreResult<Vec<AuditEntry>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare("SELECT actor, action, detail, at, hash FROM audit ORDER BY seq")
            .map_err(storage)?;
        let raw: Vec<(String, String, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })
            .map_err(storage)?
            .collect::<Result<_, _>>()
            .map_err(storage)?;
        raw.into_iter()
            .map(|(actor, action, detail, at, hash)| {
                Ok(AuditEntry {
                    actor,
                    action,
                    detail,
                    at: parse_time(&at)?,
                    hash,
                })
            })
            .collect()
    }
}

impl ConfigStore for SqliteStore {
    fn active(&self) -> StoreResult<DedupConfig> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM configs ORDER BY version DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        match body {
            Some(body) => serde_json::from_str(&body).map_err(storage),
            None => Err(DedupError::NotFound("no published config".into())),
        }
    }

    fn publish(&self, mut config: DedupConfig) -> StoreResult<u64> {
        config.validate()?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.unchecked_transaction().map_err(storage)?;
        let next: i64 = tx
            .query_row("SELECT COALESCE(MAX(version), 0) + 1 FROM configs", [], |row| {
                row.get(0)
            })
            .map_err(storage)?;
        config.version = next as u64;
        let body = serde_json::to_string(&config).map_err(storage)?;
        tx.execute(
            "INSERT INTO configs (version, body, created_at) VALUES (?1, ?2, ?3)",
            params![next, body, Utc::now().to_rfc3339()],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;
        Ok(next as u64)
    }

    fn version(&self, version: u64) -> StoreResult<Option<DedupConfig>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM configs WHERE version = ?1",
                params![version as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        body.map(|b| serde_json::from_str(&b).map_err(storage)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotmatch_engine::model::verify_audit_chain;

    fn a_match(pair: PairKey, score: f64, status: MatchStatus) -> DuplicateMatch {
        let now = Utc::now();
        DuplicateMatch {
            pair,
            score,
            band: ConfidenceBand::High,
            signals: vec![SignalScore {
                name: "make_model".into(),
                similarity: score,
                weight: 1.0,
            }],
            status,
            config_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn upsert_keeps_one_row_per_pair() {
        let store = SqliteStore::open_in_memory().unwrap();
        let pair = PairKey::new("b", "a");
        MatchStore::upsert(&store, &a_match(pair.clone(), 0.7, MatchStatus::PendingReview)).unwrap();
        MatchStore::upsert(&store, &a_match(pair.clone(), 0.92, MatchStatus::AutoConfirmed)).unwrap();

        let all = MatchStore::all(&store).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].score, 0.92);
        assert_eq!(all[0].status, MatchStatus::AutoConfirmed);
        assert_eq!(all[0].signals.len(), 1);
    }

    #[test]
    fn match_roundtrip_preserves_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let m = a_match(PairKey::new("x", "y"), 0.42, MatchStatus::Rejected);
        MatchStore::upsert(&store, &m).unwrap();
        let loaded = MatchStore::get(&store, &m.pair).unwrap().unwrap();
        assert_eq!(loaded.band, ConfidenceBand::High);
        assert_eq!(loaded.config_version, 1);
        assert_eq!(loaded.signals[0].name, "make_model");
    }

    #[test]
    fn review_lifecycle_and_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut item = ReviewItem {
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
        assert!(matches!(
            ReviewStore::create(&store, &item).unwrap_err(),
            DedupError::Conflict(_)
        ));

        assert_eq!(ReviewStore::pending(&store).unwrap().len(), 1);

        item.status = ReviewStatus::ConfirmedDuplicate;
        item.reviewer = Some("alice".into());
        item.resolved_at = Some(Utc::now());
        ReviewStore::update(&store, &item).unwrap();

        assert!(ReviewStore::pending(&store).unwrap().is_empty());
        let resolved = ReviewStore::resolved(&store).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].reviewer.as_deref(), Some("alice"));
    }

    #[test]
    fn audit_chain_survives_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        AuditLog::append(&store, "system", "config_published", "v1").unwrap();
        AuditLog::append(&store, "bob", "match_status", "a~b pending_review").unwrap();
        let entries = AuditLog::entries(&store).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(verify_audit_chain(&entries));
    }

    #[test]
    fn config_publish_assigns_versions() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(ConfigStore::active(&store).is_err());
        let v1 = ConfigStore::publish(&store, DedupConfig::default()).unwrap();
        let v2 = ConfigStore::publish(&store, DedupConfig::default()).unwrap();
        assert_eq!((v1, v2), (1, 2));
        assert_eq!(ConfigStore::active(&store).unwrap().version, 2);
        assert!(ConfigStore::version(&store, 1).unwrap().is_some());
        assert!(ConfigStore::version(&store, 3).unwrap().is_none());
    }

    #[test]
    fn listings_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let listing = ListingSnapshot {
            listing_id: "at_101".into(),
            source: "autotrader".into(),
            make: Some("Toyota".into()),
            model: Some("Camry".into()),
            trim: None,
            year: Some(2021),
            price_cents: Some(2_450_000),
            mileage_km: None,
            latitude: Some(43.65),
            longitude: Some(-79.38),
            postal_code: None,
            image_hash: Some("ffab0912".into()),
        };
        store.put_listing(&listing).unwrap();
        let loaded = ListingSource::get(&store, "at_101").unwrap().unwrap();
        assert_eq!(loaded.year, Some(2021));
        assert_eq!(ListingSource::all(&store).unwrap().len(), 1);
        assert!(ListingSource::get(&store, "missing").unwrap().is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lotmatch.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            MatchStore::upsert(
                &store,
                &a_match(PairKey::new("a", "b"), 0.8, MatchStatus::PendingReview),
            )
            .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(MatchStore::all(&store).unwrap().len(), 1);
    }
}
