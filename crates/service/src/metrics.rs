//! Accuracy tracking per config version, recomputed from stored state on
//! demand rather than maintained as counters.

use std::sync::Arc;

use lotmatch_engine::{AccuracySnapshot, MatchStatus, PairKey, ReviewStatus};
use lotmatch_store::{AuditLog, MatchStore, ReviewStore, StoreResult};

pub struct AccuracyTracker {
    matches: Arc<dyn MatchStore>,
    reviews: Arc<dyn ReviewStore>,
    audit: Arc<dyn AuditLog>,
}

impl AccuracyTracker {
    pub fn new(
        matches: Arc<dyn MatchStore>,
        reviews: Arc<dyn ReviewStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self { matches, reviews, audit }
    }

    /// Record an externally reported missed duplicate. These are the only
    /// false negatives the system can know about; the audit log is their
    /// system of record. The detail is JSON so snapshots can read the version
    /// back without parsing prose.
    pub fn report_missed(
        &self,
        pair: &PairKey,
        reporter: &str,
        config_version: u64,
    ) -> StoreResult<()> {
        let detail = serde_json::json!({
            "pair": pair.to_string(),
            "config_version": config_version,
        });
        self.audit
            .append(reporter, "missed_duplicate", &detail.to_string())?;
        Ok(())
    }

    /// Accuracy for one config version.
    ///
    /// True positives are auto-confirmed matches scored under that version.
    /// False positives are review resolutions of confirmed-not-duplicate for
    /// items queued under it. False negatives are the reported misses. Rates
    /// are `None` when their denominator is zero.
    pub fn snapshot(&self, config_version: u64) -> StoreResult<AccuracySnapshot> {
        let true_positives = self
            .matches
            .for_version(config_version)?
            .iter()
            .filter(|m| m.status == MatchStatus::AutoConfirmed)
            .count();

        let false_positives = self
            .reviews
            .resolved()?
            .iter()
            .filter(|i| {
                i.status == ReviewStatus::ConfirmedNotDuplicate
                    && i.config_version == config_version
            })
            .count();

        let false_negatives = self
            .audit
            .entries()?
            .iter()
            .filter(|e| e.action == "missed_duplicate")
            .filter(|e| {
                serde_json::from_str::<serde_json::Value>(&e.detail)
                    .ok()
                    .and_then(|v| v.get("config_version").and_then(|c| c.as_u64()))
                    == Some(config_version)
            })
            .count();

        let ratio = |num: usize, denom: usize| {
            if denom > 0 {
                Some(num as f64 / denom as f64)
            } else {
                None
            }
        };
        Ok(AccuracySnapshot {
            config_version,
            true_positives,
            false_positives,
            false_negatives,
            precision: ratio(true_positives, true_positives + false_positives),
            recall: ratio(true_positives, true_positives + false_negatives),
        })
    }
}
