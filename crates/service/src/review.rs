//! Review queue: the human adjudication surface for uncertain matches.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use lotmatch_engine::classify::queue_order;
use lotmatch_engine::{DedupError, MatchStatus, ReviewItem, ReviewStatus};
use lotmatch_store::{AuditLog, MatchStore, ReviewStore, StoreResult};

pub struct ReviewQueue {
    reviews: Arc<dyn ReviewStore>,
    matches: Arc<dyn MatchStore>,
    audit: Arc<dyn AuditLog>,
}

impl ReviewQueue {
    pub fn new(
        reviews: Arc<dyn ReviewStore>,
        matches: Arc<dyn MatchStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self { reviews, matches, audit }
    }

    /// Pending items in queue order: priority descending, older first at
    /// equal priority, canonical pair as the final tie-break.
    pub fn pending(&self) -> StoreResult<Vec<ReviewItem>> {
        let mut items = self.reviews.pending()?;
        items.sort_by(queue_order);
        Ok(items)
    }

    pub fn get(&self, id: &str) -> StoreResult<ReviewItem> {
        self.reviews
            .get(id)?
            .ok_or_else(|| DedupError::NotFound(format!("review item '{id}'")))
    }

    /// Resolve one pending item and propagate the decision to the match:
    /// confirmed-duplicate auto-confirms it, confirmed-not-duplicate rejects
    /// it, skipped leaves the match as classified. Resolving a terminal item
    /// is a conflict; resolutions are immutable.
    pub fn resolve(
        &self,
        id: &str,
        decision: ReviewStatus,
        reviewer: &str,
        notes: Option<String>,
    ) -> StoreResult<ReviewItem> {
        if decision == ReviewStatus::Pending {
            return Err(DedupError::Conflict(
                "pending is not a resolution".to_string(),
            ));
        }
        let mut item = self.get(id)?;
        if item.is_terminal() {
            return Err(DedupError::Conflict(format!(
                "review item '{id}' already resolved as {}",
                item.status
            )));
        }

        item.status = decision;
        item.reviewer = Some(reviewer.to_string());
        item.notes = notes;
        item.resolved_at = Some(Utc::now());
        self.reviews.update(&item)?;

        let match_status = match decision {
            ReviewStatus::ConfirmedDuplicate => Some(MatchStatus::AutoConfirmed),
            ReviewStatus::ConfirmedNotDuplicate => Some(MatchStatus::Rejected),
            ReviewStatus::Skipped | ReviewStatus::Pending => None,
        };
        if let Some(status) = match_status {
            if let Some(mut m) = self.matches.get(&item.pair)? {
                m.status = status;
                m.updated_at = Utc::now();
                self.matches.upsert(&m)?;
            }
        }

        self.audit.append(
            reviewer,
            "review_resolved",
            &format!("{id} {} {}", item.pair, decision),
        )?;
        info!(review_id = id, %decision, reviewer, "review resolved");
        Ok(item)
    }
}
