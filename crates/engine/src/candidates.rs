//! Candidate generation (blocking): shrink the comparison space from
//! all-pairs to plausible candidates before any expensive scoring runs.

use std::collections::BTreeMap;

use crate::config::DedupConfig;
use crate::model::ListingSnapshot;
use crate::signals::normalize_text;

/// Coarse blocking key: normalized make + model. Cheap to compute, and every
/// true duplicate shares it, so blocking introduces no false negatives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct BlockKey {
    make: String,
    model: String,
}

impl BlockKey {
    fn for_listing(listing: &ListingSnapshot) -> Option<Self> {
        match (&listing.make, &listing.model) {
            (Some(make), Some(model)) => Some(Self {
                make: normalize_text(make),
                model: normalize_text(model),
            }),
            // Without make and model there is no reliable block; such listings
            // are never offered as candidates and produce none themselves.
            _ => None,
        }
    }
}

/// In-memory index from blocking key to member listings.
///
/// Kept current by the orchestrator; candidate lookups are deterministic
/// (lexicographic id order) and capped by `config.max_candidates`.
#[derive(Debug, Default)]
pub struct BlockingIndex {
    by_key: BTreeMap<BlockKey, BTreeMap<String, Option<i32>>>,
}

impl BlockingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(listings: &[ListingSnapshot]) -> Self {
        let mut index = Self::new();
        for listing in listings {
            index.insert(listing);
        }
        index
    }

    pub fn insert(&mut self, listing: &ListingSnapshot) {
        if let Some(key) = BlockKey::for_listing(listing) {
            self.by_key
                .entry(key)
                .or_default()
                .insert(listing.listing_id.clone(), listing.year);
        }
    }

    pub fn remove(&mut self, listing: &ListingSnapshot) {
        if let Some(key) = BlockKey::for_listing(listing) {
            if let Some(block) = self.by_key.get_mut(&key) {
                block.remove(&listing.listing_id);
                if block.is_empty() {
                    self.by_key.remove(&key);
                }
            }
        }
    }

    /// Candidate ids for `target`: same block, year within the configured
    /// tolerance where both years are present (a missing year never excludes),
    /// target itself excluded, lexicographic order, capped.
    pub fn candidates_for(&self, target: &ListingSnapshot, config: &DedupConfig) -> Vec<String> {
        let Some(key) = BlockKey::for_listing(target) else {
            return Vec::new();
        };
        let Some(block) = self.by_key.get(&key) else {
            return Vec::new();
        };

        block
            .iter()
            .filter(|(id, _)| id.as_str() != target.listing_id)
            .filter(|(_, year)| match (target.year, year) {
                (Some(a), Some(b)) => (a as i64 - *b as i64).abs() <= config.tolerances.year,
                _ => true,
            })
            .map(|(id, _)| id.clone())
            .take(config.max_candidates)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: &str, make: &str, model: &str, year: Option<i32>) -> ListingSnapshot {
        ListingSnapshot {
            listing_id: id.into(),
            source: "test".into(),
            make: Some(make.into()),
            model: Some(model.into()),
            trim: None,
            year,
            price_cents: None,
            mileage_km: None,
            latitude: None,
            longitude: None,
            postal_code: None,
            image_hash: None,
        }
    }

    #[test]
    fn same_block_same_year_is_candidate() {
        let listings = vec![
            listing("a1", "Toyota", "Camry", Some(2021)),
            listing("b1", "toyota", "CAMRY", Some(2021)),
            listing("c1", "Honda", "Civic", Some(2021)),
        ];
        let index = BlockingIndex::build(&listings);
        let candidates = index.candidates_for(&listings[0], &DedupConfig::default());
        assert_eq!(candidates, vec!["b1".to_string()]);
    }

    #[test]
    fn year_window_excludes_distant_years() {
        let listings = vec![
            listing("a1", "Toyota", "Camry", Some(2021)),
            listing("b1", "Toyota", "Camry", Some(2022)),
            listing("c1", "Toyota", "Camry", Some(2018)),
        ];
        let index = BlockingIndex::build(&listings);
        let candidates = index.candidates_for(&listings[0], &DedupConfig::default());
        assert_eq!(candidates, vec!["b1".to_string()]);
    }

    #[test]
    fn missing_year_never_excludes() {
        let listings = vec![
            listing("a1", "Toyota", "Camry", Some(2021)),
            listing("b1", "Toyota", "Camry", None),
        ];
        let index = BlockingIndex::build(&listings);
        assert_eq!(
            index.candidates_for(&listings[0], &DedupConfig::default()),
            vec!["b1".to_string()]
        );
        assert_eq!(
            index.candidates_for(&listings[1], &DedupConfig::default()),
            vec!["a1".to_string()]
        );
    }

    #[test]
    fn target_is_never_its_own_candidate() {
        let listings = vec![listing("a1", "Toyota", "Camry", Some(2021))];
        let index = BlockingIndex::build(&listings);
        assert!(index
            .candidates_for(&listings[0], &DedupConfig::default())
            .is_empty());
    }

    #[test]
    fn missing_make_or_model_yields_no_candidates() {
        let mut no_model = listing("a1", "Toyota", "Camry", Some(2021));
        no_model.model = None;
        let others = vec![listing("b1", "Toyota", "Camry", Some(2021))];
        let index = BlockingIndex::build(&others);
        assert!(index.candidates_for(&no_model, &DedupConfig::default()).is_empty());
    }

    #[test]
    fn cap_and_deterministic_order() {
        let mut listings = Vec::new();
        for i in 0..10 {
            listings.push(listing(&format!("id_{i:02}"), "Toyota", "Camry", Some(2021)));
        }
        let index = BlockingIndex::build(&listings);
        let mut config = DedupConfig::default();
        config.max_candidates = 3;
        let candidates = index.candidates_for(&listings[9], &config);
        assert_eq!(candidates, vec!["id_00", "id_01", "id_02"]);
    }

    #[test]
    fn remove_drops_listing_from_block() {
        let listings = vec![
            listing("a1", "Toyota", "Camry", Some(2021)),
            listing("b1", "Toyota", "Camry", Some(2021)),
        ];
        let mut index = BlockingIndex::build(&listings);
        index.remove(&listings[1]);
        assert!(index
            .candidates_for(&listings[0], &DedupConfig::default())
            .is_empty());
        assert_eq!(index.len(), 1);
    }
}
