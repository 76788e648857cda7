//! Fuzzy matching aggregator: combines signal similarities into one
//! composite score using configured weights.

use crate::config::DedupConfig;
use crate::model::{ListingSnapshot, ScoreBreakdown, SignalScore};
use crate::signals::SignalRegistry;

/// Score one pair of snapshots under one config.
///
/// Composite = weighted mean over the signals that produced a real comparison;
/// unavailable signals are excluded from numerator and denominator, so weights
/// renormalize over the available subset and a source omitting a field is not
/// penalized for it. Deterministic: same snapshots + same config version give
/// the same composite and the same breakdown.
pub fn score_pair(
    a: &ListingSnapshot,
    b: &ListingSnapshot,
    config: &DedupConfig,
    registry: &SignalRegistry,
) -> ScoreBreakdown {
    let mut signals = Vec::new();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for def in registry.iter() {
        let weight = config.weight(def.name);
        if weight <= 0.0 {
            continue;
        }
        if let Some(similarity) = (def.compare)(a, b, config) {
            weighted_sum += similarity * weight;
            weight_total += weight;
            signals.push(SignalScore {
                name: def.name.to_string(),
                similarity,
                weight,
            });
        }
    }

    let composite = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        0.0
    };

    ScoreBreakdown { composite, signals }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ListingSnapshot;
    use std::collections::BTreeMap;

    fn snapshot(id: &str) -> ListingSnapshot {
        ListingSnapshot {
            listing_id: id.into(),
            source: "test".into(),
            make: Some("Toyota".into()),
            model: Some("Camry".into()),
            trim: None,
            year: Some(2021),
            price_cents: None,
            mileage_km: None,
            latitude: None,
            longitude: None,
            postal_code: None,
            image_hash: None,
        }
    }

    fn two_signal_config(make_model: f64, price: f64) -> DedupConfig {
        let mut weights = BTreeMap::new();
        weights.insert("make_model".to_string(), make_model);
        weights.insert("price".to_string(), price);
        DedupConfig {
            weights,
            ..DedupConfig::default()
        }
    }

    #[test]
    fn unavailable_signal_renormalizes_weights() {
        // Two signals weighted 0.6/0.4; price unavailable on both sides, so
        // the composite must equal the available signal's raw value.
        let config = two_signal_config(0.6, 0.4);
        let registry = SignalRegistry::builtin();
        let a = snapshot("a");
        let mut b = snapshot("b");
        b.model = Some("Camrv".into());

        let breakdown = score_pair(&a, &b, &config, &registry);
        assert_eq!(breakdown.signals.len(), 1);
        assert_eq!(breakdown.signals[0].name, "make_model");
        assert!((breakdown.composite - breakdown.signals[0].similarity).abs() < 1e-12);
    }

    #[test]
    fn weighted_mean_over_available_signals() {
        let config = two_signal_config(0.6, 0.4);
        let registry = SignalRegistry::builtin();
        let mut a = snapshot("a");
        let mut b = snapshot("b");
        a.price_cents = Some(2_000_000);
        b.price_cents = Some(2_050_000); // 50_000 off a 100_000 tolerance -> 0.5

        let breakdown = score_pair(&a, &b, &config, &registry);
        assert_eq!(breakdown.signals.len(), 2);
        // make_model identical -> 1.0; composite = (1.0*0.6 + 0.5*0.4) / 1.0
        assert!((breakdown.composite - 0.8).abs() < 1e-12);
    }

    #[test]
    fn no_available_signal_scores_zero() {
        let config = two_signal_config(0.0, 1.0);
        let registry = SignalRegistry::builtin();
        let breakdown = score_pair(&snapshot("a"), &snapshot("b"), &config, &registry);
        assert_eq!(breakdown.composite, 0.0);
        assert!(breakdown.signals.is_empty());
    }

    #[test]
    fn scoring_is_symmetric() {
        let config = DedupConfig::default();
        let registry = SignalRegistry::builtin();
        let mut a = snapshot("a");
        let mut b = snapshot("b");
        a.price_cents = Some(2_000_000);
        b.price_cents = Some(2_020_000);
        a.trim = Some("XLE".into());
        b.trim = Some("LE".into());
        a.image_hash = Some("ffab0912".into());
        b.image_hash = Some("ffab0913".into());

        let ab = score_pair(&a, &b, &config, &registry);
        let ba = score_pair(&b, &a, &config, &registry);
        assert_eq!(ab.composite, ba.composite);
        assert_eq!(ab.signals.len(), ba.signals.len());
    }

    #[test]
    fn zero_weight_signal_is_skipped() {
        let mut config = DedupConfig::default();
        config.weights.insert("make_model".into(), 0.0);
        let registry = SignalRegistry::builtin();
        let breakdown = score_pair(&snapshot("a"), &snapshot("b"), &config, &registry);
        assert!(breakdown.signals.iter().all(|s| s.name != "make_model"));
    }
}
