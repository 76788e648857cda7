use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DedupError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Tunable weights and thresholds for one scoring policy.
///
/// Configs are immutable values: publishing a change creates a new version,
/// and every persisted match records the version that scored it, so historical
/// decisions stay reproducible after thresholds move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub name: String,
    /// Assigned by the config store on publish; 0 for an unpublished draft.
    #[serde(default)]
    pub version: u64,
    /// Signal name -> weight. Unknown names are allowed and simply never fire.
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub tolerances: Tolerances,
    /// Five strictly increasing cut points partitioning [0,1] into the six
    /// confidence bands, very_low through exact.
    #[serde(default = "default_bands")]
    pub bands: Vec<f64>,
    /// Scores at or above this auto-confirm without review.
    #[serde(default = "default_auto_confirm")]
    pub auto_confirm: f64,
    /// Scores below this are recorded as rejected and never enqueued.
    #[serde(default = "default_review_floor")]
    pub review_floor: f64,
    /// Hard cap on candidates scored per detect call.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

/// Zero points for the linear similarity falloff of the numeric signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tolerances {
    #[serde(default = "default_price_tolerance")]
    pub price_cents: i64,
    #[serde(default = "default_mileage_tolerance")]
    pub mileage_km: i64,
    #[serde(default = "default_year_tolerance")]
    pub year: i64,
    #[serde(default = "default_location_tolerance")]
    pub location_km: f64,
}

fn default_bands() -> Vec<f64> {
    vec![0.3, 0.5, 0.7, 0.85, 0.95]
}
fn default_auto_confirm() -> f64 {
    0.9
}
fn default_review_floor() -> f64 {
    0.4
}
fn default_max_candidates() -> usize {
    50
}
fn default_price_tolerance() -> i64 {
    100_000
}
fn default_mileage_tolerance() -> i64 {
    5_000
}
fn default_year_tolerance() -> i64 {
    1
}
fn default_location_tolerance() -> f64 {
    50.0
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            price_cents: default_price_tolerance(),
            mileage_km: default_mileage_tolerance(),
            year: default_year_tolerance(),
            location_km: default_location_tolerance(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert("make_model".to_string(), 0.30);
        weights.insert("trim".to_string(), 0.05);
        weights.insert("year".to_string(), 0.10);
        weights.insert("price".to_string(), 0.15);
        weights.insert("mileage".to_string(), 0.10);
        weights.insert("location".to_string(), 0.10);
        weights.insert("image".to_string(), 0.20);
        Self {
            name: "default".to_string(),
            version: 0,
            weights,
            tolerances: Tolerances::default(),
            bands: default_bands(),
            auto_confirm: default_auto_confirm(),
            review_floor: default_review_floor(),
            max_candidates: default_max_candidates(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl DedupConfig {
    pub fn from_toml(input: &str) -> Result<Self, DedupError> {
        let config: DedupConfig =
            toml::from_str(input).map_err(|e| DedupError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DedupError> {
        if self.weights.is_empty() {
            return Err(DedupError::ConfigValidation(
                "at least one signal weight is required".into(),
            ));
        }
        for (name, w) in &self.weights {
            if !w.is_finite() || *w < 0.0 {
                return Err(DedupError::ConfigValidation(format!(
                    "weight for '{name}' must be a non-negative finite number, got {w}"
                )));
            }
        }
        if !self.weights.values().any(|w| *w > 0.0) {
            return Err(DedupError::ConfigValidation(
                "at least one signal weight must be positive".into(),
            ));
        }

        if self.bands.len() != 5 {
            return Err(DedupError::ConfigValidation(format!(
                "exactly 5 band cut points are required, got {}",
                self.bands.len()
            )));
        }
        let mut prev = 0.0_f64;
        for (i, b) in self.bands.iter().enumerate() {
            if !b.is_finite() || *b <= 0.0 || *b >= 1.0 {
                return Err(DedupError::ConfigValidation(format!(
                    "band cut point {i} must lie strictly inside (0, 1), got {b}"
                )));
            }
            if i > 0 && *b <= prev {
                return Err(DedupError::ConfigValidation(format!(
                    "band cut points must be strictly increasing ({prev} then {b})"
                )));
            }
            prev = *b;
        }

        // Auto-confirm must not fire below the very_high floor; it may sit
        // below the exact cut (a very_high score can still auto-confirm).
        let very_high_floor = self.bands[3];
        if !self.auto_confirm.is_finite()
            || self.auto_confirm < very_high_floor
            || self.auto_confirm > 1.0
        {
            return Err(DedupError::ConfigValidation(format!(
                "auto_confirm must lie in [{very_high_floor}, 1], got {}",
                self.auto_confirm
            )));
        }

        if !self.review_floor.is_finite()
            || self.review_floor < 0.0
            || self.review_floor >= self.auto_confirm
        {
            return Err(DedupError::ConfigValidation(format!(
                "review_floor must lie in [0, auto_confirm), got {}",
                self.review_floor
            )));
        }

        if self.tolerances.price_cents < 0
            || self.tolerances.mileage_km < 0
            || self.tolerances.year < 0
            || self.tolerances.location_km < 0.0
        {
            return Err(DedupError::ConfigValidation(
                "tolerances must be non-negative".into(),
            ));
        }

        if self.max_candidates == 0 {
            return Err(DedupError::ConfigValidation(
                "max_candidates must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Weight for a signal name, zero when unconfigured.
    pub fn weight(&self, name: &str) -> f64 {
        self.weights.get(name).copied().unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
