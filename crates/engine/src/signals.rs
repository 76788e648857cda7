//! Signal calculators: pure, stateless comparators over two listing snapshots.
//!
//! Every calculator returns `Option<f64>`: `Some(similarity)` in [0,1] when a
//! real comparison happened, `None` when an input is missing. `None` is not a
//! zero; the aggregator excludes unavailable signals and renormalizes weights
//! over the rest.

use crate::config::DedupConfig;
use crate::model::ListingSnapshot;

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Case-fold and collapse internal whitespace.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Character-level edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut matrix = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        matrix[0][j] = j;
    }

    for i in 0..a.len() {
        for j in 0..b.len() {
            let cost = if a[i] == b[j] { 0 } else { 1 };
            matrix[i + 1][j + 1] = (matrix[i][j] + cost)
                .min(matrix[i + 1][j] + 1)
                .min(matrix[i][j + 1] + 1);
        }
    }
    matrix[a.len()][b.len()]
}

/// Normalized edit-distance similarity over case-folded, trimmed text.
/// Empty vs empty is 1.0; empty vs non-empty is 0.0.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    1.0 - (levenshtein(&a, &b) as f64 / max_len as f64)
}

// ---------------------------------------------------------------------------
// Numeric + location
// ---------------------------------------------------------------------------

/// Linear falloff: 1.0 at zero difference, 0.0 at or beyond `tolerance`.
/// Monotonic non-increasing in |a - b|. Zero tolerance degenerates to an
/// exact-match indicator.
pub fn numeric_similarity(a: f64, b: f64, tolerance: f64) -> f64 {
    let diff = (a - b).abs();
    if tolerance <= 0.0 {
        return if diff == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - diff / tolerance).clamp(0.0, 1.0)
}

/// Great-circle distance in kilometers (haversine).
pub fn haversine_km(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let lat1 = lat_a.to_radians();
    let lat2 = lat_b.to_radians();
    let dlat = (lat_b - lat_a).to_radians();
    let dlon = (lon_b - lon_a).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Distance-based similarity with the same linear falloff as
/// [`numeric_similarity`], with `radius_km` as the zero point.
pub fn location_similarity(
    lat_a: f64,
    lon_a: f64,
    lat_b: f64,
    lon_b: f64,
    radius_km: f64,
) -> f64 {
    numeric_similarity(haversine_km(lat_a, lon_a, lat_b, lon_b), 0.0, radius_km)
}

// ---------------------------------------------------------------------------
// Image hashes
// ---------------------------------------------------------------------------

/// Similarity of two fixed-length perceptual hash strings:
/// 1 - (positional symbol distance + length penalty) / max_len.
///
/// An empty or whitespace-only hash scores 0.0 outright: the image claims to
/// exist but cannot be compared, and a match on no evidence is never rewarded.
pub fn image_hash_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim();
    let b = b.trim();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    let common = a.len().min(b.len());

    let mut distance = a.len().abs_diff(b.len());
    for i in 0..common {
        if a[i] != b[i] {
            distance += 1;
        }
    }

    (1.0 - distance as f64 / max_len as f64).max(0.0)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub type SignalFn = fn(&ListingSnapshot, &ListingSnapshot, &DedupConfig) -> Option<f64>;

pub struct SignalDef {
    pub name: &'static str,
    pub compare: SignalFn,
}

/// Dispatch table from signal name to comparator, built once at startup.
/// New signal types are added by registering another entry.
pub struct SignalRegistry {
    defs: Vec<SignalDef>,
}

impl SignalRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self { defs: Vec::new() };
        registry.register("make_model", signal_make_model);
        registry.register("trim", signal_trim);
        registry.register("year", signal_year);
        registry.register("price", signal_price);
        registry.register("mileage", signal_mileage);
        registry.register("location", signal_location);
        registry.register("image", signal_image);
        registry
    }

    pub fn register(&mut self, name: &'static str, compare: SignalFn) {
        self.defs.push(SignalDef { name, compare });
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalDef> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn combined_make_model(l: &ListingSnapshot) -> Option<String> {
    match (&l.make, &l.model) {
        (None, None) => None,
        (make, model) => {
            let mut parts = Vec::new();
            if let Some(m) = make {
                parts.push(m.as_str());
            }
            if let Some(m) = model {
                parts.push(m.as_str());
            }
            Some(parts.join(" "))
        }
    }
}

fn signal_make_model(a: &ListingSnapshot, b: &ListingSnapshot, _: &DedupConfig) -> Option<f64> {
    let a = combined_make_model(a)?;
    let b = combined_make_model(b)?;
    Some(string_similarity(&a, &b))
}

fn signal_trim(a: &ListingSnapshot, b: &ListingSnapshot, _: &DedupConfig) -> Option<f64> {
    match (&a.trim, &b.trim) {
        (Some(a), Some(b)) => Some(string_similarity(a, b)),
        _ => None,
    }
}

fn signal_year(a: &ListingSnapshot, b: &ListingSnapshot, config: &DedupConfig) -> Option<f64> {
    match (a.year, b.year) {
        (Some(a), Some(b)) => Some(numeric_similarity(
            a as f64,
            b as f64,
            config.tolerances.year as f64,
        )),
        _ => None,
    }
}

fn signal_price(a: &ListingSnapshot, b: &ListingSnapshot, config: &DedupConfig) -> Option<f64> {
    match (a.price_cents, b.price_cents) {
        (Some(a), Some(b)) => Some(numeric_similarity(
            a as f64,
            b as f64,
            config.tolerances.price_cents as f64,
        )),
        _ => None,
    }
}

fn signal_mileage(a: &ListingSnapshot, b: &ListingSnapshot, config: &DedupConfig) -> Option<f64> {
    match (a.mileage_km, b.mileage_km) {
        (Some(a), Some(b)) => Some(numeric_similarity(
            a as f64,
            b as f64,
            config.tolerances.mileage_km as f64,
        )),
        _ => None,
    }
}

fn signal_location(a: &ListingSnapshot, b: &ListingSnapshot, config: &DedupConfig) -> Option<f64> {
    match (a.latitude, a.longitude, b.latitude, b.longitude) {
        (Some(lat_a), Some(lon_a), Some(lat_b), Some(lon_b)) => Some(location_similarity(
            lat_a,
            lon_a,
            lat_b,
            lon_b,
            config.tolerances.location_km,
        )),
        _ => {
            // Coordinates missing: an equal postal code is still positive
            // evidence; unequal codes say nothing about distance.
            match (&a.postal_code, &b.postal_code) {
                (Some(pa), Some(pb)) if normalize_text(pa) == normalize_text(pb) => Some(1.0),
                _ => None,
            }
        }
    }
}

fn signal_image(a: &ListingSnapshot, b: &ListingSnapshot, _: &DedupConfig) -> Option<f64> {
    match (&a.image_hash, &b.image_hash) {
        (Some(a), Some(b)) => Some(image_hash_similarity(a, b)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
