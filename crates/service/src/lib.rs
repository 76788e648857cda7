//! `lotmatch-service` — the stateful layer over the pure engine.
//!
//! `Detector` orchestrates candidate generation, scoring, classification, and
//! persistence for one listing at a time. `ReviewQueue` serves and resolves
//! pending matches, `AccuracyTracker` recomputes precision and recall per
//! config version, and `ConfigManager` publishes validated config versions.

pub mod config_admin;
pub mod detector;
pub mod metrics;
pub mod review;

pub use config_admin::ConfigManager;
pub use detector::{Detector, SCORE_EPSILON};
pub use metrics::AccuracyTracker;
pub use review::ReviewQueue;
