use std::fmt;

#[derive(Debug)]
pub enum DedupError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad weights, non-increasing thresholds, etc.).
    ConfigValidation(String),
    /// A referenced listing, review item, or config version does not exist.
    NotFound(String),
    /// The requested transition conflicts with current state
    /// (e.g. resolving an already-terminal review item).
    Conflict(String),
    /// Backing store failure. Detection runs hitting this are retryable in full.
    Storage(String),
    /// CSV ingest error.
    Csv { record: String, message: String },
}

impl fmt::Display for DedupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
            Self::Csv { record, message } => {
                write!(f, "listing csv error at '{record}': {message}")
            }
        }
    }
}

impl std::error::Error for DedupError {}
