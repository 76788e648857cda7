//! CLI Exit Code Registry
//!
//! Single source of truth for all CLI exit codes. Exit codes are part of the
//! shell contract — ingestion pipelines branch on them.
//!
//! | Code | Meaning                                          |
//! |------|--------------------------------------------------|
//! | 0    | Success, no duplicates auto-confirmed            |
//! | 1    | General error (unspecified)                      |
//! | 2    | Usage error (bad args, unreadable file)          |
//! | 3    | Duplicates auto-confirmed                        |
//! | 4    | Review required (no auto-confirms)               |
//! | 5    | Invalid detection config                         |
//! | 6    | Storage error                                    |

/// Success - command completed, nothing flagged.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing or unreadable input files.
pub const EXIT_USAGE: u8 = 2;

/// Detection auto-confirmed at least one duplicate.
/// Like `grep(1)` finding a match, this is signal, not failure.
pub const EXIT_DUPLICATES: u8 = 3;

/// Detection queued items for human review and auto-confirmed nothing.
pub const EXIT_REVIEW: u8 = 4;

/// Config failed validation.
pub const EXIT_INVALID_CONFIG: u8 = 5;

/// Storage backend failure.
pub const EXIT_STORAGE: u8 = 6;

use lotmatch_engine::DedupError;

/// Map an engine error to its exit code.
pub fn error_exit_code(err: &DedupError) -> u8 {
    match err {
        DedupError::ConfigParse(_) | DedupError::ConfigValidation(_) => EXIT_INVALID_CONFIG,
        DedupError::NotFound(_) | DedupError::Csv { .. } => EXIT_USAGE,
        DedupError::Conflict(_) => EXIT_ERROR,
        DedupError::Storage(_) => EXIT_STORAGE,
    }
}
