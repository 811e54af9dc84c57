//! Fatal error conditions.
//!
//! Everything else the core encounters — opaque IR constructs, missing
//! definitions, escaping value uses — is handled in place (recorded as
//! "unresolved", dropped, or widened) and never surfaces as an `Err`. Only
//! the configuration-loading conditions below are fatal.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read `{path}`")]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed trace line {line_no}: `{text}`")]
    MalformedTraceLine { line_no: usize, text: String },

    #[error("MAX_PHASE_CG must be >= 1, got {value}")]
    InvalidPhaseBound { value: i64 },
}
