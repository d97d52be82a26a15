//! Error types for the capability engine.

use thiserror::Error;

use crate::idmap::IdmapError;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level errors surfaced to callers outside the evaluator.
///
/// `Policy::is_capable` itself never returns `Error` — it always produces a
/// plain boolean decision (spec: the evaluator never fails). This type
/// covers the subsystems around it: parsing, configuration, and identity
/// remap.
#[derive(Error, Debug)]
pub enum Error {
    /// The capability grammar could not be parsed.
    #[error("capability parse failed: {0}")]
    Parse(String),

    /// A configuration key required by the identity-remap subsystem was
    /// missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every configured identity-remap backend failed.
    #[error("identity remap failed: {0}")]
    Idmap(#[from] IdmapError),

    /// IO error (reading a bind-password file, a config file, ...).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
