//! The `key` identity-remap backend: a no-op placeholder (spec §4.4).
//!
//! Selecting `key` in `mds_idmap_backend` acknowledges that the caller's
//! identity arrived already trusted (e.g. from the session key exchange)
//! and performs no lookup of its own.

use async_trait::async_trait;
use tracing::debug;

use super::{IdmapBackend, IdmapError};

/// No-op backend selected by the `key` entry.
pub struct KeyIdmapBackend;

#[async_trait]
impl IdmapBackend for KeyIdmapBackend {
    async fn lookup(&self, name: &str) -> Result<Vec<u64>, IdmapError> {
        debug!(caller = name, backend = "key", "backend selected = key");
        Ok(Vec::new())
    }
}
