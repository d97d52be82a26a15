//! Identity remap: rewrites the caller's `(uid, gids…)` by querying an
//! external directory before evaluation (spec §4.4).
//!
//! [`update_ids`] reads the ordered backend list from
//! `mds_idmap_backend`, tries each in turn, and on the first backend that
//! resolves a non-empty id list, overwrites every grant's `uid`/`gids` and
//! returns. If every backend fails, the policy's grants are left untouched
//! and `is_valid` comes back `false` — there is no "falls off the end"
//! path (spec §9).

mod key;
mod ldap;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{keys, ConfigSource};
use crate::policy::{Gid, Policy};

pub use key::KeyIdmapBackend;
pub use ldap::{LdapClient, LdapEntry, LdapIdmapBackend, Ldap3ClientFactory};

/// A single identity-remap backend failure. Logged and non-fatal: the next
/// configured backend is still tried.
#[derive(Error, Debug)]
pub enum IdmapError {
    /// Could not establish an LDAP connection.
    #[error("ldap_initialize failed for {uri}: {source}")]
    Connect {
        /// The URI that failed to connect.
        uri: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// Bind (anonymous or simple) failed.
    #[error("ldap bind failed: {0}")]
    Bind(anyhow::Error),

    /// A subtree search failed outright.
    #[error("ldap search failed: {0}")]
    Search(anyhow::Error),

    /// No LDAP entry matched the user search filter.
    #[error("no LDAP entry found for caller `{0}`")]
    NoEntry(String),

    /// The matched entry was missing `uidNumber`/`gidNumber`, or one of
    /// them was zero.
    #[error("caller `{0}` has no usable uidNumber/gidNumber")]
    MissingIds(String),

    /// Phase 2 (group search) returned no supplementary gids. Spec §9:
    /// this replaces the original's incoherent pointer-vs-integer check
    /// with an explicit "at least one supplementary gid required" rule.
    #[error("caller `{0}` resolved no supplementary groups")]
    NoSupplementaryGids(String),

    /// A required configuration key was missing.
    #[error("missing configuration: {0}")]
    Config(String),
}

/// A pluggable identity-remap backend, selected by name from
/// `mds_idmap_backend`.
#[async_trait]
pub trait IdmapBackend: Send + Sync {
    /// Resolve `name` to `[uid, primary_gid, supplementary_gids...]`.
    /// An `Ok` empty vec means "this backend has no opinion" (e.g. the
    /// `key` placeholder); callers should move on to the next backend
    /// exactly as they would for an `Err`.
    async fn lookup(&self, name: &str) -> Result<Vec<u64>, IdmapError>;
}

/// Build the default backend registry (`ldap`, `key`) over the given
/// config source.
fn default_backends(config: Arc<dyn ConfigSource>) -> BTreeMap<String, Box<dyn IdmapBackend>> {
    let mut registry: BTreeMap<String, Box<dyn IdmapBackend>> = BTreeMap::new();
    registry.insert(
        "ldap".to_string(),
        Box::new(LdapIdmapBackend::new(
            config.clone(),
            Arc::new(Ldap3ClientFactory),
        )),
    );
    registry.insert("key".to_string(), Box::new(KeyIdmapBackend));
    registry
}

/// Parse the `mds_idmap_backend` config value into an ordered, whitespace
/// stripped backend name list.
fn parse_backend_list(raw: &str) -> Vec<String> {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve `name` through the configured backend chain and, on success,
/// overwrite every grant's `uid`/`gids` in place. Returns the resolved
/// `[uid, gid, supplementary_gids...]` list and whether the remap
/// succeeded.
pub async fn update_ids(policy: &mut Policy, name: &str) -> (Vec<u64>, bool) {
    let Some(config) = policy.config().cloned() else {
        warn!("update_ids called without an attached config source");
        return (Vec::new(), false);
    };

    let Some(backend_value) = config.get(keys::IDMAP_BACKEND) else {
        warn!(key = keys::IDMAP_BACKEND, "idmap backend list not configured");
        return (Vec::new(), false);
    };

    let backends = default_backends(config);
    for backend_name in parse_backend_list(&backend_value) {
        let Some(backend) = backends.get(backend_name.as_str()) else {
            warn!(backend = %backend_name, "unknown idmap backend, skipping");
            continue;
        };

        match backend.lookup(name).await {
            Ok(ids) if !ids.is_empty() => {
                apply_ids(policy, &ids);
                log_resolved(name, &ids);
                return (ids, true);
            }
            Ok(_) => {
                debug!(backend = %backend_name, "backend had no result, trying next");
            }
            Err(e) => {
                warn!(backend = %backend_name, error = %e, "idmap lookup failure, trying next backend");
            }
        }
    }

    (Vec::new(), false)
}

fn apply_ids(policy: &mut Policy, ids: &[u64]) {
    let uid = ids[0] as crate::policy::Uid;
    let supplementary: Vec<Gid> = ids.iter().skip(2).copied().collect();
    for grant in &mut policy.grants {
        grant.matcher.uid = uid;
        grant.matcher.gids = supplementary.clone();
    }
}

fn log_resolved(name: &str, ids: &[u64]) {
    debug!(caller = name, uid = ids[0], "resolved client uid");
    if let Some(gid) = ids.get(1) {
        debug!(caller = name, gid, "resolved client primary gid");
    }
    debug!(caller = name, gids = ?&ids[2.min(ids.len())..], "resolved client supplementary gids");
}
