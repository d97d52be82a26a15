//! LDAP identity-remap backend (spec §4.4.1): a two-phase subtree search —
//! resolve the caller's `uidNumber`/`gidNumber` and a group-search key, then
//! resolve every group that key belongs to.
//!
//! The LDAP client is behind the narrow [`LdapClient`] trait so the
//! two-phase logic is unit-testable without a network LDAP server (spec
//! §9's design note). [`Ldap3ClientFactory`] is the production
//! implementation, backed by the `ldap3` crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::IdmapError;
use crate::config::{keys, ConfigSource};

/// One LDAP search result: its DN plus the requested attribute values.
#[derive(Debug, Clone, Default)]
pub struct LdapEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Requested attribute values, keyed by attribute name.
    pub attrs: HashMap<String, Vec<String>>,
}

/// The minimal LDAP operations the two-phase lookup needs.
#[async_trait]
pub trait LdapClient: Send + Sync {
    /// Anonymous bind (`binddn`/`password` both `None`) or simple bind.
    async fn simple_bind(
        &mut self,
        binddn: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), IdmapError>;

    /// A subtree search under `base_dn` matching `filter`, requesting
    /// `attrs`.
    async fn search_subtree(
        &mut self,
        base_dn: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<LdapEntry>, IdmapError>;

    /// Release the connection. Called on every exit path of
    /// [`LdapIdmapBackend::lookup`], success or failure.
    async fn unbind(&mut self);
}

/// Produces a freshly connected [`LdapClient`] for a URI — mirrors
/// `ldap_initialize` being invoked once per lookup.
#[async_trait]
pub trait LdapClientFactory: Send + Sync {
    /// Connect to `uri`. Does not bind.
    async fn connect(&self, uri: &str) -> Result<Box<dyn LdapClient>, IdmapError>;
}

/// Production [`LdapClientFactory`], backed by `ldap3` over TLS.
pub struct Ldap3ClientFactory;

#[async_trait]
impl LdapClientFactory for Ldap3ClientFactory {
    async fn connect(&self, uri: &str) -> Result<Box<dyn LdapClient>, IdmapError> {
        let (conn, ldap) =
            ldap3::LdapConnAsync::new(uri)
                .await
                .map_err(|e| IdmapError::Connect {
                    uri: uri.to_string(),
                    source: e.into(),
                })?;
        ldap3::drive!(conn);
        Ok(Box::new(Ldap3Client { ldap }))
    }
}

struct Ldap3Client {
    ldap: ldap3::Ldap,
}

#[async_trait]
impl LdapClient for Ldap3Client {
    async fn simple_bind(
        &mut self,
        binddn: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), IdmapError> {
        let (dn, pw) = (binddn.unwrap_or(""), password.unwrap_or(""));
        self.ldap
            .simple_bind(dn, pw)
            .await
            .and_then(ldap3::LdapResult::success)
            .map(|_| ())
            .map_err(|e| IdmapError::Bind(e.into()))
    }

    async fn search_subtree(
        &mut self,
        base_dn: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<LdapEntry>, IdmapError> {
        let (entries, _res) = self
            .ldap
            .search(base_dn, ldap3::Scope::Subtree, filter, attrs.to_vec())
            .await
            .and_then(ldap3::SearchResult::success)
            .map_err(|e| IdmapError::Search(e.into()))?;

        Ok(entries
            .into_iter()
            .map(|e| {
                let entry = ldap3::SearchEntry::construct(e);
                LdapEntry {
                    dn: entry.dn,
                    attrs: entry.attrs,
                }
            })
            .collect())
    }

    async fn unbind(&mut self) {
        let _ = self.ldap.unbind().await;
    }
}

/// The `ldap` identity-remap backend.
pub struct LdapIdmapBackend {
    config: Arc<dyn ConfigSource>,
    factory: Arc<dyn LdapClientFactory>,
}

impl LdapIdmapBackend {
    /// Build a backend reading connection parameters from `config` and
    /// connecting through `factory`.
    #[must_use]
    pub fn new(config: Arc<dyn ConfigSource>, factory: Arc<dyn LdapClientFactory>) -> Self {
        Self { config, factory }
    }

    fn require(&self, key: &str) -> Result<String, IdmapError> {
        self.config
            .get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| IdmapError::Config(key.to_string()))
    }

    /// The bind password: a path in `mds_idmap_ldap_secret` (trimmed
    /// trailing newline) takes precedence over the plaintext
    /// `mds_idmap_ldap_bindpw`.
    fn bind_password(&self) -> Result<String, IdmapError> {
        if let Some(path) = self.config.get(keys::LDAP_SECRET) {
            if !path.is_empty() {
                if let Ok(contents) = std::fs::read_to_string(&path) {
                    let trimmed = contents.trim_end_matches('\n').to_string();
                    if !trimmed.is_empty() {
                        return Ok(trimmed);
                    }
                }
            }
        }
        Ok(self
            .config
            .get(keys::LDAP_BINDPW)
            .unwrap_or_default()
            .trim_end_matches('\n')
            .to_string())
    }

    async fn lookup_inner(
        &self,
        client: &mut dyn LdapClient,
        name: &str,
    ) -> Result<Vec<u64>, IdmapError> {
        let binddn = self.config.get(keys::LDAP_BINDDN).unwrap_or_default();
        if binddn.is_empty() {
            client.simple_bind(None, None).await?;
        } else {
            let password = self.bind_password()?;
            client.simple_bind(Some(&binddn), Some(&password)).await?;
        }

        // Phase 1: resolve uidNumber, gidNumber, and the group-search key.
        let basedn = self.require(keys::LDAP_BASEDN)?;
        let idattr = self.require(keys::LDAP_IDATTR)?;
        let groupattr = self
            .config
            .get(keys::LDAP_GROUPATTR)
            .unwrap_or_else(|| "dn".to_string());

        let mut attrs: Vec<&str> = vec!["uidNumber", "gidNumber"];
        if groupattr != "dn" {
            attrs.push(groupattr.as_str());
        }
        let filter = format!("({idattr}={name})");
        let entries = client.search_subtree(&basedn, &filter, &attrs).await?;
        let entry = entries
            .first()
            .ok_or_else(|| IdmapError::NoEntry(name.to_string()))?;

        let uid =
            first_u64(entry, "uidNumber").ok_or_else(|| IdmapError::MissingIds(name.to_string()))?;
        let gid =
            first_u64(entry, "gidNumber").ok_or_else(|| IdmapError::MissingIds(name.to_string()))?;
        if uid == 0 || gid == 0 {
            return Err(IdmapError::MissingIds(name.to_string()));
        }

        let group_search_value = if groupattr == "dn" {
            entry.dn.clone()
        } else {
            entry
                .attrs
                .get(&groupattr)
                .and_then(|v| v.first())
                .cloned()
                .ok_or_else(|| IdmapError::MissingIds(name.to_string()))?
        };

        // Phase 2: resolve every group the search key belongs to.
        let groupdn = self.require(keys::LDAP_GROUPDN)?;
        let memberattr = self.require(keys::LDAP_MEMBERATTR)?;
        let group_filter = format!("({memberattr}={group_search_value})");
        let group_entries = client
            .search_subtree(&groupdn, &group_filter, &["gidNumber"])
            .await?;

        let mut supplementary: Vec<u64> = group_entries
            .iter()
            .filter_map(|e| e.attrs.get("gidNumber"))
            .flatten()
            .filter_map(|v| v.parse::<u64>().ok())
            .collect();
        supplementary.sort_unstable();
        supplementary.dedup();

        if supplementary.is_empty() {
            return Err(IdmapError::NoSupplementaryGids(name.to_string()));
        }

        debug!(caller = name, uid, gid, groups = supplementary.len(), "ldap lookup resolved");

        let mut ids = vec![uid, gid];
        ids.extend(supplementary);
        Ok(ids)
    }
}

#[async_trait]
impl super::IdmapBackend for LdapIdmapBackend {
    async fn lookup(&self, name: &str) -> Result<Vec<u64>, IdmapError> {
        let uri = self.require(keys::LDAP_URI)?;
        let mut client = self.factory.connect(&uri).await?;
        let result = self.lookup_inner(client.as_mut(), name).await;
        // Released on every exit path, success or failure, mirroring the
        // original's "free on every exit path" resource discipline.
        client.unbind().await;
        result
    }
}

fn first_u64(entry: &LdapEntry, attr: &str) -> Option<u64> {
    entry.attrs.get(attr)?.first()?.parse::<u64>().ok()
}
