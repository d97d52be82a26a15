//! Configuration lookup.
//!
//! Stands in for the metadata server's process-wide configuration store
//! (spec: `config.get(key) -> string`). The evaluator and grammar never
//! touch this; only [`crate::idmap`] reads it, to resolve the ordered
//! backend list and the LDAP connection parameters.

use std::collections::HashMap;
use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;

use crate::{Error, Result};

/// Configuration keys consumed by the identity-remap subsystem.
pub mod keys {
    /// Comma-separated, ordered list of identity-remap backend names.
    pub const IDMAP_BACKEND: &str = "mds_idmap_backend";
    /// LDAP server URI (`ldap://` or `ldaps://`).
    pub const LDAP_URI: &str = "mds_idmap_ldap_uri";
    /// Bind DN. Empty means anonymous bind.
    pub const LDAP_BINDDN: &str = "mds_idmap_ldap_binddn";
    /// Plaintext bind password, used if `LDAP_SECRET` is unset or unreadable.
    pub const LDAP_BINDPW: &str = "mds_idmap_ldap_bindpw";
    /// Path to a file containing the bind password.
    pub const LDAP_SECRET: &str = "mds_idmap_ldap_secret";
    /// Base DN for the user search.
    pub const LDAP_BASEDN: &str = "mds_idmap_ldap_basedn";
    /// Base DN for the group search.
    pub const LDAP_GROUPDN: &str = "mds_idmap_ldap_groupdn";
    /// Attribute to match the caller name against in the user search.
    pub const LDAP_IDATTR: &str = "mds_idmap_ldap_idattr";
    /// Attribute (or the literal `"dn"`) used to key the group search.
    pub const LDAP_GROUPATTR: &str = "mds_idmap_ldap_groupattr";
    /// Attribute to match the group-search key against in the group search.
    pub const LDAP_MEMBERATTR: &str = "mds_idmap_ldap_memberattr";
}

/// A key-value configuration lookup.
///
/// Implemented by whatever the host application's process-wide config store
/// actually is; this crate only ever calls [`ConfigSource::get`].
pub trait ConfigSource: Send + Sync {
    /// Look up a configuration value by key. Returns `None` if unset.
    fn get(&self, key: &str) -> Option<String>;

    /// Look up a required configuration value, erroring with the key name
    /// if absent.
    fn require(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| Error::Config(format!("missing required config key `{key}`")))
    }
}

/// An in-memory [`ConfigSource`], for tests and for embedding this crate in
/// a host that already holds its configuration in memory.
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    /// Build an empty `MapConfig`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key, builder-style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Insert or overwrite a key in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigSource for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Raw config shape loaded from YAML + environment, flattened to strings for
/// [`ConfigSource::get`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    #[serde(flatten)]
    values: HashMap<String, String>,
}

/// A [`ConfigSource`] layering a YAML file with `MDS_`-prefixed environment
/// variables, environment taking precedence. Grounded in the host
/// application's own `figment`-based `Config::load`.
#[derive(Debug, Clone)]
pub struct FigmentConfig {
    values: HashMap<String, String>,
}

impl FigmentConfig {
    /// Load configuration from an optional YAML file plus the process
    /// environment (`MDS_*`, lower-cased to match the key names in
    /// [`keys`]).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("MDS_").map(|k| k.as_str().to_lowercase().into()));

        let raw: RawConfig = figment
            .extract()
            .map_err(|e| Error::Config(format!("failed to load configuration: {e}")))?;

        Ok(Self { values: raw.values })
    }
}

impl ConfigSource for FigmentConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use figment::Jail;
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn map_config_round_trips() {
        let cfg = MapConfig::new().with("mds_idmap_backend", "ldap,key");
        assert_eq!(cfg.get("mds_idmap_backend").as_deref(), Some("ldap,key"));
        assert_eq!(cfg.get("missing"), None);
    }

    #[test]
    fn map_config_require_errors_on_missing() {
        let cfg = MapConfig::new();
        assert!(cfg.require("mds_idmap_backend").is_err());
    }

    #[test]
    fn figment_config_loads_values_from_a_yaml_file() {
        let mut file = NamedTempFile::new().expect("create temp config file");
        writeln!(file, "mds_idmap_backend: ldap,key").unwrap();
        writeln!(file, "mds_idmap_ldap_uri: ldap://directory.example.com").unwrap();

        let cfg = FigmentConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.get("mds_idmap_backend").as_deref(), Some("ldap,key"));
        assert_eq!(
            cfg.get("mds_idmap_ldap_uri").as_deref(),
            Some("ldap://directory.example.com")
        );
    }

    #[test]
    fn figment_config_env_overrides_file() {
        // `Jail` sandboxes the working directory and environment for the
        // closure's duration and restores both on exit — no real process
        // env mutation, so no `unsafe` is needed here.
        Jail::expect_with(|jail| {
            jail.create_file("nscap.yaml", "mds_idmap_backend: ldap,key\n")?;
            jail.set_env("MDS_MDS_IDMAP_BACKEND", "key");

            let cfg = FigmentConfig::load(Some(Path::new("nscap.yaml"))).unwrap();
            assert_eq!(cfg.get("mds_idmap_backend").as_deref(), Some("key"));
            Ok(())
        });
    }
}
