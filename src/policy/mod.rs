//! The policy model and the `is_capable` evaluation algorithm.
//!
//! A [`Policy`] is produced by [`Policy::parse`] and consulted by the host
//! metadata server through [`Policy::is_capable`] and
//! [`Policy::path_capable`]. See [`crate::idmap`] for the identity-remap
//! step that may run between the two.

mod format;
mod grammar;

use std::sync::Arc;

use bitflags::bitflags;

use crate::config::ConfigSource;

pub use grammar::ParseError;

/// A uid. Real uids are non-negative; [`UID_ANY`] is the "unconstrained"
/// sentinel.
pub type Uid = i64;
/// A gid.
pub type Gid = u64;

/// Sentinel meaning "this grant does not constrain the caller's uid".
pub const UID_ANY: Uid = -1;

bitflags! {
    /// The permission bits a [`Grant`]'s capability specification carries.
    ///
    /// `ALL` is a distinct bit, not the union of the others: it covers
    /// "everything, including future extensions" (spec §3), so every
    /// accessor short-circuits to `true` when it is set even though no
    /// other bit is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapSpec: u16 {
        /// Read (and, per the grammar, execute) access.
        const READ        = 1 << 0;
        /// Write access.
        const WRITE       = 1 << 1;
        /// Permission to set virtual xattrs.
        const SET_VXATTR  = 1 << 2;
        /// Permission to create/delete snapshots.
        const SNAPSHOT    = 1 << 3;
        /// Everything, including capability bits not yet defined.
        const ALL         = 1 << 4;
    }
}

impl CapSpec {
    /// The `r` grammar shape: read (and execute).
    pub const LETTER_R: CapSpec = CapSpec::READ;
    /// The `rw` grammar shape.
    pub const LETTER_RW: CapSpec = CapSpec::READ.union(CapSpec::WRITE);
    /// The `rwp` grammar shape.
    pub const LETTER_RWP: CapSpec = CapSpec::LETTER_RW.union(CapSpec::SET_VXATTR);
    /// The `rws` grammar shape.
    pub const LETTER_RWS: CapSpec = CapSpec::LETTER_RW.union(CapSpec::SNAPSHOT);
    /// The `rwps` grammar shape.
    pub const LETTER_RWPS: CapSpec = CapSpec::LETTER_RW
        .union(CapSpec::SET_VXATTR)
        .union(CapSpec::SNAPSHOT);

    /// True if reads are permitted (the spec bundles execute into this).
    #[must_use]
    pub fn allow_read(self) -> bool {
        self.contains(CapSpec::ALL) || self.contains(CapSpec::READ)
    }

    /// True if writes are permitted.
    #[must_use]
    pub fn allow_write(self) -> bool {
        self.contains(CapSpec::ALL) || self.contains(CapSpec::WRITE)
    }

    /// True if setting virtual xattrs is permitted.
    #[must_use]
    pub fn allow_set_vxattr(self) -> bool {
        self.contains(CapSpec::ALL) || self.contains(CapSpec::SET_VXATTR)
    }

    /// True if snapshot operations are permitted.
    #[must_use]
    pub fn allow_snapshot(self) -> bool {
        self.contains(CapSpec::ALL) || self.contains(CapSpec::SNAPSHOT)
    }

    /// True iff this is the unconstrained `*`/`all` spec.
    #[must_use]
    pub fn allow_all(self) -> bool {
        self.contains(CapSpec::ALL)
    }

    /// True iff this spec covers the requested read/write bits.
    #[must_use]
    pub fn allows(self, need_read: bool, need_write: bool) -> bool {
        self.allow_all()
            || ((!need_read || self.contains(CapSpec::READ))
                && (!need_write || self.contains(CapSpec::WRITE)))
    }
}

bitflags! {
    /// The operation bits a [`Request`] asks for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Mask: u16 {
        /// Read the inode's contents.
        const MAY_READ        = 1 << 0;
        /// Write the inode's contents.
        const MAY_WRITE       = 1 << 1;
        /// Traverse/execute the inode.
        const MAY_EXECUTE     = 1 << 2;
        /// Change the inode's owning uid.
        const MAY_CHOWN       = 1 << 3;
        /// Change the inode's owning gid.
        const MAY_CHGRP       = 1 << 4;
        /// Set a virtual xattr on the inode.
        const MAY_SET_VXATTR  = 1 << 5;
        /// Create or delete a snapshot at the inode.
        const MAY_SNAPSHOT    = 1 << 6;
    }
}

// POSIX mode bits, owner/group/other classes.
const S_IRUSR: u32 = 0o400;
const S_IWUSR: u32 = 0o200;
const S_IXUSR: u32 = 0o100;
const S_IRGRP: u32 = 0o040;
const S_IWGRP: u32 = 0o020;
const S_IXGRP: u32 = 0o010;
const S_IROTH: u32 = 0o004;
const S_IWOTH: u32 = 0o002;
const S_IXOTH: u32 = 0o001;

/// The constraint portion of a [`Grant`]: path prefix, uid, gids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Match {
    /// Path prefix, leading `/` already stripped. Empty means "any path".
    pub path: String,
    /// Constrained uid, or [`UID_ANY`].
    pub uid: Uid,
    /// Constrained gids, sorted ascending after parsing. Only relevant when
    /// `uid != UID_ANY`.
    pub gids: Vec<Gid>,
}

impl Match {
    /// An unconstrained match: any path, any uid.
    #[must_use]
    pub fn any() -> Self {
        Self {
            path: String::new(),
            uid: UID_ANY,
            gids: Vec::new(),
        }
    }

    /// True iff this match constrains neither path nor uid.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.path.is_empty() && self.uid == UID_ANY
    }

    /// Strip a leading `/`, the construction-time normalization the spec
    /// requires of `path=`.
    fn normalize_path(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }

    /// Cheap path-only test, ignoring uid/gid.
    #[must_use]
    pub fn match_path(&self, target_path: &str) -> bool {
        if self.path.is_empty() {
            return true;
        }
        if !target_path.starts_with(self.path.as_str()) {
            return false;
        }
        // if `path` doesn't already end in `/`, the target must continue
        // with a `/` so that path=foo doesn't match target=food.
        if target_path.len() > self.path.len() && !self.path.ends_with('/') {
            let next = target_path.as_bytes()[self.path.len()];
            if next != b'/' {
                return false;
            }
        }
        true
    }

    /// Full match: path, then uid, then gids.
    #[must_use]
    pub fn matches(
        &self,
        target_path: &str,
        caller_uid: Uid,
        caller_gid: Gid,
        caller_gid_list: Option<&[Gid]>,
    ) -> bool {
        if !self.match_path(target_path) {
            return false;
        }

        if self.uid == UID_ANY {
            return true;
        }
        if self.uid != caller_uid {
            return false;
        }
        if !self.gids.is_empty() {
            let gid_matched = self.gids.contains(&caller_gid)
                || caller_gid_list.is_some_and(|list| list.iter().any(|g| self.gids.contains(g)));
            if !gid_matched {
                return false;
            }
        }
        true
    }
}

/// One `allow` clause: a capability specification plus the match that
/// narrows which requests it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// What the grant permits.
    pub spec: CapSpec,
    /// Which requests the grant applies to.
    pub matcher: Match,
}

impl Grant {
    /// Construct a grant.
    #[must_use]
    pub fn new(spec: CapSpec, matcher: Match) -> Self {
        Self { spec, matcher }
    }
}

/// The evaluator's input. Not a persisted entity — built fresh by the host
/// for each authorization decision.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    /// Path of the inode being accessed, without a leading `/`.
    pub inode_path: &'a str,
    /// Owning uid of the inode.
    pub inode_uid: Uid,
    /// Owning gid of the inode.
    pub inode_gid: Gid,
    /// 9-bit POSIX permission bits of the inode.
    pub inode_mode: u32,
    /// The caller's uid.
    pub caller_uid: Uid,
    /// The caller's primary gid.
    pub caller_gid: Gid,
    /// The caller's supplementary gids, if known.
    pub caller_gid_list: Option<&'a [Gid]>,
    /// The operation bits being requested.
    pub mask: Mask,
    /// For chown: the uid being requested.
    pub new_uid: Uid,
    /// For chgrp: the gid being requested.
    pub new_gid: Gid,
}

/// The parsed, in-memory representation of a capability string.
///
/// Lifecycle: produced by [`Policy::parse`], optionally mutated exactly once
/// by [`Policy::update_ids`] (via [`crate::idmap`]), then read-only for all
/// subsequent [`Policy::is_capable`] calls. `set_allow_all` replaces the
/// grant list wholesale and may be called at any time.
///
/// `Policy` holds no internal lock. Per the concurrency discipline this
/// crate documents rather than enforces: callers should hold an exclusive
/// lock (e.g. `RwLock`) around parsing, `update_ids`, and `set_allow_all`,
/// and a shared lock around `is_capable`, `path_capable`, `allow_all`, and
/// formatting.
#[derive(Clone)]
pub struct Policy {
    pub(crate) grants: Vec<Grant>,
    pub(crate) idmap_required: bool,
    pub(crate) config: Option<Arc<dyn ConfigSource>>,
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("grants", &self.grants)
            .field("idmap_required", &self.idmap_required)
            .finish_non_exhaustive()
    }
}

impl Policy {
    /// Parse a capability string into a `Policy`.
    ///
    /// Pure — no I/O, no logging. Attach a config source afterwards with
    /// [`Policy::attach_config`] if [`Policy::update_ids`] will be used.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        grammar::parse(text)
    }

    /// Attach the configuration source `update_ids` will read
    /// (`mds_idmap_backend` and the LDAP connection parameters).
    pub fn attach_config(&mut self, config: Arc<dyn ConfigSource>) {
        self.config = Some(config);
    }

    /// The configuration source attached via [`Policy::attach_config`].
    pub(crate) fn config(&self) -> Option<&Arc<dyn ConfigSource>> {
        self.config.as_ref()
    }

    /// Replace the grant list wholesale with a single unconstrained `ALL`
    /// grant.
    pub fn set_allow_all(&mut self) {
        self.grants = vec![Grant::new(CapSpec::ALL, Match::any())];
    }

    /// True iff some grant is both an unconstrained match and an
    /// unconstrained (`ALL`) spec.
    #[must_use]
    pub fn allow_all(&self) -> bool {
        self.grants
            .iter()
            .any(|g| g.matcher.is_match_all() && g.spec.allow_all())
    }

    /// True iff the literal substring `idmap` appeared anywhere in the
    /// parsed text.
    #[must_use]
    pub fn idmap_required(&self) -> bool {
        self.idmap_required
    }

    /// The grants, in source order.
    #[must_use]
    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    /// Cheaper pre-check: true iff any grant's path-match succeeds for
    /// `path`, ignoring uid/gid and mode. Used to decide whether a path is
    /// even worth descending into before a full `is_capable` check.
    #[must_use]
    pub fn path_capable(&self, path: &str) -> bool {
        self.grants.iter().any(|g| g.matcher.match_path(path))
    }

    /// The authorization decision. Iterates grants in declaration order;
    /// the first grant that authorizes wins. Never fails — always produces
    /// a boolean.
    #[must_use]
    pub fn is_capable(&self, req: &Request<'_>) -> bool {
        tracing::trace!(
            path = req.inode_path,
            inode_owner = req.inode_uid,
            inode_gid = req.inode_gid,
            inode_mode = format_args!("{:o}", req.inode_mode),
            caller_uid = req.caller_uid,
            caller_gid = req.caller_gid,
            mask = format_args!("{:?}", req.mask),
            new_uid = req.new_uid,
            new_gid = req.new_gid,
            "is_capable"
        );

        for grant in &self.grants {
            if !grant.matcher.matches(
                req.inode_path,
                req.caller_uid,
                req.caller_gid,
                req.caller_gid_list,
            ) {
                continue;
            }
            let need_read = req.mask.intersects(Mask::MAY_READ | Mask::MAY_EXECUTE);
            let need_write = req.mask.intersects(Mask::MAY_WRITE);
            if !grant.spec.allows(need_read, need_write) {
                continue;
            }

            // Narrow down the caller's gids to those this grant vouches for.
            let mut effective_gids: Vec<Gid> = Vec::new();
            if grant.matcher.gids.contains(&req.caller_gid) {
                effective_gids.push(req.caller_gid);
            }
            if let Some(list) = req.caller_gid_list {
                effective_gids.extend(
                    list.iter()
                        .filter(|g| grant.matcher.gids.contains(g))
                        .copied(),
                );
            }
            effective_gids.sort_unstable();
            effective_gids.dedup();

            if req.mask.contains(Mask::MAY_SET_VXATTR) && !grant.spec.allow_set_vxattr() {
                continue;
            }
            if req.mask.contains(Mask::MAY_SNAPSHOT) && !grant.spec.allow_snapshot() {
                continue;
            }

            // Unqualified grant: an administrative "trust this client for
            // the matched path" that bypasses POSIX mode checks entirely.
            if grant.matcher.uid == UID_ANY {
                tracing::debug!(path = req.inode_path, "uid-any grant authorizes");
                return true;
            }

            if req.mask.contains(Mask::MAY_CHOWN)
                && (req.new_uid != req.caller_uid || req.inode_uid != req.caller_uid)
            {
                continue;
            }

            if req.mask.contains(Mask::MAY_CHGRP)
                && (req.inode_uid != req.caller_uid || !effective_gids.contains(&req.new_gid))
            {
                continue;
            }

            let (r_bit, w_bit, x_bit) = if req.inode_uid == req.caller_uid {
                (S_IRUSR, S_IWUSR, S_IXUSR)
            } else if effective_gids.contains(&req.inode_gid) {
                (S_IRGRP, S_IWGRP, S_IXGRP)
            } else {
                (S_IROTH, S_IWOTH, S_IXOTH)
            };

            let mode_ok = (!req.mask.contains(Mask::MAY_READ) || req.inode_mode & r_bit != 0)
                && (!req.mask.contains(Mask::MAY_WRITE) || req.inode_mode & w_bit != 0)
                && (!req.mask.contains(Mask::MAY_EXECUTE) || req.inode_mode & x_bit != 0);

            if mode_ok {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn policy(text: &str) -> Policy {
        Policy::parse(text).expect("parse should succeed")
    }

    // S1
    #[test]
    fn s1_parse_rw_path_uid_gids() {
        let p = policy("allow rw path=/foo uid=1000 gids=100,200");
        assert_eq!(p.grants().len(), 1);
        let g = &p.grants()[0];
        assert_eq!(g.spec, CapSpec::LETTER_RW);
        assert_eq!(g.matcher.path, "foo");
        assert_eq!(g.matcher.uid, 1000);
        assert_eq!(g.matcher.gids, vec![100, 200]);
    }

    // S2
    #[test]
    fn s2_legacy_allow_is_rwps_not_all() {
        let p = policy("allow");
        assert_eq!(p.grants().len(), 1);
        assert_eq!(p.grants()[0].spec, CapSpec::LETTER_RWPS);
        assert!(p.grants()[0].matcher.is_match_all());
        assert!(!p.allow_all());
    }

    fn s1_policy() -> Policy {
        policy("allow rw path=/foo uid=1000 gids=100,200")
    }

    // S3
    #[test]
    fn s3_owner_read_write_authorized() {
        let p = s1_policy();
        let req = Request {
            inode_path: "foo/bar",
            inode_uid: 1000,
            inode_gid: 100,
            inode_mode: 0o600,
            caller_uid: 1000,
            caller_gid: 100,
            caller_gid_list: None,
            mask: Mask::MAY_READ | Mask::MAY_WRITE,
            new_uid: 0,
            new_gid: 0,
        };
        assert!(p.is_capable(&req));
    }

    // S4
    #[test]
    fn s4_uid_mismatch_rejects() {
        let p = s1_policy();
        let req = Request {
            inode_path: "foo/bar",
            inode_uid: 1000,
            inode_gid: 100,
            inode_mode: 0o600,
            caller_uid: 1001,
            caller_gid: 100,
            caller_gid_list: None,
            mask: Mask::MAY_READ | Mask::MAY_WRITE,
            new_uid: 0,
            new_gid: 0,
        };
        assert!(!p.is_capable(&req));
    }

    // S5
    #[test]
    fn s5_prefix_boundary_rejects_food() {
        let p = s1_policy();
        let req = Request {
            inode_path: "food/x",
            inode_uid: 1000,
            inode_gid: 100,
            inode_mode: 0o600,
            caller_uid: 1000,
            caller_gid: 100,
            caller_gid_list: None,
            mask: Mask::MAY_READ | Mask::MAY_WRITE,
            new_uid: 0,
            new_gid: 0,
        };
        assert!(!p.is_capable(&req));
    }

    // S6
    #[test]
    fn s6_all_spec_allows_vxattr_rw_does_not() {
        let all = policy("allow * path=/");
        let req = Request {
            inode_path: "anything",
            inode_uid: 0,
            inode_gid: 0,
            inode_mode: 0,
            caller_uid: 5,
            caller_gid: 5,
            caller_gid_list: None,
            mask: Mask::MAY_SET_VXATTR,
            new_uid: 0,
            new_gid: 0,
        };
        assert!(all.is_capable(&req));

        let rw = policy("allow rw path=/");
        assert!(!rw.is_capable(&req));
    }

    // S7
    #[test]
    fn s7_chown_only_to_self_by_owner() {
        let p = policy("allow rw uid=1000");
        let mut req = Request {
            inode_path: "x",
            inode_uid: 1000,
            inode_gid: 100,
            inode_mode: 0o600,
            caller_uid: 1000,
            caller_gid: 100,
            caller_gid_list: None,
            mask: Mask::MAY_CHOWN | Mask::MAY_WRITE,
            new_uid: 1000,
            new_gid: 0,
        };
        assert!(p.is_capable(&req));
        req.new_uid = 1001;
        assert!(!p.is_capable(&req));
    }

    #[test]
    fn set_allow_all_is_idempotent_unconstrained() {
        let mut p = policy("allow r path=/private uid=5");
        p.set_allow_all();
        assert!(p.allow_all());
        let req = Request {
            inode_path: "anything/at/all",
            inode_uid: 999,
            inode_gid: 999,
            inode_mode: 0,
            caller_uid: 1,
            caller_gid: 1,
            caller_gid_list: None,
            mask: Mask::MAY_READ | Mask::MAY_WRITE | Mask::MAY_SNAPSHOT | Mask::MAY_SET_VXATTR,
            new_uid: 1,
            new_gid: 1,
        };
        assert!(p.is_capable(&req));
    }

    #[test]
    fn path_capable_ignores_uid_and_mode() {
        let p = policy("allow r path=/secret uid=42");
        assert!(p.path_capable("secret/file"));
        assert!(!p.path_capable("other/file"));
    }

    #[test]
    fn short_circuit_matches_any_authorizing_grant() {
        let p = policy("allow r path=/a uid=1; allow rw path=/a uid=2");
        let req = Request {
            inode_path: "a/f",
            inode_uid: 2,
            inode_gid: 2,
            inode_mode: 0o600,
            caller_uid: 2,
            caller_gid: 2,
            caller_gid_list: None,
            mask: Mask::MAY_WRITE,
            new_uid: 0,
            new_gid: 0,
        };
        assert!(p.is_capable(&req));
    }

    #[test]
    fn chgrp_requires_new_gid_in_effective_gids() {
        let p = policy("allow rw uid=1000 gids=200,300");
        let mut req = Request {
            inode_path: "x",
            inode_uid: 1000,
            inode_gid: 200,
            inode_mode: 0o660,
            caller_uid: 1000,
            caller_gid: 200,
            caller_gid_list: None,
            mask: Mask::MAY_CHGRP,
            new_uid: 0,
            new_gid: 300,
        };
        assert!(p.is_capable(&req));
        req.new_gid = 999;
        assert!(!p.is_capable(&req));
    }
}
