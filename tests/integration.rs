//! Black-box coverage of the §8 scenarios and universal properties, driven
//! entirely through the crate's public API.

use nscap::policy::{CapSpec, Mask, Policy, Request, UID_ANY};
use pretty_assertions::assert_eq;

fn policy(text: &str) -> Policy {
    Policy::parse(text).expect("parse should succeed")
}

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

#[test]
fn s2_legacy_allow_shortcut() {
    let p = policy("allow");
    assert_eq!(p.grants().len(), 1);
    assert_eq!(p.grants()[0].spec, CapSpec::LETTER_RWPS);
    assert!(!p.allow_all());
}

#[test]
fn s3_through_s5_owner_mismatch_and_prefix_boundary() {
    let p = policy("allow rw path=/foo uid=1000 gids=100,200");

    let owner_req = Request {
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
    assert!(p.is_capable(&owner_req)); // S3

    let mut mismatched = owner_req;
    mismatched.caller_uid = 1001;
    assert!(!p.is_capable(&mismatched)); // S4

    let mut boundary = owner_req;
    boundary.inode_path = "food/x";
    assert!(!p.is_capable(&boundary)); // S5
}

#[test]
fn s6_all_spec_covers_vxattr_rw_does_not() {
    let all = policy("allow * path=/");
    let rw = policy("allow rw path=/");
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
    assert!(!rw.is_capable(&req));
}

#[test]
fn s7_chown_requires_new_uid_equal_caller_and_inode_owner() {
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
fn path_prefix_safety_food_vs_foo_slash() {
    let p = policy("allow r path=/foo");
    assert!(p.path_capable("foo"));
    assert!(p.path_capable("foo/bar"));
    assert!(!p.path_capable("food"));
    assert!(!p.path_capable("foobar"));
}

#[test]
fn path_ending_in_slash_matches_without_boundary_check() {
    let p = policy("allow r path=/foo/");
    assert!(p.path_capable("foo/bar"));
}

#[test]
fn uid_any_monotonicity_bypasses_mode_bits() {
    let p = policy("allow rwps path=/shared");
    let req = Request {
        inode_path: "shared/anything",
        inode_uid: 42,
        inode_gid: 42,
        inode_mode: 0o000, // no bits set for anyone
        caller_uid: 7,
        caller_gid: 7,
        caller_gid_list: None,
        mask: Mask::MAY_READ | Mask::MAY_WRITE | Mask::MAY_SNAPSHOT | Mask::MAY_SET_VXATTR,
        new_uid: 0,
        new_gid: 0,
    };
    assert!(p.is_capable(&req));
}

#[test]
fn short_circuit_first_authorizing_grant_wins() {
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
fn set_allow_all_idempotence() {
    let mut p = policy("allow r path=/private uid=5");
    p.set_allow_all();
    assert!(p.allow_all());
    let req = Request {
        inode_path: "any/path/at/all",
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
fn group_class_uses_effective_gid_intersection() {
    // Grant only vouches for gid 200; caller's primary gid is 100 but
    // carries 200 as a supplementary group, and the inode is owned by
    // group 200 — so the group mode bits apply.
    let p = policy("allow rw uid=1000 gids=200");
    let req = Request {
        inode_path: "x",
        inode_uid: 1000,
        inode_gid: 200,
        inode_mode: 0o620,
        caller_uid: 1000,
        caller_gid: 100,
        caller_gid_list: Some(&[200]),
        mask: Mask::MAY_WRITE,
        new_uid: 0,
        new_gid: 0,
    };
    assert!(p.is_capable(&req));
}

#[test]
fn other_class_applies_when_owner_and_group_both_mismatch() {
    let p = policy("allow rw uid=1000");
    let req = Request {
        inode_path: "x",
        inode_uid: 1,
        inode_gid: 1,
        inode_mode: 0o004,
        caller_uid: 1000,
        caller_gid: 2,
        caller_gid_list: None,
        mask: Mask::MAY_READ,
        new_uid: 0,
        new_gid: 0,
    };
    assert!(p.is_capable(&req));
}

#[test]
fn format_round_trips_through_reparse() {
    let text = "allow rw path=/foo uid=1000 gids=200,100; allow r uid=5";
    let p1 = policy(text);
    let rendered = p1.to_cap_string();
    let p2 = policy(&rendered);
    assert_eq!(p1.grants().len(), p2.grants().len());
    for (g1, g2) in p1.grants().iter().zip(p2.grants().iter()) {
        assert_eq!(g1, g2);
    }
}

#[test]
fn idmap_keyword_detected_after_the_grant_list() {
    let p = policy("allow rw path=/foo idmap");
    assert!(p.idmap_required());
}

#[test]
fn uid_any_sentinel_is_negative() {
    assert_eq!(UID_ANY, -1);
}

#[test]
fn malformed_input_is_rejected_and_names_unconsumed_suffix() {
    let err = Policy::parse("allow rw path=/foo ???").unwrap_err();
    assert!(err.unconsumed.contains('?'));
}
