//! Extban registration and ban decisions through a live channel.

mod common;

use common::{matrix, user};
use linkd::Decision;
use linkd::error::ExtBanError;
use linkd::modes::ModeRequest;
use linkd::security::{ExtBan, ExtBanCheck, ExtBanRegistry};
use linkd::state::{Channel, User};
use std::sync::Arc;

struct Realname;

impl ExtBan for Realname {
    fn letter(&self) -> char {
        'R'
    }
    fn name(&self) -> &str {
        "realname"
    }
    fn is_match(&self, user: &User, _channel: &Channel, value: &str) -> bool {
        linkd::security::wildcard_match(value, &user.realname)
    }
}

struct Impostor;

impl ExtBan for Impostor {
    fn letter(&self) -> char {
        'R'
    }
    fn name(&self) -> &str {
        "regex"
    }
    fn is_match(&self, _user: &User, _channel: &Channel, _value: &str) -> bool {
        true
    }
}

#[test]
fn register_indexes_letter_and_name() {
    let registry = ExtBanRegistry::new();
    assert_eq!(registry.advertisement(), ",");
    registry.register(Arc::new(Realname)).unwrap();

    assert_eq!(registry.find_letter('R').unwrap().name(), "realname");
    assert_eq!(registry.find_name("REALNAME").unwrap().letter(), 'R');
    assert_eq!(registry.advertisement(), ",R");
}

#[test]
fn duplicate_letter_leaves_registry_untouched() {
    let registry = ExtBanRegistry::new();
    registry.register(Arc::new(Realname)).unwrap();

    let err = registry.register(Arc::new(Impostor)).unwrap_err();
    assert!(matches!(err, ExtBanError::DuplicateLetter('R')));
    assert_eq!(registry.find_letter('R').unwrap().name(), "realname");
    assert!(registry.find_name("regex").is_none());
    assert_eq!(registry.len(), 1);
}

#[test]
fn builtins_are_advertised_sorted() {
    let m = matrix("00A");
    assert_eq!(m.extbans.advertisement(), ",Uajr");
    assert!(m.isupport().contains(&"EXTBAN=,Uajr".to_string()));
}

#[test]
fn extban_entries_decide_bans() {
    let m = matrix("00A");
    let op = user("00A", "AAAAAB", "op");
    let op_uid = op.uid.clone();
    let mut guest = user("00A", "AAAAAC", "guest");
    guest.realname = "spam bot".into();
    let guest_uid = guest.uid.clone();
    m.add_local_user(op).unwrap();
    m.add_local_user(guest).unwrap();
    m.join(&op_uid, "#c").unwrap();

    assert!(!m.is_banned(&guest_uid, "#c"));
    m.change_modes(&op_uid, "#c", &[ModeRequest::add('b', "r:*bot*")])
        .unwrap();
    assert!(m.is_banned(&guest_uid, "#c"));
    assert!(!m.is_banned(&op_uid, "#c"));

    // Unknown users and channels are never banned.
    assert!(!m.is_banned("00AZZZZZZ", "#c"));
    assert!(!m.is_banned(&guest_uid, "#nowhere"));
}

struct ExemptOps;

impl ExtBanCheck for ExemptOps {
    fn check(&self, user: &User, channel: &Channel, _extban: &dyn ExtBan) -> Decision {
        if channel.rank_of(&user.uid) > 0 {
            Decision::Allow
        } else {
            Decision::Passthru
        }
    }
}

#[test]
fn check_hooks_override_ban_entries() {
    let m = matrix("00A");
    let mut op = user("00A", "AAAAAB", "op");
    op.realname = "bot operator".into();
    let op_uid = op.uid.clone();
    m.add_local_user(op).unwrap();
    m.join(&op_uid, "#c").unwrap();
    m.change_modes(&op_uid, "#c", &[ModeRequest::add('b', "realname:*bot*")])
        .unwrap();
    assert!(m.is_banned(&op_uid, "#c"));

    m.extbans.add_check(Arc::new(ExemptOps));
    assert!(!m.is_banned(&op_uid, "#c"));
}
