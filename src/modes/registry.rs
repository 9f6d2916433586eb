//! The mode registry and the single `apply` entry point.
//!
//! `apply` mutates one channel under the caller's channel lock and reports
//! the change. It never sends anything; forwarding the resulting
//! `ModeChange` is the caller's job.

use super::descriptor::{
    HALFOP_RANK, ListPolicy, ModeDescriptor, ModeKind, OP_RANK, ParamPolicy, PrefixPolicy,
    VOICE_RANK, ValueKind,
};
use super::resolver::ConflictPolicy;
use crate::config::LimitsConfig;
use crate::error::ModeError;
use crate::state::{Channel, ListEntry, ParamEntry, Uid};
use linkd_proto::{ModeItem, irc_eq};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Who is changing a mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Nick or server name, recorded as the setter.
    pub name: String,
    pub uid: Option<Uid>,
    /// The actor's rank in the channel being changed.
    pub rank: u32,
    /// Servers bypass rank checks and value locks.
    pub is_server: bool,
}

impl Actor {
    pub fn user(uid: impl Into<Uid>, nick: impl Into<String>, rank: u32) -> Self {
        Self {
            name: nick.into(),
            uid: Some(uid.into()),
            rank,
            is_server: false,
        }
    }

    pub fn server(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: None,
            rank: u32::MAX,
            is_server: true,
        }
    }
}

/// One requested change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeRequest {
    pub adding: bool,
    pub letter: char,
    pub arg: Option<String>,
}

impl ModeRequest {
    pub fn add(letter: char, arg: impl Into<String>) -> Self {
        Self {
            adding: true,
            letter,
            arg: Some(arg.into()),
        }
    }

    pub fn remove(letter: char, arg: Option<&str>) -> Self {
        Self {
            adding: false,
            letter,
            arg: arg.map(str::to_string),
        }
    }
}

impl From<ModeItem> for ModeRequest {
    fn from(item: ModeItem) -> Self {
        Self {
            adding: item.adding,
            letter: item.letter,
            arg: item.arg,
        }
    }
}

/// A successful change: what it was, what it is now, who and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub channel: String,
    pub letter: char,
    pub adding: bool,
    /// The argument as it should be propagated.
    pub arg: Option<String>,
    pub old: Option<String>,
    pub new: Option<String>,
    pub setter: String,
    pub ts: i64,
}

impl ModeChange {
    pub fn to_item(&self) -> ModeItem {
        ModeItem {
            adding: self.adding,
            letter: self.letter,
            arg: self.arg.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Changed(ModeChange),
    /// Accepted, but the channel already looked like that.
    Unchanged,
}

impl ApplyOutcome {
    pub fn into_change(self) -> Option<ModeChange> {
        match self {
            Self::Changed(change) => Some(change),
            Self::Unchanged => None,
        }
    }
}

/// All known channel modes, by letter.
pub struct ModeRegistry {
    modes: RwLock<BTreeMap<char, Arc<ModeDescriptor>>>,
}

impl ModeRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            modes: RwLock::new(BTreeMap::new()),
        }
    }

    /// The stock modes: `b`, `k`, `l`, `o`, `h`, `v`.
    pub fn new(limits: &LimitsConfig) -> Self {
        let registry = Self::empty();
        registry.register(ModeDescriptor::list('b', "ban", limits.max_list_entries));
        registry.register(ModeDescriptor::param(
            'k',
            "key",
            ParamPolicy {
                value: ValueKind::Text {
                    max_len: limits.max_key_length,
                },
                unset_requires_match: true,
                locked_while_set: true,
                conflict: ConflictPolicy::Lexical,
            },
        ));
        registry.register(ModeDescriptor::param(
            'l',
            "limit",
            ParamPolicy {
                value: ValueKind::Number,
                unset_requires_match: false,
                locked_while_set: false,
                conflict: ConflictPolicy::Minimum,
            },
        ));
        registry.register(ModeDescriptor::prefix(
            'o',
            "op",
            PrefixPolicy {
                rank: OP_RANK,
                symbol: '@',
                rank_to_set: OP_RANK,
                rank_to_unset: OP_RANK,
                self_remove: true,
            },
        ));
        registry.register(ModeDescriptor::prefix(
            'h',
            "halfop",
            PrefixPolicy {
                rank: HALFOP_RANK,
                symbol: '%',
                rank_to_set: OP_RANK,
                rank_to_unset: OP_RANK,
                self_remove: true,
            },
        ));
        registry.register(ModeDescriptor::prefix(
            'v',
            "voice",
            PrefixPolicy {
                rank: VOICE_RANK,
                symbol: '+',
                rank_to_set: HALFOP_RANK,
                rank_to_unset: HALFOP_RANK,
                self_remove: false,
            },
        ));
        registry
    }

    /// Add or replace a mode. Returns the descriptor it replaced.
    pub fn register(&self, descriptor: ModeDescriptor) -> Option<Arc<ModeDescriptor>> {
        self.modes
            .write()
            .insert(descriptor.letter, Arc::new(descriptor))
    }

    pub fn unregister(&self, letter: char) -> Option<Arc<ModeDescriptor>> {
        self.modes.write().remove(&letter)
    }

    pub fn get(&self, letter: char) -> Option<Arc<ModeDescriptor>> {
        self.modes.read().get(&letter).cloned()
    }

    pub fn letters(&self) -> Vec<char> {
        self.modes.read().keys().copied().collect()
    }

    /// The rank each prefix letter in `letters` grants. Unknown letters and
    /// letters of non-prefix modes are returned separately.
    pub fn prefix_ranks(&self, letters: &str) -> (Vec<(char, u32)>, Vec<char>) {
        let modes = self.modes.read();
        let mut ranks = Vec::new();
        let mut unknown = Vec::new();
        for letter in letters.chars() {
            match modes.get(&letter).and_then(|d| d.as_prefix()) {
                Some(policy) => ranks.push((letter, policy.rank)),
                None => unknown.push(letter),
            }
        }
        (ranks, unknown)
    }

    /// The `PREFIX=` value, highest rank first: `(ohv)@%+`.
    pub fn prefix_token(&self) -> String {
        let modes = self.modes.read();
        let mut prefixes: Vec<(char, PrefixPolicy)> = modes
            .values()
            .filter_map(|d| d.as_prefix().map(|p| (d.letter, *p)))
            .collect();
        prefixes.sort_by(|a, b| b.1.rank.cmp(&a.1.rank).then(a.0.cmp(&b.0)));
        let letters: String = prefixes.iter().map(|(l, _)| *l).collect();
        let symbols: String = prefixes.iter().map(|(_, p)| p.symbol).collect();
        format!("({}){}", letters, symbols)
    }

    /// The `CHANMODES=` value: list modes, parameter modes needing their
    /// value to unset, parameter modes only taking one when set, then flags.
    pub fn chanmodes_token(&self) -> String {
        let modes = self.modes.read();
        let mut groups: [String; 4] = Default::default();
        for descriptor in modes.values() {
            let group = match &descriptor.kind {
                ModeKind::List(_) => 0,
                ModeKind::Param(p) if p.unset_requires_match => 1,
                ModeKind::Param(_) => 2,
                ModeKind::Prefix(_) => continue,
            };
            groups[group].push(descriptor.letter);
        }
        groups.join(",")
    }

    /// Apply one change to `channel`.
    ///
    /// On error the channel is untouched.
    pub fn apply(
        &self,
        channel: &mut Channel,
        actor: &Actor,
        request: &ModeRequest,
        ts: i64,
    ) -> Result<ApplyOutcome, ModeError> {
        let descriptor = self
            .get(request.letter)
            .ok_or(ModeError::UnknownMode(request.letter))?;
        let arg = request.arg.as_deref();
        if descriptor.takes_arg(request.adding) && arg.is_none() {
            return Err(ModeError::MissingArgument(request.letter));
        }

        match &descriptor.kind {
            ModeKind::List(policy) => {
                check_rank(actor, descriptor.rank_required)?;
                let mask = arg.unwrap_or_default();
                apply_list(channel, &descriptor, policy, actor, request.adding, mask, ts)
            }
            ModeKind::Param(policy) => {
                check_rank(actor, descriptor.rank_required)?;
                apply_param(channel, &descriptor, policy, actor, request.adding, arg, ts)
            }
            ModeKind::Prefix(policy) => {
                let target = arg.unwrap_or_default();
                let need = if request.adding {
                    policy.rank_to_set
                } else {
                    policy.rank_to_unset
                };
                let self_removal = !request.adding
                    && policy.self_remove
                    && actor.uid.as_deref() == Some(target);
                if !self_removal {
                    check_rank(actor, need)?;
                }
                apply_prefix(channel, &descriptor, policy, actor, request.adding, target, ts)
            }
        }
    }
}

fn check_rank(actor: &Actor, need: u32) -> Result<(), ModeError> {
    if actor.is_server || actor.rank >= need {
        Ok(())
    } else {
        Err(ModeError::InsufficientRank {
            have: actor.rank,
            need,
        })
    }
}

fn apply_list(
    channel: &mut Channel,
    descriptor: &ModeDescriptor,
    policy: &ListPolicy,
    actor: &Actor,
    adding: bool,
    mask: &str,
    ts: i64,
) -> Result<ApplyOutcome, ModeError> {
    let letter = descriptor.letter;
    let existing = channel.list(letter).iter().position(|e| irc_eq(&e.mask, mask));

    let change = if adding {
        if existing.is_some() {
            return Ok(ApplyOutcome::Unchanged);
        }
        if channel.list(letter).len() >= policy.max_entries {
            return Err(ModeError::ListFull {
                letter,
                cap: policy.max_entries,
            });
        }
        channel.lists.entry(letter).or_default().push(ListEntry {
            mask: mask.to_string(),
            set_by: actor.name.clone(),
            set_at: ts,
        });
        (None, Some(mask.to_string()))
    } else {
        let (Some(index), Some(list)) = (existing, channel.lists.get_mut(&letter)) else {
            return Err(ModeError::NotFound {
                letter,
                value: mask.to_string(),
            });
        };
        let removed = list.remove(index);
        if list.is_empty() {
            channel.lists.remove(&letter);
        }
        (Some(removed.mask), None)
    };

    let arg = change.0.clone().or_else(|| change.1.clone());
    Ok(ApplyOutcome::Changed(ModeChange {
        channel: channel.name.clone(),
        letter,
        adding,
        arg,
        old: change.0,
        new: change.1,
        setter: actor.name.clone(),
        ts,
    }))
}

fn apply_param(
    channel: &mut Channel,
    descriptor: &ModeDescriptor,
    policy: &ParamPolicy,
    actor: &Actor,
    adding: bool,
    arg: Option<&str>,
    ts: i64,
) -> Result<ApplyOutcome, ModeError> {
    let letter = descriptor.letter;
    let current = channel.params.get(&letter).map(|p| p.value.clone());

    if adding {
        let value = descriptor.normalize(arg.unwrap_or_default())?;
        if current.as_deref() == Some(value.as_str()) {
            return Ok(ApplyOutcome::Unchanged);
        }
        if current.is_some() && policy.locked_while_set && !actor.is_server {
            return Err(ModeError::ValueMismatch { letter });
        }
        channel.params.insert(
            letter,
            ParamEntry {
                value: value.clone(),
                set_at: ts,
            },
        );
        return Ok(ApplyOutcome::Changed(ModeChange {
            channel: channel.name.clone(),
            letter,
            adding,
            arg: Some(value.clone()),
            old: current,
            new: Some(value),
            setter: actor.name.clone(),
            ts,
        }));
    }

    let Some(old) = current else {
        return Err(ModeError::NotFound {
            letter,
            value: arg.unwrap_or("*").to_string(),
        });
    };
    if policy.unset_requires_match && arg != Some(old.as_str()) {
        return Err(ModeError::ValueMismatch { letter });
    }
    channel.params.remove(&letter);
    Ok(ApplyOutcome::Changed(ModeChange {
        channel: channel.name.clone(),
        letter,
        adding,
        arg: policy.unset_requires_match.then(|| old.clone()),
        old: Some(old),
        new: None,
        setter: actor.name.clone(),
        ts,
    }))
}

fn apply_prefix(
    channel: &mut Channel,
    descriptor: &ModeDescriptor,
    policy: &PrefixPolicy,
    actor: &Actor,
    adding: bool,
    target: &str,
    ts: i64,
) -> Result<ApplyOutcome, ModeError> {
    let letter = descriptor.letter;
    let name = channel.name.clone();
    let member = channel
        .members
        .get_mut(target)
        .ok_or_else(|| ModeError::NotOnChannel(target.to_string()))?;
    let changed = if adding {
        member.grant(letter, policy.rank)
    } else {
        member.revoke(letter)
    };
    if !changed {
        return Ok(ApplyOutcome::Unchanged);
    }
    let (old, new) = if adding {
        (None, Some(target.to_string()))
    } else {
        (Some(target.to_string()), None)
    };
    Ok(ApplyOutcome::Changed(ModeChange {
        channel: name,
        letter,
        adding,
        arg: Some(target.to_string()),
        old,
        new,
        setter: actor.name.clone(),
        ts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Membership;

    const OP: &str = "00AAAAAAA";
    const VOICED: &str = "00AAAAAAB";
    const PLAIN: &str = "00AAAAAAC";

    fn registry(max_list_entries: usize) -> ModeRegistry {
        ModeRegistry::new(&LimitsConfig {
            max_list_entries,
            max_key_length: 8,
            ..LimitsConfig::default()
        })
    }

    fn channel() -> Channel {
        let mut chan = Channel::new("#test", 1);
        let mut op = Membership::new(OP);
        op.grant('o', OP_RANK);
        let mut voiced = Membership::new(VOICED);
        voiced.grant('v', VOICE_RANK);
        chan.members.insert(OP.into(), op);
        chan.members.insert(VOICED.into(), voiced);
        chan.members.insert(PLAIN.into(), Membership::new(PLAIN));
        chan
    }

    fn op() -> Actor {
        Actor::user(OP, "oper", OP_RANK)
    }

    #[test]
    fn ban_add_is_idempotent() {
        let modes = registry(4);
        let mut chan = channel();
        let first = modes.apply(&mut chan, &op(), &ModeRequest::add('b', "*!*@h1"), 10);
        assert!(matches!(first, Ok(ApplyOutcome::Changed(_))));
        let again = modes.apply(&mut chan, &op(), &ModeRequest::add('b', "*!*@H1"), 11);
        assert_eq!(again, Ok(ApplyOutcome::Unchanged));
        assert_eq!(chan.list('b').len(), 1);
        assert_eq!(chan.list('b')[0].set_by, "oper");
    }

    #[test]
    fn ban_list_cap_is_enforced() {
        let modes = registry(2);
        let mut chan = channel();
        for mask in ["a!*@*", "b!*@*"] {
            modes.apply(&mut chan, &op(), &ModeRequest::add('b', mask), 1).unwrap();
        }
        let err = modes
            .apply(&mut chan, &op(), &ModeRequest::add('b', "c!*@*"), 1)
            .unwrap_err();
        assert_eq!(err, ModeError::ListFull { letter: 'b', cap: 2 });
        // Re-adding a present mask at the cap is still fine.
        assert_eq!(
            modes.apply(&mut chan, &op(), &ModeRequest::add('b', "a!*@*"), 1),
            Ok(ApplyOutcome::Unchanged)
        );
    }

    #[test]
    fn removing_absent_ban_is_not_found() {
        let modes = registry(4);
        let mut chan = channel();
        let err = modes
            .apply(&mut chan, &op(), &ModeRequest::remove('b', Some("*!*@nope")), 1)
            .unwrap_err();
        assert!(matches!(err, ModeError::NotFound { letter: 'b', .. }));
    }

    #[test]
    fn ban_removal_reports_stored_mask() {
        let modes = registry(4);
        let mut chan = channel();
        modes.apply(&mut chan, &op(), &ModeRequest::add('b', "*!*@Host"), 1).unwrap();
        let change = modes
            .apply(&mut chan, &op(), &ModeRequest::remove('b', Some("*!*@host")), 2)
            .unwrap()
            .into_change()
            .unwrap();
        assert_eq!(change.old.as_deref(), Some("*!*@Host"));
        assert!(chan.list('b').is_empty());
    }

    #[test]
    fn key_set_twice_locally_is_refused() {
        let modes = registry(4);
        let mut chan = channel();
        modes.apply(&mut chan, &op(), &ModeRequest::add('k', "secret"), 1).unwrap();
        let err = modes
            .apply(&mut chan, &op(), &ModeRequest::add('k', "other"), 2)
            .unwrap_err();
        assert_eq!(err, ModeError::ValueMismatch { letter: 'k' });

        let server = Actor::server("hub.test");
        let change = modes
            .apply(&mut chan, &server, &ModeRequest::add('k', "other"), 3)
            .unwrap()
            .into_change()
            .unwrap();
        assert_eq!(change.old.as_deref(), Some("secret"));
        assert_eq!(chan.param('k'), Some("other"));
    }

    #[test]
    fn key_unset_requires_match() {
        let modes = registry(4);
        let mut chan = channel();
        modes.apply(&mut chan, &op(), &ModeRequest::add('k', "secret"), 1).unwrap();
        assert_eq!(
            modes.apply(&mut chan, &op(), &ModeRequest::remove('k', Some("guess")), 2),
            Err(ModeError::ValueMismatch { letter: 'k' })
        );
        assert_eq!(
            modes.apply(&mut chan, &op(), &ModeRequest::remove('k', None), 2),
            Err(ModeError::MissingArgument('k'))
        );
        assert!(modes
            .apply(&mut chan, &op(), &ModeRequest::remove('k', Some("secret")), 2)
            .is_ok());
        assert_eq!(chan.param('k'), None);
    }

    #[test]
    fn long_keys_are_truncated() {
        let modes = registry(4);
        let mut chan = channel();
        modes
            .apply(&mut chan, &op(), &ModeRequest::add('k', "averyverylongkey"), 1)
            .unwrap();
        assert_eq!(chan.param('k'), Some("averyver"));
    }

    #[test]
    fn limit_replaces_and_reports_old_value() {
        let modes = registry(4);
        let mut chan = channel();
        modes.apply(&mut chan, &op(), &ModeRequest::add('l', "10"), 1).unwrap();
        let change = modes
            .apply(&mut chan, &op(), &ModeRequest::add('l', "5"), 2)
            .unwrap()
            .into_change()
            .unwrap();
        assert_eq!(change.old.as_deref(), Some("10"));
        assert_eq!(change.new.as_deref(), Some("5"));

        let unset = modes
            .apply(&mut chan, &op(), &ModeRequest::remove('l', None), 3)
            .unwrap()
            .into_change()
            .unwrap();
        assert_eq!(unset.arg, None);
        assert_eq!(chan.param('l'), None);
    }

    #[test]
    fn prefix_needs_rank() {
        let modes = registry(4);
        let mut chan = channel();
        let voiced = Actor::user(VOICED, "v", VOICE_RANK);
        assert_eq!(
            modes.apply(&mut chan, &voiced, &ModeRequest::add('v', PLAIN), 1),
            Err(ModeError::InsufficientRank {
                have: VOICE_RANK,
                need: HALFOP_RANK
            })
        );
        modes.apply(&mut chan, &op(), &ModeRequest::add('o', PLAIN), 1).unwrap();
        assert_eq!(chan.rank_of(PLAIN), OP_RANK);
    }

    #[test]
    fn self_removal_follows_policy() {
        let modes = registry(4);
        let mut chan = channel();
        // Voice cannot be dropped by its holder.
        let voiced = Actor::user(VOICED, "v", VOICE_RANK);
        assert!(matches!(
            modes.apply(&mut chan, &voiced, &ModeRequest::remove('v', Some(VOICED)), 1),
            Err(ModeError::InsufficientRank { .. })
        ));

        // Half-op can.
        modes.apply(&mut chan, &op(), &ModeRequest::add('h', PLAIN), 1).unwrap();
        let halfop = Actor::user(PLAIN, "p", HALFOP_RANK);
        assert!(modes
            .apply(&mut chan, &halfop, &ModeRequest::remove('h', Some(PLAIN)), 2)
            .is_ok());
        assert_eq!(chan.rank_of(PLAIN), 0);
    }

    #[test]
    fn prefix_target_must_be_member() {
        let modes = registry(4);
        let mut chan = channel();
        assert_eq!(
            modes.apply(&mut chan, &op(), &ModeRequest::add('o', "00ZZZZZZZ"), 1),
            Err(ModeError::NotOnChannel("00ZZZZZZZ".into()))
        );
    }

    #[test]
    fn unknown_letter_is_rejected() {
        let modes = registry(4);
        let mut chan = channel();
        assert_eq!(
            modes.apply(&mut chan, &op(), &ModeRequest::add('Q', "x"), 1),
            Err(ModeError::UnknownMode('Q'))
        );
    }

    #[test]
    fn isupport_tokens() {
        let modes = registry(4);
        assert_eq!(modes.prefix_token(), "(ohv)@%+");
        assert_eq!(modes.chanmodes_token(), "b,k,l,");
    }
}
