//! Channel-related types and state.

use super::user::Uid;
use linkd_proto::irc_to_lower;
use std::collections::{BTreeMap, HashMap};

/// An entry in a list mode (bans and the like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Channel topic with metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// The stored value of a parameter mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamEntry {
    pub value: String,
    pub set_at: i64,
}

/// One user's presence in one channel.
///
/// Prefix modes are kept per letter with the rank each grants, so revoking
/// voice from an op leaves the op rank intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub uid: Uid,
    prefixes: BTreeMap<char, u32>,
}

impl Membership {
    pub fn new(uid: impl Into<Uid>) -> Self {
        Self {
            uid: uid.into(),
            prefixes: BTreeMap::new(),
        }
    }

    /// The effective rank: the highest rank among held prefix modes, 0 if none.
    pub fn rank(&self) -> u32 {
        self.prefixes.values().copied().max().unwrap_or(0)
    }

    pub fn has_prefix(&self, letter: char) -> bool {
        self.prefixes.contains_key(&letter)
    }

    /// Returns `false` if the prefix was already held.
    pub fn grant(&mut self, letter: char, rank: u32) -> bool {
        self.prefixes.insert(letter, rank).is_none()
    }

    /// Returns `false` if the prefix was not held.
    pub fn revoke(&mut self, letter: char) -> bool {
        self.prefixes.remove(&letter).is_some()
    }

    /// Held prefix letters, highest rank first.
    pub fn prefix_letters(&self) -> String {
        let mut held: Vec<(char, u32)> = self.prefixes.iter().map(|(l, r)| (*l, *r)).collect();
        held.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        held.into_iter().map(|(l, _)| l).collect()
    }
}

/// A channel: members plus its mode table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Name as first created (case preserved).
    pub name: String,
    /// Creation time (unix seconds).
    pub created: i64,
    pub topic: Option<Topic>,
    pub members: HashMap<Uid, Membership>,
    /// List modes by letter, in insertion order.
    pub lists: BTreeMap<char, Vec<ListEntry>>,
    /// Parameter modes by letter.
    pub params: BTreeMap<char, ParamEntry>,
    /// Set once the channel has been removed from the store; a handle still
    /// held by a racing caller must not be mutated after this.
    pub(crate) destroyed: bool,
}

impl Channel {
    pub fn new(name: impl Into<String>, created: i64) -> Self {
        Self {
            name: name.into(),
            created,
            topic: None,
            members: HashMap::new(),
            lists: BTreeMap::new(),
            params: BTreeMap::new(),
            destroyed: false,
        }
    }

    /// The case-folded lookup key.
    pub fn key(&self) -> String {
        irc_to_lower(&self.name)
    }

    pub fn list(&self, letter: char) -> &[ListEntry] {
        self.lists.get(&letter).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn param(&self, letter: char) -> Option<&str> {
        self.params.get(&letter).map(|p| p.value.as_str())
    }

    pub fn member(&self, uid: &str) -> Option<&Membership> {
        self.members.get(uid)
    }

    /// Rank of `uid` in this channel, 0 for non-members.
    pub fn rank_of(&self, uid: &str) -> u32 {
        self.members.get(uid).map(Membership::rank).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Take `incoming` if it is newer. Equal times keep the lexically
    /// smaller text so both sides of a merge pick the same topic.
    pub fn absorb_topic(&mut self, incoming: Topic) -> bool {
        let replace = match &self.topic {
            None => true,
            Some(current) => {
                incoming.set_at > current.set_at
                    || (incoming.set_at == current.set_at && incoming.text < current.text)
            }
        };
        if replace {
            self.topic = Some(incoming);
        }
        replace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_is_highest_held_prefix() {
        let mut m = Membership::new("00AAAAAAB");
        assert_eq!(m.rank(), 0);
        assert!(m.grant('v', 10_000));
        assert!(m.grant('o', 30_000));
        assert!(!m.grant('o', 30_000));
        assert_eq!(m.rank(), 30_000);
        assert_eq!(m.prefix_letters(), "ov");
        assert!(m.revoke('o'));
        assert_eq!(m.rank(), 10_000);
        assert!(!m.revoke('o'));
    }

    #[test]
    fn key_is_case_folded() {
        let c = Channel::new("#Rust[Dev]", 1);
        assert_eq!(c.key(), "#rust{dev}");
    }

    #[test]
    fn newer_topic_wins_and_ties_are_stable() {
        let mut c = Channel::new("#t", 1);
        let t = |text: &str, at| Topic {
            text: text.into(),
            set_by: "x".into(),
            set_at: at,
        };
        assert!(c.absorb_topic(t("beta", 10)));
        assert!(!c.absorb_topic(t("alpha", 5)));
        assert!(c.absorb_topic(t("alpha", 10)));
        assert!(!c.absorb_topic(t("zeta", 10)));
        assert_eq!(c.topic.as_ref().unwrap().text, "alpha");
    }
}
