//! Extended bans.
//!
//! An extban is a predicate that can sit in a channel's ban list as
//! `[!]<letter or name>:<value>`, e.g. `a:spammer` or `!realname:*bot*`.
//! The registry indexes them by letter and by name; both indexes change
//! together under one lock.
//!
//! Built-in types:
//! - `a` / `account` - users logged into a matching account
//! - `r` / `realname` - users whose realname matches
//! - `j` / `channel` - users in a matching channel
//! - `U` / `unauthed` - users not logged in whose hostmask matches

use crate::decision::Decision;
use crate::error::ExtBanError;
use crate::state::{Channel, User};
use linkd_proto::irc_to_lower;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// A pluggable ban predicate.
pub trait ExtBan: Send + Sync {
    fn letter(&self) -> char;
    fn name(&self) -> &str;
    /// Whether `user` matches `value` in `channel`.
    fn is_match(&self, user: &User, channel: &Channel, value: &str) -> bool;
}

/// A hook consulted before the ban list when deciding an extban's status.
pub trait ExtBanCheck: Send + Sync {
    fn check(&self, user: &User, channel: &Channel, extban: &dyn ExtBan) -> Decision;
}

/// A ban list entry split into its extban parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtBanMask<'a> {
    pub inverted: bool,
    /// The letter or name.
    pub key: &'a str,
    pub value: &'a str,
}

impl<'a> ExtBanMask<'a> {
    /// Split `[!]key:value`. Returns `None` for ordinary masks.
    pub fn parse(mask: &'a str) -> Option<Self> {
        let (inverted, rest) = match mask.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, mask),
        };
        let (key, value) = rest.split_once(':')?;
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self {
            inverted,
            key,
            value,
        })
    }

    /// Whether this entry names `extban`.
    pub fn names(&self, extban: &dyn ExtBan) -> bool {
        let mut chars = self.key.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => letter == extban.letter(),
            _ => irc_to_lower(self.key) == irc_to_lower(extban.name()),
        }
    }
}

#[derive(Default)]
struct Indexes {
    by_letter: BTreeMap<char, Arc<dyn ExtBan>>,
    /// Keyed by case-folded name.
    by_name: HashMap<String, Arc<dyn ExtBan>>,
    advertisement: String,
}

impl Indexes {
    fn rebuild_advertisement(&mut self) {
        let mut token = String::from(",");
        token.extend(self.by_letter.keys());
        self.advertisement = token;
    }
}

pub struct ExtBanRegistry {
    indexes: RwLock<Indexes>,
    checks: RwLock<Vec<Arc<dyn ExtBanCheck>>>,
}

impl Default for ExtBanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtBanRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        let mut indexes = Indexes::default();
        indexes.rebuild_advertisement();
        Self {
            indexes: RwLock::new(indexes),
            checks: RwLock::new(Vec::new()),
        }
    }

    /// A registry holding the built-in types.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let builtins: [Arc<dyn ExtBan>; 4] = [
            Arc::new(AccountExtBan),
            Arc::new(RealnameExtBan),
            Arc::new(ChannelExtBan),
            Arc::new(UnauthedExtBan),
        ];
        for extban in builtins {
            if let Err(e) = registry.register(extban) {
                debug!(error = %e, "Built-in extban not registered");
            }
        }
        registry
    }

    /// Register under both letter and name. Nothing changes on error.
    /// Registering the same instance again is a no-op.
    pub fn register(&self, extban: Arc<dyn ExtBan>) -> Result<(), ExtBanError> {
        let letter = extban.letter();
        let name = irc_to_lower(extban.name());
        let mut indexes = self.indexes.write();

        if let Some(existing) = indexes.by_letter.get(&letter) {
            if !Arc::ptr_eq(existing, &extban) {
                return Err(ExtBanError::DuplicateLetter(letter));
            }
        }
        if let Some(existing) = indexes.by_name.get(&name) {
            if !Arc::ptr_eq(existing, &extban) {
                return Err(ExtBanError::DuplicateName(extban.name().to_string()));
            }
        }

        indexes.by_letter.insert(letter, Arc::clone(&extban));
        indexes.by_name.insert(name, extban);
        indexes.rebuild_advertisement();
        debug!(letter = %letter, advertised = %indexes.advertisement, "Registered extban");
        Ok(())
    }

    /// Remove the extban registered under `letter` from both indexes.
    pub fn unregister(&self, letter: char) -> Option<Arc<dyn ExtBan>> {
        let mut indexes = self.indexes.write();
        let extban = indexes.by_letter.remove(&letter)?;
        let name = irc_to_lower(extban.name());
        if indexes
            .by_name
            .get(&name)
            .is_some_and(|e| Arc::ptr_eq(e, &extban))
        {
            indexes.by_name.remove(&name);
        }
        indexes.rebuild_advertisement();
        debug!(letter = %letter, advertised = %indexes.advertisement, "Unregistered extban");
        Some(extban)
    }

    pub fn find_letter(&self, letter: char) -> Option<Arc<dyn ExtBan>> {
        self.indexes.read().by_letter.get(&letter).cloned()
    }

    /// Case-insensitive.
    pub fn find_name(&self, name: &str) -> Option<Arc<dyn ExtBan>> {
        self.indexes.read().by_name.get(&irc_to_lower(name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.indexes.read().by_letter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `EXTBAN=` value: `,` then the registered letters in byte order.
    pub fn advertisement(&self) -> String {
        self.indexes.read().advertisement.clone()
    }

    /// Append a check hook. Hooks run in the order added.
    pub fn add_check(&self, check: Arc<dyn ExtBanCheck>) {
        self.checks.write().push(check);
    }

    /// Decide `extban` for `user` in `channel`.
    ///
    /// Check hooks go first. Otherwise the first ban list entry naming this
    /// extban decides: deny if the predicate result differs from the
    /// entry's inversion flag.
    pub fn status(&self, extban: &dyn ExtBan, user: &User, channel: &Channel) -> Decision {
        let checks = self.checks.read().clone();
        let hooked = Decision::first_of(checks.iter().map(|c| c.check(user, channel, extban)));
        if hooked != Decision::Passthru {
            return hooked;
        }

        for entry in channel.list('b') {
            let Some(mask) = ExtBanMask::parse(&entry.mask) else {
                continue;
            };
            if !mask.names(extban) {
                continue;
            }
            return if extban.is_match(user, channel, mask.value) != mask.inverted {
                Decision::Deny
            } else {
                Decision::Passthru
            };
        }
        Decision::Passthru
    }

    /// Whether `user` is banned from `channel`.
    ///
    /// Registered extbans are asked in letter order and the first definite
    /// answer wins, so an `Allow` exempts the user. Otherwise plain
    /// `nick!user@host` masks are matched.
    pub fn is_banned(&self, user: &User, channel: &Channel) -> bool {
        let extbans: Vec<Arc<dyn ExtBan>> =
            self.indexes.read().by_letter.values().cloned().collect();
        for extban in &extbans {
            match self.status(extban.as_ref(), user, channel) {
                Decision::Deny => return true,
                Decision::Allow => return false,
                Decision::Passthru => {}
            }
        }

        let hostmask = user.hostmask();
        channel
            .list('b')
            .iter()
            .filter(|e| ExtBanMask::parse(&e.mask).is_none())
            .any(|e| wildcard_match(&e.mask, &hostmask))
    }
}

/// IRC wildcard matching: `*` is any run, `?` is one character. Both
/// sides are compared under RFC 1459 case mapping.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut regex_pattern = String::from("^");
    let mut literal = String::new();
    for c in irc_to_lower(pattern).chars() {
        match c {
            '*' | '?' => {
                regex_pattern.push_str(&regex::escape(&literal));
                literal.clear();
                regex_pattern.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    regex_pattern.push_str(&regex::escape(&literal));
    regex_pattern.push('$');

    Regex::new(&regex_pattern)
        .map(|re| re.is_match(&irc_to_lower(text)))
        .unwrap_or(false)
}

// ============================================================================
// Built-in extbans
// ============================================================================

pub struct AccountExtBan;

impl ExtBan for AccountExtBan {
    fn letter(&self) -> char {
        'a'
    }

    fn name(&self) -> &str {
        "account"
    }

    fn is_match(&self, user: &User, _channel: &Channel, value: &str) -> bool {
        user.account
            .as_deref()
            .is_some_and(|account| wildcard_match(value, account))
    }
}

pub struct RealnameExtBan;

impl ExtBan for RealnameExtBan {
    fn letter(&self) -> char {
        'r'
    }

    fn name(&self) -> &str {
        "realname"
    }

    fn is_match(&self, user: &User, _channel: &Channel, value: &str) -> bool {
        wildcard_match(value, &user.realname)
    }
}

pub struct ChannelExtBan;

impl ExtBan for ChannelExtBan {
    fn letter(&self) -> char {
        'j'
    }

    fn name(&self) -> &str {
        "channel"
    }

    fn is_match(&self, user: &User, _channel: &Channel, value: &str) -> bool {
        user.channels.iter().any(|c| wildcard_match(value, c))
    }
}

pub struct UnauthedExtBan;

impl ExtBan for UnauthedExtBan {
    fn letter(&self) -> char {
        'U'
    }

    fn name(&self) -> &str {
        "unauthed"
    }

    fn is_match(&self, user: &User, _channel: &Channel, value: &str) -> bool {
        let mask = if value.is_empty() { "*" } else { value };
        user.account.is_none() && wildcard_match(mask, &user.hostmask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ListEntry;

    fn user() -> User {
        let mut user = User::new("00AAAAAAB", "alice", "al", "h1.example", "Alice Bot", 1);
        user.channels.insert("#lobby".into());
        user
    }

    fn banned(masks: &[&str]) -> Channel {
        let mut chan = Channel::new("#c", 1);
        chan.lists.insert(
            'b',
            masks
                .iter()
                .map(|m| ListEntry {
                    mask: m.to_string(),
                    set_by: "op".into(),
                    set_at: 1,
                })
                .collect(),
        );
        chan
    }

    #[test]
    fn wildcards() {
        assert!(wildcard_match("*bot*", "mybot123"));
        assert!(wildcard_match("user?", "user1"));
        assert!(!wildcard_match("user?", "user12"));
        assert!(wildcard_match("*!*@H1.*", "alice!al@h1.example"));
        assert!(wildcard_match("[x]*", "{x}y"));
        assert!(!wildcard_match("a.c", "abc"));
    }

    #[test]
    fn mask_parsing() {
        assert_eq!(
            ExtBanMask::parse("!r:*bot*"),
            Some(ExtBanMask {
                inverted: true,
                key: "r",
                value: "*bot*"
            })
        );
        assert!(ExtBanMask::parse("*!*@h1").is_none());
        assert!(ExtBanMask::parse("*!*@2001:db8::1").is_none());
        assert!(ExtBanMask::parse(":nokey").is_none());
    }

    #[test]
    fn advertisement_is_sorted() {
        let registry = ExtBanRegistry::with_builtins();
        assert_eq!(registry.advertisement(), ",Uajr");
        registry.unregister('j');
        assert_eq!(registry.advertisement(), ",Uar");
        assert!(registry.find_name("channel").is_none());
    }

    #[test]
    fn first_naming_entry_decides() {
        let registry = ExtBanRegistry::with_builtins();
        let realname = registry.find_name("REALNAME").unwrap();
        let chan = banned(&["*!*@other", "realname:*bot*", "r:nomatch"]);
        assert_eq!(registry.status(realname.as_ref(), &user(), &chan), Decision::Deny);

        let chan = banned(&["r:nomatch", "realname:*bot*"]);
        assert_eq!(registry.status(realname.as_ref(), &user(), &chan), Decision::Passthru);
    }

    #[test]
    fn inverted_entries_flip_the_match() {
        let registry = ExtBanRegistry::with_builtins();
        let account = registry.find_letter('a').unwrap();
        let chan = banned(&["!a:trusted"]);
        assert_eq!(registry.status(account.as_ref(), &user(), &chan), Decision::Deny);

        let mut trusted = user();
        trusted.account = Some("Trusted".into());
        assert_eq!(registry.status(account.as_ref(), &trusted, &chan), Decision::Passthru);
    }

    struct AllowAll;

    impl ExtBanCheck for AllowAll {
        fn check(&self, _: &User, _: &Channel, _: &dyn ExtBan) -> Decision {
            Decision::Allow
        }
    }

    #[test]
    fn check_hooks_run_first() {
        let registry = ExtBanRegistry::with_builtins();
        let chan = banned(&["r:*bot*", "*!*@h1.example"]);
        assert!(registry.is_banned(&user(), &chan));
        registry.add_check(Arc::new(AllowAll));
        assert!(!registry.is_banned(&user(), &chan));
    }

    #[test]
    fn plain_masks_and_builtins() {
        let registry = ExtBanRegistry::with_builtins();
        assert!(registry.is_banned(&user(), &banned(&["*!*@H1.example"])));
        assert!(registry.is_banned(&user(), &banned(&["j:#lob*"])));
        assert!(registry.is_banned(&user(), &banned(&["U:*!al@*"])));
        assert!(!registry.is_banned(&user(), &banned(&["a:*"])));
        assert!(!registry.is_banned(&user(), &banned(&["*!*@h2"])));
    }
}
