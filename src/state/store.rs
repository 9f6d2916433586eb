//! The channel state store.
//!
//! Owns every `Channel` and `Membership`. Channels live in a `DashMap` keyed
//! by case-folded name, each behind its own `Mutex`, so mutations on
//! different channels proceed in parallel while mutations on one channel are
//! serialized.
//!
//! A store-wide `gate` makes split teardown atomic: ordinary operations hold
//! it shared, a split holds it exclusively while it removes its whole batch.
//!
//! Lock order is gate, then channel mutex, then map or user shard. Shard
//! guards are never held while a channel mutex is taken.

use super::channel::{Channel, Membership};
use super::dashmap_ext::DashMapExt;
use super::user::{Uid, User};
use crate::error::StoreError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use linkd_proto::{Numeric, Response, irc_to_lower};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

type ChannelRef = Arc<Mutex<Channel>>;

/// Policy hook deciding whether an emptied channel is kept.
pub trait ChannelPolicy: Send + Sync {
    /// `true` keeps `channel` alive with zero members.
    fn is_permanent(&self, channel: &Channel) -> bool;
}

/// What a batch removal took out of the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    /// Users removed, with the channels they were in.
    pub users: Vec<Uid>,
    /// Channels destroyed because they became empty.
    pub channels: Vec<String>,
    /// Number of memberships removed.
    pub memberships: usize,
}

/// Result of `remove_membership`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    /// The channel still has members (or is permanent).
    Remaining,
    /// The last member left and the channel is gone.
    Destroyed,
}

pub struct ChannelStore {
    channels: DashMap<String, ChannelRef>,
    users: DashMap<Uid, User>,
    gate: RwLock<()>,
    policy: RwLock<Option<Arc<dyn ChannelPolicy>>>,
}

impl Default for ChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelStore {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            users: DashMap::new(),
            gate: RwLock::new(()),
            policy: RwLock::new(None),
        }
    }

    /// Install the permanent-channel policy.
    pub fn set_policy(&self, policy: Arc<dyn ChannelPolicy>) {
        *self.policy.write() = Some(policy);
    }

    fn is_permanent(&self, channel: &Channel) -> bool {
        self.policy
            .read()
            .as_ref()
            .is_some_and(|p| p.is_permanent(channel))
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn add_user(&self, user: User) -> Result<(), StoreError> {
        let _gate = self.gate.read();
        match self.users.entry(user.uid.clone()) {
            Entry::Occupied(_) => Err(StoreError::UserExists(user.uid)),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }

    pub fn find_user(&self, uid: &str) -> Option<User> {
        let _gate = self.gate.read();
        self.users.get_cloned(uid)
    }

    pub fn has_user(&self, uid: &str) -> bool {
        let _gate = self.gate.read();
        self.users.contains_key(uid)
    }

    /// Snapshot of every user, sorted by UID.
    pub fn users(&self) -> Vec<User> {
        let _gate = self.gate.read();
        let mut users = self.users.values_cloned();
        users.sort_by(|a, b| a.uid.cmp(&b.uid));
        users
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Remove a user from the network, parting every channel it was in.
    pub fn remove_user(&self, uid: &str) -> Option<RemovalReport> {
        let _gate = self.gate.read();
        if !self.users.contains_key(uid) {
            return None;
        }
        let mut report = RemovalReport::default();
        self.remove_user_locked(uid, &mut report);
        Some(report)
    }

    fn remove_user_locked(&self, uid: &str, report: &mut RemovalReport) {
        let Some((_, user)) = self.users.remove(uid) else {
            return;
        };
        for key in &user.channels {
            let Some(chan) = self.channels.get_cloned(key) else {
                continue;
            };
            let mut chan = chan.lock();
            if chan.members.remove(uid).is_some() {
                report.memberships += 1;
            }
            if chan.is_empty() && self.destroy_locked(&mut chan) {
                report.channels.push(chan.name.clone());
            }
        }
        report.users.push(user.uid);
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Get the handle for `name`, creating the channel if needed.
    fn get_or_create(&self, name: &str, created: i64) -> ChannelRef {
        self.channels
            .entry(irc_to_lower(name))
            .or_insert_with(|| {
                debug!(channel = %name, "Creating channel");
                Arc::new(Mutex::new(Channel::new(name, created)))
            })
            .clone()
    }

    /// Mark `chan` destroyed and unlink it. Caller holds its lock.
    fn destroy_locked(&self, chan: &mut Channel) -> bool {
        if chan.destroyed || self.is_permanent(chan) {
            return false;
        }
        chan.destroyed = true;
        let key = chan.key();
        self.channels.remove(&key);
        for uid in chan.members.keys() {
            if let Some(mut user) = self.users.get_mut(uid) {
                user.channels.remove(&key);
            }
        }
        chan.members.clear();
        debug!(channel = %chan.name, "Destroyed channel");
        true
    }

    /// Run `f` on the live channel called `name`, creating it if needed.
    /// Retries if the handle it grabbed was destroyed by a racing removal.
    fn with_live<R>(&self, name: &str, created: i64, f: impl FnOnce(&mut Channel) -> R) -> R {
        loop {
            let handle = self.get_or_create(name, created);
            let mut chan = handle.lock();
            if !chan.destroyed {
                return f(&mut chan);
            }
        }
    }

    /// Look up or create a channel. Returns a snapshot.
    pub fn create_channel(&self, name: &str, created: i64) -> Channel {
        let _gate = self.gate.read();
        self.with_live(name, created, |chan| chan.clone())
    }

    pub fn find_channel(&self, name: &str) -> Option<Channel> {
        self.with_channel(name, Channel::clone)
    }

    pub fn has_channel(&self, name: &str) -> bool {
        let _gate = self.gate.read();
        self.channels.contains_key(&irc_to_lower(name))
    }

    /// Run `f` against the channel under its lock. `f` must not call back
    /// into the store.
    pub fn with_channel<R>(&self, name: &str, f: impl FnOnce(&Channel) -> R) -> Option<R> {
        let _gate = self.gate.read();
        let handle = self.channels.get_cloned(&irc_to_lower(name))?;
        let chan = handle.lock();
        (!chan.destroyed).then(|| f(&chan))
    }

    /// Mutate the channel under its lock. `f` must not call back into the
    /// store. Emptying a channel through this is not allowed; membership
    /// changes go through `add_membership` / `remove_membership`.
    pub fn update_channel<R>(&self, name: &str, f: impl FnOnce(&mut Channel) -> R) -> Option<R> {
        let _gate = self.gate.read();
        let handle = self.channels.get_cloned(&irc_to_lower(name))?;
        let mut chan = handle.lock();
        (!chan.destroyed).then(|| f(&mut chan))
    }

    /// Snapshot of every channel, sorted by key.
    pub fn channels(&self) -> Vec<Channel> {
        let _gate = self.gate.read();
        let mut out: Vec<Channel> = self
            .channels
            .values_cloned()
            .into_iter()
            .map(|handle| handle.lock().clone())
            .filter(|c| !c.destroyed)
            .collect();
        out.sort_by_key(Channel::key);
        out
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    // ------------------------------------------------------------------
    // Memberships
    // ------------------------------------------------------------------

    /// Add `uid` to `channel` (creating the channel if needed) holding the
    /// given `(letter, rank)` prefixes. Returns `false` if the user was
    /// already a member; the prefixes are still granted.
    pub fn add_membership(
        &self,
        uid: &str,
        channel: &str,
        prefixes: &[(char, u32)],
        created: i64,
    ) -> Result<bool, StoreError> {
        let _gate = self.gate.read();
        self.with_populated(channel, created, |chan| {
            self.add_member_locked(chan, uid, prefixes)
        })
    }

    /// Add `uid` to `channel`, granting `founder` only if the channel had
    /// no members. The emptiness check and the insert happen under one
    /// lock, so at most one of several racing first joiners is granted.
    /// Returns whether the user was added and whether `founder` was granted.
    pub fn join_channel(
        &self,
        uid: &str,
        channel: &str,
        founder: &[(char, u32)],
        created: i64,
    ) -> Result<(bool, bool), StoreError> {
        let _gate = self.gate.read();
        self.with_populated(channel, created, |chan| {
            let first = chan.is_empty();
            let prefixes = if first { founder } else { &[] };
            let added = self.add_member_locked(chan, uid, prefixes)?;
            Ok((added, first && added))
        })
    }

    /// Merge a channel and its members as one step: `f` runs on the
    /// channel, then every `(uid, prefixes)` pair is added. Fails without
    /// touching the channel if any member is unknown. A channel left empty
    /// is destroyed before this returns unless policy keeps it; the result
    /// is `false` in that case.
    pub fn merge_channel(
        &self,
        name: &str,
        created: i64,
        members: &[(String, Vec<(char, u32)>)],
        f: impl FnOnce(&mut Channel),
    ) -> Result<bool, StoreError> {
        let _gate = self.gate.read();
        self.with_populated(name, created, |chan| {
            if let Some((uid, _)) = members.iter().find(|(uid, _)| !self.users.contains_key(uid)) {
                return Err(StoreError::NoSuchUser(uid.clone()));
            }
            f(chan);
            for (uid, prefixes) in members {
                self.add_member_locked(chan, uid, prefixes)?;
            }
            Ok(!chan.is_empty() || self.is_permanent(chan))
        })
    }

    /// Run `f` on the live channel and destroy it afterwards if it is left
    /// with no members, whether or not `f` succeeded.
    fn with_populated<R>(
        &self,
        name: &str,
        created: i64,
        f: impl FnOnce(&mut Channel) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.with_live(name, created, |chan| {
            let result = f(chan);
            if chan.is_empty() {
                self.destroy_locked(chan);
            }
            result
        })
    }

    /// Add a member under the channel lock. The user's shard is held while
    /// the back-reference is recorded, so a racing `remove_user` either
    /// fails this or finds the channel in the user's set.
    fn add_member_locked(
        &self,
        chan: &mut Channel,
        uid: &str,
        prefixes: &[(char, u32)],
    ) -> Result<bool, StoreError> {
        {
            let Some(mut user) = self.users.get_mut(uid) else {
                return Err(StoreError::NoSuchUser(uid.to_string()));
            };
            user.channels.insert(chan.key());
        }
        let fresh = !chan.members.contains_key(uid);
        let member = chan
            .members
            .entry(uid.to_string())
            .or_insert_with(|| Membership::new(uid));
        for (letter, rank) in prefixes {
            member.grant(*letter, *rank);
        }
        Ok(fresh)
    }

    /// Remove `uid` from `channel`. If that empties the channel it is
    /// destroyed before this returns, unless held permanent by policy.
    pub fn remove_membership(&self, uid: &str, channel: &str) -> Result<PartOutcome, StoreError> {
        let _gate = self.gate.read();
        let key = irc_to_lower(channel);
        let handle = self
            .channels
            .get_cloned(&key)
            .ok_or_else(|| StoreError::NoSuchChannel(channel.to_string()))?;
        let mut chan = handle.lock();
        if chan.destroyed {
            return Err(StoreError::NoSuchChannel(channel.to_string()));
        }
        if chan.members.remove(uid).is_none() {
            return Err(StoreError::NotOnChannel(uid.to_string()));
        }
        if let Some(mut user) = self.users.get_mut(uid) {
            user.channels.remove(&key);
        }
        if chan.is_empty() && self.destroy_locked(&mut chan) {
            Ok(PartOutcome::Destroyed)
        } else {
            Ok(PartOutcome::Remaining)
        }
    }

    /// Destroy a channel outright, removing all of its memberships.
    pub fn destroy_channel(&self, name: &str) -> bool {
        let _gate = self.gate.read();
        let Some(handle) = self.channels.get_cloned(&irc_to_lower(name)) else {
            return false;
        };
        let mut chan = handle.lock();
        if chan.destroyed {
            return false;
        }
        chan.destroyed = true;
        let key = chan.key();
        self.channels.remove(&key);
        for uid in chan.members.keys() {
            if let Some(mut user) = self.users.get_mut(uid) {
                user.channels.remove(&key);
            }
        }
        chan.members.clear();
        true
    }

    /// `RPL_BANLIST` for each entry of list mode `letter`, then
    /// `RPL_ENDOFBANLIST`. An unknown channel lists nothing.
    pub fn ban_list_replies(
        &self,
        server_name: &str,
        nick: &str,
        channel: &str,
        letter: char,
    ) -> Vec<Numeric> {
        let (name, entries) = self
            .with_channel(channel, |c| (c.name.clone(), c.list(letter).to_vec()))
            .unwrap_or_else(|| (channel.to_string(), Vec::new()));
        let mut replies: Vec<Numeric> = entries
            .into_iter()
            .map(|entry| {
                Numeric::new(
                    server_name,
                    Response::RPL_BANLIST,
                    vec![
                        nick.to_string(),
                        name.clone(),
                        entry.mask,
                        entry.set_by,
                        entry.set_at.to_string(),
                    ],
                )
            })
            .collect();
        replies.push(Numeric::new(
            server_name,
            Response::RPL_ENDOFBANLIST,
            vec![nick.to_string(), name, "End of channel ban list".to_string()],
        ));
        replies
    }

    // ------------------------------------------------------------------
    // Batch removal (splits)
    // ------------------------------------------------------------------

    /// Remove every user matching `doomed`, their memberships, and every
    /// channel left empty, as one step. Concurrent readers see the store
    /// either before or after the whole batch.
    pub fn remove_users_where<F>(&self, mut doomed: F) -> RemovalReport
    where
        F: FnMut(&User) -> bool,
    {
        let _gate = self.gate.write();
        let uids = self.users.keys_where(|u| doomed(u));
        let mut report = RemovalReport::default();
        for uid in &uids {
            self.remove_user_locked(uid, &mut report);
        }
        report.users.sort();
        report.channels.sort();
        report
    }
}
