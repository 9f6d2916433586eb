//! The Matrix - shared state for the daemon core.
//!
//! One `Matrix` is built at startup and handed to every link task. It owns
//! the channel store and the registries, plus the sync manager that fans
//! changes out to peers.

use super::store::{ChannelStore, PartOutcome};
use super::user::User;
use crate::config::Config;
use crate::error::{ModeError, StoreError};
use crate::modes::{Actor, ApplyOutcome, ModeChange, ModeRegistry, ModeRequest, OP_RANK};
use crate::security::ExtBanRegistry;
use crate::sync::{ChannelEvent, SyncManager};
use dashmap::DashMap;
use linkd_proto::{MemberEntry, Record, RecordBody};
use tracing::{debug, info};

/// The outcome of a batch of mode requests from one actor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModeBatch {
    /// Changes that took effect, in request order.
    pub applied: Vec<ModeChange>,
    /// Requests that were refused, with why.
    pub failed: Vec<(ModeRequest, ModeError)>,
}

/// The Matrix - central shared state container.
pub struct Matrix {
    pub config: Config,
    pub store: ChannelStore,
    pub modes: ModeRegistry,
    pub extbans: ExtBanRegistry,
    pub sync: SyncManager,
    /// Network-wide metadata exchanged at the end of every burst.
    pub network_info: DashMap<String, String>,
}

impl Matrix {
    pub fn new(config: Config) -> Self {
        let network_info = DashMap::new();
        network_info.insert("network".to_string(), config.server.network.clone());
        Self {
            store: ChannelStore::new(),
            modes: ModeRegistry::new(&config.limits),
            extbans: ExtBanRegistry::with_builtins(),
            sync: SyncManager::new(&config.server),
            network_info,
            config,
        }
    }

    /// Current unix time in seconds.
    pub fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn record(&self, body: RecordBody) -> Record {
        Record::new(self.sync.local_id.clone(), body)
    }

    /// Our `RPL_ISUPPORT` tokens for the core.
    pub fn isupport(&self) -> Vec<String> {
        vec![
            format!("CHANMODES={}", self.modes.chanmodes_token()),
            format!("EXTBAN={}", self.extbans.advertisement()),
            format!("NETWORK={}", self.config.server.network),
            format!("PREFIX={}", self.modes.prefix_token()),
        ]
    }

    /// Introduce a user connected to this server and announce it.
    pub fn add_local_user(&self, user: User) -> Result<(), StoreError> {
        let body = RecordBody::Uid {
            uid: user.uid.clone(),
            nick: user.nick.clone(),
            user: user.user.clone(),
            host: user.host.clone(),
            ts: user.created_at,
            account: user.account.clone(),
            realname: user.realname.clone(),
        };
        self.store.add_user(user)?;
        self.sync.broadcast(&self.record(body), None);
        Ok(())
    }

    /// Join a local user to a channel. The first user into an empty channel is
    /// made op. Returns `false` if the user was already there.
    pub fn join(&self, uid: &str, channel: &str) -> Result<bool, StoreError> {
        let (joined, founder) = self
            .store
            .join_channel(uid, channel, &[('o', OP_RANK)], Self::now())?;
        if joined {
            let member = MemberEntry {
                prefixes: if founder { "o".into() } else { String::new() },
                uid: uid.to_string(),
            };
            let record = self.record(RecordBody::Join {
                channel: channel.to_string(),
                member,
            });
            self.sync
                .broadcast_channel(&ChannelEvent::local(channel, record));
        }
        Ok(joined)
    }

    /// Part a local user from a channel.
    pub fn part(
        &self,
        uid: &str,
        channel: &str,
        reason: Option<&str>,
    ) -> Result<PartOutcome, StoreError> {
        let outcome = self.store.remove_membership(uid, channel)?;
        let record = self.record(RecordBody::Part {
            channel: channel.to_string(),
            uid: uid.to_string(),
            reason: reason.map(str::to_string),
        });
        self.sync
            .broadcast_channel(&ChannelEvent::local(channel, record));
        Ok(outcome)
    }

    /// Remove a local user from the network.
    pub fn quit(&self, uid: &str, reason: &str) -> bool {
        if self.store.remove_user(uid).is_none() {
            return false;
        }
        let record = self.record(RecordBody::Quit {
            uid: uid.to_string(),
            reason: reason.to_string(),
        });
        self.sync.broadcast(&record, None);
        true
    }

    /// Set a channel topic from a local user.
    pub fn set_topic(&self, uid: &str, channel: &str, text: &str) -> Result<(), ModeError> {
        let setter = self
            .store
            .find_user(uid)
            .map(|u| u.hostmask())
            .ok_or_else(|| ModeError::NotOnChannel(uid.to_string()))?;
        let now = Self::now();
        let name = self
            .store
            .update_channel(channel, |chan| {
                if !chan.members.contains_key(uid) {
                    return Err(ModeError::NotOnChannel(uid.to_string()));
                }
                chan.topic = Some(super::Topic {
                    text: text.to_string(),
                    set_by: setter.clone(),
                    set_at: now,
                });
                Ok(chan.name.clone())
            })
            .ok_or_else(|| ModeError::NoSuchChannel(channel.to_string()))??;
        let record = self.record(RecordBody::Ftopic {
            channel: name.clone(),
            set_at: now,
            setter,
            text: text.to_string(),
        });
        self.sync.broadcast_channel(&ChannelEvent::local(name, record));
        Ok(())
    }

    /// Apply mode requests from a local user.
    ///
    /// Each request is applied and checked on its own. Only what succeeded is
    /// propagated, as one `MODE` record, after every request has been
    /// decided.
    pub fn change_modes(
        &self,
        uid: &str,
        channel: &str,
        requests: &[ModeRequest],
    ) -> Result<ModeBatch, ModeError> {
        let nick = self
            .store
            .find_user(uid)
            .map(|u| u.nick)
            .ok_or_else(|| ModeError::NotOnChannel(uid.to_string()))?;
        let ts = Self::now();

        let batch = self
            .store
            .update_channel(channel, |chan| {
                let mut batch = ModeBatch::default();
                for request in requests {
                    // Rank is re-read per request: an earlier change in the
                    // batch may have altered it.
                    let actor = Actor::user(uid, nick.clone(), chan.rank_of(uid));
                    match self.modes.apply(chan, &actor, request, ts) {
                        Ok(ApplyOutcome::Changed(change)) => batch.applied.push(change),
                        Ok(ApplyOutcome::Unchanged) => {}
                        Err(e) => {
                            debug!(channel = %chan.name, error = %e, code = e.error_code(), "Mode change refused");
                            batch.failed.push((request.clone(), e));
                        }
                    }
                }
                batch
            })
            .ok_or_else(|| ModeError::NoSuchChannel(channel.to_string()))?;

        if let Some(first) = batch.applied.first() {
            let name = first.channel.clone();
            let record = self.record(RecordBody::Mode {
                channel: name.clone(),
                ts,
                setter: nick.clone(),
                changes: batch.applied.iter().map(ModeChange::to_item).collect(),
            });
            self.sync.broadcast_channel(&ChannelEvent::local(name.clone(), record));
            info!(nick = %nick, channel = %name, count = batch.applied.len(), "Channel modes changed");
        }
        Ok(batch)
    }

    /// Whether the user is banned from the channel. Unknown users or
    /// channels are never banned.
    pub fn is_banned(&self, uid: &str, channel: &str) -> bool {
        let Some(user) = self.store.find_user(uid) else {
            return false;
        };
        self.store
            .with_channel(channel, |chan| self.extbans.is_banned(&user, chan))
            .unwrap_or(false)
    }
}
