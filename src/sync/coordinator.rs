//! The per-peer link state machine.
//!
//! One `LinkCoordinator` runs per connection and sees that connection's
//! records strictly in arrival order. It drives the link through
//! `Idle -> Bursting -> Synced -> SplitPending -> Idle`, applies the peer's
//! burst and later deltas to the store, and enforces the burst ordering:
//! servers, then users, then channels, then one `NETINFO`.
//!
//! Structural and ordering problems are fatal `ProtocolViolation`s. A
//! reference to a mode we do not know is logged and skipped, as are
//! per-entity failures such as a refused mode change.

use super::burst::SyncDispatcher;
use super::filter::ChannelEvent;
use super::link::{LinkState, ServerLink};
use super::split::{SplitReport, handle_netsplit};
use super::topology::ServerInfo;
use crate::error::{LinkError, ModeError, StoreError};
use crate::modes::{Actor, ApplyOutcome, ModeKind, ModeRequest, merge_lists, merge_param};
use crate::state::{ListEntry, Matrix, ParamEntry, Topic, User};
use linkd_proto::{
    ListItem, MemberEntry, ModeItem, ParamItem, Record, RecordBody, ServerId, irc_to_lower,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Which part of the peer's burst we are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum BurstPhase {
    Servers,
    Users,
    Channels,
}

#[derive(Debug, Default, Clone, Copy)]
struct BurstCounts {
    servers: usize,
    users: usize,
    channels: usize,
}

pub struct LinkCoordinator {
    matrix: Arc<Matrix>,
    peer: ServerId,
    name: String,
    description: String,
    state: LinkState,
    phase: BurstPhase,
    counts: BurstCounts,
    /// Case-folded channels an `SJOIN` from this peer left empty, so they
    /// were destroyed. Their `LMODE` and `FTOPIC` are skipped.
    dropped: HashSet<String>,
}

impl LinkCoordinator {
    pub fn new(
        matrix: Arc<Matrix>,
        peer: ServerId,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            matrix,
            peer,
            name: name.into(),
            description: description.into(),
            state: LinkState::Idle,
            phase: BurstPhase::Servers,
            counts: BurstCounts::default(),
            dropped: HashSet::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn peer(&self) -> &ServerId {
        &self.peer
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn transition(&mut self, next: LinkState) {
        if !self.state.can_transition_to(next) {
            debug!(from = %self.state, to = %next, "Ignoring illegal link transition");
            return;
        }
        info!(from = %self.state, to = %next, "Link state change");
        self.state = next;
        self.matrix.sync.set_link_state(&self.peer, next);
    }

    /// The transport handshake finished: register the link and return our
    /// burst for the caller to write before anything queued on `tx`.
    pub fn handshake_complete(&mut self, tx: mpsc::Sender<Record>) -> Result<Vec<Record>, LinkError> {
        if self.state != LinkState::Idle {
            return Err(LinkError::violation("handshake repeated"));
        }
        let link = ServerLink::new(self.peer.clone(), self.name.clone(), tx);
        self.matrix.sync.register_link(link, &self.description)?;
        self.transition(LinkState::Bursting);
        // Everyone else learns about the peer before anything relayed from
        // its burst.
        let intro = Record::new(
            self.matrix.sync.local_id.clone(),
            RecordBody::Server {
                sid: self.peer.clone(),
                name: self.name.clone(),
                description: self.description.clone(),
            },
        );
        self.relay(&intro);

        let burst = SyncDispatcher::new(&self.matrix, &self.peer).records();
        info!(records = burst.len(), "Sending burst");
        Ok(burst)
    }

    /// Apply one record from the peer.
    pub fn handle(&mut self, record: Record) -> Result<(), LinkError> {
        match self.state {
            LinkState::Bursting | LinkState::Synced => {}
            state => {
                return Err(LinkError::violation(format!(
                    "{} while link is {}",
                    record.body.command(),
                    state
                )));
            }
        }
        self.check_source(&record.source)?;

        if self.state == LinkState::Bursting {
            self.handle_burst(record)
        } else {
            self.handle_delta(record)
        }
    }

    /// Tear the link down. Everything only reachable through the peer is
    /// removed. Returns `None` if the link never got past `Idle`.
    pub fn link_lost(&mut self, reason: &str) -> Option<SplitReport> {
        if !self.state.can_transition_to(LinkState::SplitPending) {
            return None;
        }
        self.transition(LinkState::SplitPending);
        let report = handle_netsplit(&self.matrix, &self.peer, reason, None);
        self.transition(LinkState::Idle);
        Some(report)
    }

    /// Records must come from the peer or a server behind it.
    fn check_source(&self, source: &ServerId) -> Result<(), LinkError> {
        if *source == self.peer
            || self.matrix.sync.topology.first_hop(source).as_ref() == Some(&self.peer)
        {
            Ok(())
        } else {
            Err(LinkError::violation(format!(
                "record from {} which is not behind this link",
                source
            )))
        }
    }

    fn enter_phase(&mut self, phase: BurstPhase, command: &str) -> Result<(), LinkError> {
        if phase < self.phase {
            return Err(LinkError::violation(format!(
                "{} after {:?} phase of burst",
                command, self.phase
            )));
        }
        self.phase = phase;
        Ok(())
    }

    /// Apply one burst record, then relay it to our other links so they see
    /// the peer's side as it arrives.
    fn handle_burst(&mut self, record: Record) -> Result<(), LinkError> {
        let command = record.body.command();
        let relay = record.clone();
        match record.body {
            RecordBody::Server {
                sid,
                name,
                description,
            } => {
                self.enter_phase(BurstPhase::Servers, command)?;
                self.introduce_server(&record.source, sid, name, description)?;
                self.counts.servers += 1;
                self.relay(&relay);
            }
            RecordBody::Uid {
                uid,
                nick,
                user,
                host,
                ts,
                account,
                realname,
            } => {
                self.enter_phase(BurstPhase::Users, command)?;
                let mut u = User::new(uid, nick, user, host, realname, ts);
                u.account = account;
                if self.introduce_user(u)? {
                    self.counts.users += 1;
                    self.relay(&relay);
                }
            }
            RecordBody::Sjoin {
                channel,
                ts,
                params,
                members,
            } => {
                self.enter_phase(BurstPhase::Channels, command)?;
                self.merge_channel(&channel, ts, &params, &members)?;
                self.counts.channels += 1;
                self.relay_channel(&channel, relay);
            }
            RecordBody::Lmode {
                channel,
                letter,
                entries,
            } => {
                self.enter_phase(BurstPhase::Channels, command)?;
                self.merge_list(&channel, letter, &entries)?;
                self.relay_channel(&channel, relay);
            }
            RecordBody::Ftopic {
                channel,
                set_at,
                setter,
                text,
            } => {
                self.enter_phase(BurstPhase::Channels, command)?;
                if self.merge_topic(&channel, set_at, setter, text)? {
                    self.relay_channel(&channel, relay);
                }
            }
            RecordBody::Netinfo { metadata } => {
                self.merge_network_info(metadata);
                self.relay(&relay);
                self.finish_burst();
            }
            _ => {
                return Err(LinkError::violation(format!(
                    "{} before end of burst",
                    command
                )));
            }
        }
        Ok(())
    }

    fn finish_burst(&mut self) {
        self.transition(LinkState::Synced);
        info!(
            servers = self.counts.servers,
            users = self.counts.users,
            channels = self.counts.channels,
            "Burst complete"
        );
        for listener in self.matrix.sync.listeners.link() {
            listener.on_server_link(&self.peer, &self.name);
        }
    }

    fn handle_delta(&mut self, record: Record) -> Result<(), LinkError> {
        let source = record.source.clone();
        let relay = record.clone();
        match record.body {
            RecordBody::Server {
                sid,
                name,
                description,
            } => {
                self.introduce_server(&source, sid, name, description)?;
                self.relay(&relay);
            }
            RecordBody::Uid {
                uid,
                nick,
                user,
                host,
                ts,
                account,
                realname,
            } => {
                let mut u = User::new(uid, nick, user, host, realname, ts);
                u.account = account;
                if self.introduce_user(u)? {
                    self.relay(&relay);
                }
            }
            RecordBody::Sjoin {
                channel,
                ts,
                params,
                members,
            } => {
                self.merge_channel(&channel, ts, &params, &members)?;
                self.relay_channel(&channel, relay);
            }
            RecordBody::Lmode {
                channel,
                letter,
                entries,
            } => {
                self.merge_list(&channel, letter, &entries)?;
                self.relay_channel(&channel, relay);
            }
            RecordBody::Ftopic {
                channel,
                set_at,
                setter,
                text,
            } => {
                if self.merge_topic(&channel, set_at, setter, text)? {
                    self.relay_channel(&channel, relay);
                }
            }
            RecordBody::Netinfo { metadata } => {
                self.merge_network_info(metadata);
                self.relay(&relay);
            }
            RecordBody::Mode {
                channel,
                ts,
                setter,
                changes,
            } => {
                let applied = self.apply_modes(&channel, ts, &setter, changes);
                if !applied.is_empty() {
                    let record = Record::new(
                        source,
                        RecordBody::Mode {
                            channel: channel.clone(),
                            ts,
                            setter,
                            changes: applied,
                        },
                    );
                    self.relay_channel(&channel, record);
                }
            }
            RecordBody::Join { channel, member } => {
                self.add_member(&channel, &member, Matrix::now())?;
                self.relay_channel(&channel, relay);
            }
            RecordBody::Part { channel, uid, .. } => {
                match self.matrix.store.remove_membership(&uid, &channel) {
                    Ok(_) => self.relay_channel(&channel, relay),
                    Err(e) => debug!(channel = %channel, uid = %uid, error = %e, "Ignoring PART"),
                }
            }
            RecordBody::Quit { uid, .. } => {
                if self.matrix.store.remove_user(&uid).is_some() {
                    self.relay(&relay);
                } else {
                    debug!(uid = %uid, "Ignoring QUIT for unknown user");
                }
            }
            RecordBody::Squit { sid, reason } => {
                if sid == self.peer {
                    return Err(LinkError::Squit(reason));
                }
                if self.matrix.sync.topology.first_hop(&sid).as_ref() != Some(&self.peer) {
                    warn!(sid = %sid, "Ignoring SQUIT for server not behind this link");
                    return Ok(());
                }
                handle_netsplit(&self.matrix, &sid, &reason, Some(&self.peer));
            }
        }
        Ok(())
    }

    fn relay(&self, record: &Record) {
        self.matrix.sync.broadcast(record, Some(&self.peer));
    }

    fn relay_channel(&self, channel: &str, record: Record) {
        let event = ChannelEvent::relayed(channel, self.peer.clone(), record);
        self.matrix.sync.broadcast_channel(&event);
    }

    // ------------------------------------------------------------------
    // State application
    // ------------------------------------------------------------------

    fn introduce_server(
        &self,
        uplink: &ServerId,
        sid: ServerId,
        name: String,
        description: String,
    ) -> Result<(), LinkError> {
        if sid == self.peer && *uplink == self.peer {
            // The peer's own introduction, already handled by the handshake.
            return Ok(());
        }
        let topology = &self.matrix.sync.topology;
        let hopcount = topology.get(uplink).map(|s| s.hopcount + 1).unwrap_or(1);
        let added = topology.add_server(ServerInfo {
            sid: sid.clone(),
            name: name.clone(),
            description,
            hopcount,
            via: Some(uplink.clone()),
        });
        if !added {
            return Err(LinkError::violation(format!(
                "server {} introduced twice",
                sid
            )));
        }
        debug!(sid = %sid, name = %name, via = %uplink, "Server introduced");
        Ok(())
    }

    /// Returns `false` if the user collided with one we already have.
    fn introduce_user(&self, user: User) -> Result<bool, LinkError> {
        if self.matrix.sync.topology.first_hop(&user.server).as_ref() != Some(&self.peer) {
            return Err(LinkError::violation(format!(
                "user {} belongs to server {} which is not behind this link",
                user.uid, user.server
            )));
        }
        match self.matrix.store.add_user(user) {
            Ok(()) => Ok(true),
            Err(StoreError::UserExists(uid)) => {
                warn!(uid = %uid, "UID collision, keeping existing user");
                Ok(false)
            }
            Err(e) => Err(LinkError::violation(e.to_string())),
        }
    }

    fn prefix_ranks(&self, channel: &str, member: &MemberEntry) -> Vec<(char, u32)> {
        let (ranks, unknown) = self.matrix.modes.prefix_ranks(&member.prefixes);
        for letter in unknown {
            warn!(mode = %letter, channel = %channel, "Skipping unknown prefix mode");
        }
        ranks
    }

    fn add_member(&self, channel: &str, member: &MemberEntry, created: i64) -> Result<(), LinkError> {
        let ranks = self.prefix_ranks(channel, member);
        self.matrix
            .store
            .add_membership(&member.uid, channel, &ranks, created)
            .map(|_| ())
            .map_err(|e| unknown_member(channel, e))
    }

    /// Merge an `SJOIN`: older creation time, resolved parameter modes,
    /// and the union of members and their prefixes, as one store step.
    fn merge_channel(
        &mut self,
        channel: &str,
        ts: i64,
        params: &[ParamItem],
        members: &[MemberEntry],
    ) -> Result<(), LinkError> {
        let mut incoming = Vec::with_capacity(params.len());
        for param in params {
            let Some(descriptor) = self.matrix.modes.get(param.letter) else {
                warn!(mode = %param.letter, channel = %channel, error = %LinkError::UnknownMode(param.letter), "Skipping mode");
                continue;
            };
            let ModeKind::Param(policy) = descriptor.kind else {
                warn!(mode = %param.letter, channel = %channel, "Skipping non-parameter mode in SJOIN");
                continue;
            };
            match descriptor.normalize(&param.value) {
                Ok(value) => incoming.push((
                    param.letter,
                    policy.conflict,
                    ParamEntry {
                        value,
                        set_at: param.set_at,
                    },
                )),
                Err(e) => warn!(channel = %channel, error = %e, "Skipping invalid mode value"),
            }
        }
        let members: Vec<(String, Vec<(char, u32)>)> = members
            .iter()
            .map(|m| (m.uid.clone(), self.prefix_ranks(channel, m)))
            .collect();

        let kept = self
            .matrix
            .store
            .merge_channel(channel, ts, &members, |chan| {
                if ts < chan.created {
                    chan.created = ts;
                }
                for (letter, conflict, theirs) in incoming {
                    let merged = match chan.params.get(&letter) {
                        None => theirs,
                        Some(ours) => {
                            let merged = merge_param(conflict, ours, &theirs);
                            if merged.value != ours.value {
                                debug!(channel = %chan.name, mode = %letter, old = %ours.value, new = %merged.value, "Parameter conflict resolved");
                            }
                            merged
                        }
                    };
                    chan.params.insert(letter, merged);
                }
            })
            .map_err(|e| unknown_member(channel, e))?;

        let key = irc_to_lower(channel);
        if kept {
            self.dropped.remove(&key);
        } else {
            debug!(channel = %channel, "SJOIN left channel empty, destroyed");
            self.dropped.insert(key);
        }
        Ok(())
    }

    /// `true` if `channel` is missing because an `SJOIN` from this peer
    /// emptied it.
    fn was_dropped(&self, channel: &str) -> bool {
        self.dropped.contains(&irc_to_lower(channel))
    }

    fn merge_list(&self, channel: &str, letter: char, entries: &[ListItem]) -> Result<(), LinkError> {
        let Some(descriptor) = self.matrix.modes.get(letter) else {
            warn!(mode = %letter, channel = %channel, error = %LinkError::UnknownMode(letter), "Skipping mode");
            return Ok(());
        };
        let ModeKind::List(policy) = descriptor.kind else {
            warn!(mode = %letter, channel = %channel, "Skipping LMODE for non-list mode");
            return Ok(());
        };
        let theirs: Vec<ListEntry> = entries
            .iter()
            .map(|item| ListEntry {
                mask: item.mask.clone(),
                set_by: item.setter.clone(),
                set_at: item.set_at,
            })
            .collect();

        let merged = self.matrix.store.update_channel(channel, |chan| {
            let merged = merge_lists(chan.list(letter), &theirs, policy.max_entries);
            if merged.is_empty() {
                chan.lists.remove(&letter);
            } else {
                chan.lists.insert(letter, merged);
            }
        });
        match merged {
            Some(()) => Ok(()),
            None if self.was_dropped(channel) => Ok(()),
            None => Err(LinkError::violation(format!("LMODE for unknown channel {}", channel))),
        }
    }

    /// Returns whether the topic changed.
    fn merge_topic(
        &self,
        channel: &str,
        set_at: i64,
        setter: String,
        text: String,
    ) -> Result<bool, LinkError> {
        let topic = Topic {
            text,
            set_by: setter,
            set_at,
        };
        match self
            .matrix
            .store
            .update_channel(channel, |chan| chan.absorb_topic(topic))
        {
            Some(changed) => Ok(changed),
            None if self.was_dropped(channel) => Ok(false),
            None => Err(LinkError::violation(format!("FTOPIC for unknown channel {}", channel))),
        }
    }

    /// Keys we do not have are added; on a clash the smaller value wins on
    /// both sides.
    fn merge_network_info(&self, metadata: Vec<(String, String)>) {
        for (key, value) in metadata {
            self.matrix
                .network_info
                .entry(key)
                .and_modify(|current| {
                    if value < *current {
                        *current = value.clone();
                    }
                })
                .or_insert(value);
        }
    }

    /// Apply a peer's mode changes as a server actor. Returns the ones that
    /// took effect.
    fn apply_modes(&self, channel: &str, ts: i64, setter: &str, changes: Vec<ModeItem>) -> Vec<ModeItem> {
        let actor = Actor::server(setter);
        let modes = &self.matrix.modes;
        let applied = self.matrix.store.update_channel(channel, |chan| {
            let mut applied = Vec::new();
            for change in changes {
                let request = ModeRequest::from(change);
                match modes.apply(chan, &actor, &request, ts) {
                    Ok(ApplyOutcome::Changed(change)) => applied.push(change.to_item()),
                    Ok(ApplyOutcome::Unchanged) => {}
                    Err(ModeError::UnknownMode(letter)) => {
                        warn!(mode = %letter, channel = %chan.name, error = %LinkError::UnknownMode(letter), "Skipping mode");
                    }
                    Err(e) => {
                        debug!(channel = %chan.name, error = %e, code = e.error_code(), "Peer mode change not applied");
                    }
                }
            }
            applied
        });
        applied.unwrap_or_else(|| {
            debug!(channel = %channel, "MODE for unknown channel ignored");
            Vec::new()
        })
    }
}

fn unknown_member(channel: &str, e: StoreError) -> LinkError {
    match e {
        StoreError::NoSuchUser(uid) => LinkError::violation(format!(
            "{} references unknown user {}",
            channel, uid
        )),
        e => LinkError::violation(e.to_string()),
    }
}
