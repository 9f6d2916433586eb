//! Burst generation.
//!
//! When a link completes its handshake we send the peer our whole view of
//! the network, in a fixed order: the servers behind us, then one event
//! per user, then one per channel, then exactly one network metadata
//! event. Channel membership assumes its users are known and network
//! metadata assumes every channel is, so the order is part of the
//! protocol.

use super::observer::SyncListener;
use super::topology::ServerInfo;
use crate::state::{Channel, Matrix, User};
use linkd_proto::{ListItem, MemberEntry, ParamItem, Record, RecordBody, ServerId};
use std::sync::Arc;

/// One unit of burst work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Server(ServerInfo),
    User(User),
    Channel(Channel),
    Network(Vec<(String, String)>),
}

/// Walks the store once for a peer and produces its burst.
pub struct SyncDispatcher<'a> {
    matrix: &'a Matrix,
    peer: &'a ServerId,
    listeners: Vec<Arc<dyn SyncListener>>,
}

impl<'a> SyncDispatcher<'a> {
    pub fn new(matrix: &'a Matrix, peer: &'a ServerId) -> Self {
        Self {
            matrix,
            peer,
            listeners: matrix.sync.listeners.sync(),
        }
    }

    /// Generate the burst events in protocol order, telling sync listeners
    /// about each as it is produced.
    ///
    /// Anything that lives behind the peer itself is left out.
    pub fn generate(&self) -> Vec<SyncEvent> {
        let sync = &self.matrix.sync;
        let mut events: Vec<SyncEvent> = sync
            .topology
            .introduction_order(&sync.local_id, self.peer)
            .into_iter()
            .map(SyncEvent::Server)
            .collect();

        let behind_peer = sync.topology.get_downstream_sids(self.peer);
        for user in self.matrix.store.users() {
            if behind_peer.contains(&user.server) {
                continue;
            }
            for listener in &self.listeners {
                listener.on_sync_user(self.peer, &user);
            }
            events.push(SyncEvent::User(user));
        }

        for mut channel in self.matrix.store.channels() {
            let was_empty = channel.is_empty();
            channel
                .members
                .retain(|uid, _| ServerId::of_uid(uid).is_none_or(|sid| !behind_peer.contains(&sid)));
            if channel.is_empty() && !was_empty {
                continue;
            }
            for listener in &self.listeners {
                listener.on_sync_channel(self.peer, &channel);
            }
            events.push(SyncEvent::Channel(channel));
        }

        let mut metadata: Vec<(String, String)> = self
            .matrix
            .network_info
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        metadata.sort();
        for listener in &self.listeners {
            listener.on_sync_network(self.peer, &mut metadata);
        }
        events.push(SyncEvent::Network(metadata));
        events
    }

    /// Generate the burst and encode it as wire records.
    pub fn records(&self) -> Vec<Record> {
        into_records(&self.matrix.sync.local_id, self.generate())
    }
}

/// Encode burst events. Users are sourced from their own server; everything
/// else from us.
pub fn into_records(local: &ServerId, events: Vec<SyncEvent>) -> Vec<Record> {
    let mut records = Vec::with_capacity(events.len());
    for event in events {
        match event {
            SyncEvent::Server(info) => records.push(Record::new(
                info.via.unwrap_or_else(|| local.clone()),
                RecordBody::Server {
                    sid: info.sid,
                    name: info.name,
                    description: info.description,
                },
            )),
            SyncEvent::User(user) => records.push(Record::new(
                user.server,
                RecordBody::Uid {
                    uid: user.uid,
                    nick: user.nick,
                    user: user.user,
                    host: user.host,
                    ts: user.created_at,
                    account: user.account,
                    realname: user.realname,
                },
            )),
            SyncEvent::Channel(channel) => channel_records(local, channel, &mut records),
            SyncEvent::Network(metadata) => {
                records.push(Record::new(local.clone(), RecordBody::Netinfo { metadata }))
            }
        }
    }
    records
}

/// `SJOIN`, then one `LMODE` per non-empty list, then `FTOPIC` if set.
fn channel_records(local: &ServerId, channel: Channel, out: &mut Vec<Record>) {
    let mut members: Vec<MemberEntry> = channel
        .members
        .values()
        .map(|m| MemberEntry {
            prefixes: m.prefix_letters(),
            uid: m.uid.clone(),
        })
        .collect();
    members.sort_by(|a, b| a.uid.cmp(&b.uid));

    out.push(Record::new(
        local.clone(),
        RecordBody::Sjoin {
            channel: channel.name.clone(),
            ts: channel.created,
            params: channel
                .params
                .iter()
                .map(|(letter, p)| ParamItem {
                    letter: *letter,
                    set_at: p.set_at,
                    value: p.value.clone(),
                })
                .collect(),
            members,
        },
    ));

    for (letter, entries) in &channel.lists {
        if entries.is_empty() {
            continue;
        }
        out.push(Record::new(
            local.clone(),
            RecordBody::Lmode {
                channel: channel.name.clone(),
                letter: *letter,
                entries: entries
                    .iter()
                    .map(|e| ListItem {
                        mask: e.mask.clone(),
                        setter: e.set_by.clone(),
                        set_at: e.set_at,
                    })
                    .collect(),
            },
        ));
    }

    if let Some(topic) = channel.topic {
        out.push(Record::new(
            local.clone(),
            RecordBody::Ftopic {
                channel: channel.name,
                set_at: topic.set_at,
                setter: topic.set_by,
                text: topic.text,
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use parking_lot::Mutex;

    fn matrix() -> Matrix {
        let config = Config::from_toml(
            r#"
            [server]
            name = "hub.straylight.net"
            sid = "00A"
            "#,
        )
        .unwrap();
        Matrix::new(config)
    }

    fn server(sid: &str, via: &str, hopcount: u32) -> ServerInfo {
        ServerInfo {
            sid: ServerId::new(sid),
            name: format!("{}.straylight.net", sid.to_lowercase()),
            description: String::new(),
            hopcount,
            via: Some(ServerId::new(via)),
        }
    }

    /// `00A` with `00B` and `00C` linked directly, and `00D` behind `00C`.
    fn network() -> Matrix {
        let m = matrix();
        m.sync.topology.add_server(server("00B", "00A", 1));
        m.sync.topology.add_server(server("00C", "00A", 1));
        m.sync.topology.add_server(server("00D", "00C", 2));
        for (uid, nick) in [("00AAAAAAB", "alice"), ("00BAAAAAB", "bob"), ("00DAAAAAB", "dave")] {
            m.store
                .add_user(User::new(uid, nick, nick, "host", nick, 1))
                .unwrap();
        }
        m.store.add_membership("00AAAAAAB", "#mixed", &[('o', 30_000)], 5).unwrap();
        m.store.add_membership("00DAAAAAB", "#mixed", &[], 5).unwrap();
        m.store.add_membership("00DAAAAAB", "#theirs", &[], 5).unwrap();
        m
    }

    #[test]
    fn burst_is_ordered_and_skips_the_peers_side() {
        let m = network();
        let peer = ServerId::new("00C");
        let records = SyncDispatcher::new(&m, &peer).records();
        let commands: Vec<&str> = records.iter().map(|r| r.body.command()).collect();
        assert_eq!(commands, ["SERVER", "UID", "UID", "SJOIN", "NETINFO"]);

        let RecordBody::Server { sid, .. } = &records[0].body else {
            panic!("expected SERVER");
        };
        assert_eq!(sid.as_str(), "00B");
        assert_eq!(records[2].source.as_str(), "00B");
        let RecordBody::Sjoin { channel, members, .. } = &records[3].body else {
            panic!("expected SJOIN");
        };
        assert_eq!(channel, "#mixed");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].prefixes, "o");
    }

    #[test]
    fn channel_lists_and_topic_follow_sjoin() {
        let m = matrix();
        m.store.add_user(User::new("00AAAAAAB", "alice", "a", "h", "A", 1)).unwrap();
        m.store.add_membership("00AAAAAAB", "#c", &[], 5).unwrap();
        m.store.update_channel("#c", |c| {
            c.params.insert('l', crate::state::ParamEntry {
                value: "9".into(),
                set_at: 6,
            });
            c.lists.insert('b', vec![crate::state::ListEntry {
                mask: "*!*@x".into(),
                set_by: "alice".into(),
                set_at: 7,
            }]);
            c.topic = Some(crate::state::Topic {
                text: "hi".into(),
                set_by: "alice".into(),
                set_at: 8,
            });
        });
        let peer = ServerId::new("00B");
        let lines: Vec<String> = SyncDispatcher::new(&m, &peer)
            .records()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            lines[1..4],
            [
                ":00A SJOIN #c 5 l,6,9 :,00AAAAAAB".to_string(),
                ":00A LMODE #c b :*!*@x alice 7".to_string(),
                ":00A FTOPIC #c 8 alice :hi".to_string(),
            ]
        );
    }

    #[derive(Default)]
    struct Tap(Mutex<Vec<String>>);

    impl SyncListener for Tap {
        fn on_sync_user(&self, _peer: &ServerId, user: &User) {
            self.0.lock().push(user.nick.clone());
        }

        fn on_sync_network(&self, _peer: &ServerId, metadata: &mut Vec<(String, String)>) {
            metadata.push(("extra".into(), "1".into()));
        }
    }

    #[test]
    fn sync_listeners_see_each_event() {
        let m = network();
        let tap = Arc::new(Tap::default());
        m.sync.listeners.add_sync(tap.clone());
        let peer = ServerId::new("00B");
        let events = SyncDispatcher::new(&m, &peer).generate();
        assert_eq!(*tap.0.lock(), ["alice", "dave"]);
        let Some(SyncEvent::Network(metadata)) = events.last() else {
            panic!("burst must end with network metadata");
        };
        assert!(metadata.contains(&("extra".to_string(), "1".to_string())));
    }
}
