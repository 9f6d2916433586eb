//! Per-link forwarding of channel events.

mod common;

use common::matrix;
use linkd::Decision;
use linkd::state::Matrix;
use linkd::sync::{BroadcastListener, ChannelEvent, LinkState, ServerLink};
use linkd_proto::{Record, RecordBody, ServerId};
use std::sync::Arc;
use tokio::sync::mpsc;

fn sid(s: &str) -> ServerId {
    ServerId::new(s)
}

fn attach(m: &Matrix, peer: &str, capacity: usize) -> mpsc::Receiver<Record> {
    let (tx, rx) = mpsc::channel(capacity);
    let link = ServerLink::new(sid(peer), format!("{}.straylight.net", peer.to_lowercase()), tx);
    m.sync.register_link(link, "peer").unwrap();
    m.sync.set_link_state(&sid(peer), LinkState::Synced);
    rx
}

fn part(channel: &str, via: Option<&str>) -> ChannelEvent {
    let record = Record::new(
        sid("00A"),
        RecordBody::Part {
            channel: channel.into(),
            uid: "00BAAAAAB".into(),
            reason: None,
        },
    );
    match via {
        Some(v) => ChannelEvent::relayed(channel, sid(v), record),
        None => ChannelEvent::local(channel, record),
    }
}

fn drained(rx: &mut mpsc::Receiver<Record>) -> usize {
    let mut n = 0;
    while rx.try_recv().is_ok() {
        n += 1;
    }
    n
}

/// Answers for one channel and one link only.
struct Rule {
    channel: &'static str,
    link: &'static str,
    decision: Decision,
}

impl BroadcastListener for Rule {
    fn on_broadcast(&self, event: &ChannelEvent, link: &ServerId) -> Decision {
        if event.channel == self.channel && link.as_str() == self.link {
            self.decision
        } else {
            Decision::Passthru
        }
    }
}

#[test]
fn relayed_events_skip_their_origin() {
    let m = matrix("00A");
    let mut rx_b = attach(&m, "00B", 8);
    let mut rx_c = attach(&m, "00C", 8);

    assert_eq!(m.sync.broadcast_channel(&part("#c", Some("00B"))), 1);
    assert_eq!(drained(&mut rx_b), 0);
    assert_eq!(drained(&mut rx_c), 1);

    assert_eq!(m.sync.broadcast_channel(&part("#c", None)), 2);
    assert_eq!(drained(&mut rx_b), 1);
    assert_eq!(drained(&mut rx_c), 1);
}

#[test]
fn providers_override_the_topology_rule() {
    let m = matrix("00A");
    let mut rx_b = attach(&m, "00B", 8);
    let mut rx_c = attach(&m, "00C", 8);
    m.sync.filter.add_provider(Arc::new(Rule {
        channel: "#secret",
        link: "00C",
        decision: Decision::Deny,
    }));
    m.sync.filter.add_provider(Arc::new(Rule {
        channel: "#secret",
        link: "00B",
        decision: Decision::Allow,
    }));

    m.sync.broadcast_channel(&part("#secret", Some("00B")));
    assert_eq!(drained(&mut rx_b), 1, "allow sends back down the origin link");
    assert_eq!(drained(&mut rx_c), 0, "deny keeps it off the link");

    m.sync.broadcast_channel(&part("#open", Some("00B")));
    assert_eq!(drained(&mut rx_b), 0);
    assert_eq!(drained(&mut rx_c), 1);
}

#[test]
fn first_definite_provider_wins() {
    let m = matrix("00A");
    let mut rx_b = attach(&m, "00B", 8);
    for decision in [Decision::Passthru, Decision::Deny, Decision::Allow] {
        m.sync.filter.add_provider(Arc::new(Rule {
            channel: "#c",
            link: "00B",
            decision,
        }));
    }
    assert_eq!(m.sync.filter.decision(&part("#c", None), &sid("00B")), Decision::Deny);
    m.sync.broadcast_channel(&part("#c", None));
    assert_eq!(drained(&mut rx_b), 0);
}

#[test]
fn closed_links_get_nothing() {
    let m = matrix("00A");
    let mut rx_b = attach(&m, "00B", 8);
    m.sync.set_link_state(&sid("00B"), LinkState::SplitPending);
    assert_eq!(m.sync.broadcast_channel(&part("#c", None)), 0);
    assert_eq!(drained(&mut rx_b), 0);
}

#[test]
fn overflowing_link_is_dropped() {
    let m = matrix("00A");
    let _rx_b = attach(&m, "00B", 1);
    assert_eq!(m.sync.broadcast_channel(&part("#c", None)), 1);
    assert_eq!(m.sync.broadcast_channel(&part("#c", None)), 0);
    assert_eq!(m.sync.link_count(), 0);
}

#[test]
fn local_changes_reach_linked_peers() {
    let m = matrix("00A");
    let mut rx_b = attach(&m, "00B", 8);
    let alice = common::user("00A", "AAAAAB", "alice");
    let uid = alice.uid.clone();
    m.add_local_user(alice).unwrap();
    m.join(&uid, "#c").unwrap();

    let uid_record = rx_b.try_recv().unwrap();
    assert!(matches!(uid_record.body, RecordBody::Uid { .. }));
    let join = rx_b.try_recv().unwrap();
    assert_eq!(join.to_string(), format!(":00A JOIN #c o,{uid}"));
}
