//! Network topology tracking.
//!
//! Tracks the spanning tree of known servers through parent pointers so
//! that the set of servers lost behind a dead link can be computed.

use dashmap::DashMap;
use linkd_proto::ServerId;
use std::collections::{HashSet, VecDeque};

/// Information about a server in the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub sid: ServerId,
    pub name: String,
    pub description: String,
    /// Number of hops from this server.
    pub hopcount: u32,
    /// The server that introduced this one (its uplink). `None` only for
    /// our own entry.
    pub via: Option<ServerId>,
}

/// The network as a spanning tree rooted at this server.
#[derive(Debug, Default)]
pub struct TopologyGraph {
    servers: DashMap<ServerId, ServerInfo>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server. Returns `false` if the SID was already known.
    pub fn add_server(&self, info: ServerInfo) -> bool {
        match self.servers.entry(info.sid.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(info);
                true
            }
        }
    }

    pub fn get(&self, sid: &ServerId) -> Option<ServerInfo> {
        self.servers.get(sid).map(|info| info.clone())
    }

    pub fn contains(&self, sid: &ServerId) -> bool {
        self.servers.contains_key(sid)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Get the uplink of a server.
    pub fn get_route(&self, target: &ServerId) -> Option<ServerId> {
        self.servers.get(target).and_then(|info| info.via.clone())
    }

    /// The directly linked server through which `target` is reached.
    /// `None` for ourselves and unknown servers.
    pub fn first_hop(&self, target: &ServerId) -> Option<ServerId> {
        let mut current = target.clone();
        let mut seen = HashSet::new();
        loop {
            let via = self.get_route(&current)?;
            if self.get_route(&via).is_none() {
                return Some(current);
            }
            if !seen.insert(current.clone()) {
                return None;
            }
            current = via;
        }
    }

    /// `target` followed by every server behind it, parents before
    /// children, siblings in SID order.
    pub fn get_downstream_sids(&self, target_sid: &ServerId) -> Vec<ServerId> {
        if !self.contains(target_sid) {
            return Vec::new();
        }
        let mut result = Vec::new();
        let mut to_process = VecDeque::from([target_sid.clone()]);
        let mut processed = HashSet::new();

        while let Some(current) = to_process.pop_front() {
            if !processed.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());

            let mut children: Vec<ServerId> = self
                .servers
                .iter()
                .filter(|e| e.value().via.as_ref() == Some(&current))
                .map(|e| e.key().clone())
                .collect();
            children.sort();
            to_process.extend(children);
        }

        result
    }

    /// Every server except `root`, parents before children, leaving out
    /// anything behind `skip`. This is the order servers are introduced in
    /// a burst.
    pub fn introduction_order(&self, root: &ServerId, skip: &ServerId) -> Vec<ServerInfo> {
        let skipped: HashSet<ServerId> = self.get_downstream_sids(skip).into_iter().collect();
        self.get_downstream_sids(root)
            .into_iter()
            .filter(|sid| sid != root && !skipped.contains(sid))
            .filter_map(|sid| self.get(&sid))
            .collect()
    }

    /// Remove multiple servers from the topology.
    pub fn remove_servers(&self, sids: &[ServerId]) {
        for sid in sids {
            self.servers.remove(sid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> ServerId {
        ServerId::new(s)
    }

    fn add(graph: &TopologyGraph, s: &str, hop: u32, via: Option<&str>) {
        graph.add_server(ServerInfo {
            sid: sid(s),
            name: format!("{}.test", s),
            description: String::new(),
            hopcount: hop,
            via: via.map(sid),
        });
    }

    /// Local -> A -> {B, C}, B -> D
    fn tree() -> TopologyGraph {
        let graph = TopologyGraph::new();
        add(&graph, "001", 0, None);
        add(&graph, "00A", 1, Some("001"));
        add(&graph, "00C", 2, Some("00A"));
        add(&graph, "00B", 2, Some("00A"));
        add(&graph, "00D", 3, Some("00B"));
        graph
    }

    #[test]
    fn downstream_is_parent_first() {
        let graph = tree();
        assert_eq!(
            graph.get_downstream_sids(&sid("00A")),
            vec![sid("00A"), sid("00B"), sid("00C"), sid("00D")]
        );
        assert_eq!(graph.get_downstream_sids(&sid("00C")), vec![sid("00C")]);
        assert!(graph.get_downstream_sids(&sid("0ZZ")).is_empty());
    }

    #[test]
    fn first_hop_walks_to_direct_link() {
        let graph = tree();
        assert_eq!(graph.first_hop(&sid("00D")), Some(sid("00A")));
        assert_eq!(graph.first_hop(&sid("00A")), Some(sid("00A")));
        assert_eq!(graph.first_hop(&sid("001")), None);
    }

    #[test]
    fn introduction_skips_peer_subtree() {
        let graph = tree();
        add(&graph, "00E", 1, Some("001"));
        let order: Vec<ServerId> = graph
            .introduction_order(&sid("001"), &sid("00E"))
            .into_iter()
            .map(|s| s.sid)
            .collect();
        assert_eq!(order, vec![sid("00A"), sid("00B"), sid("00C"), sid("00D")]);
    }

    #[test]
    fn duplicate_sid_is_refused() {
        let graph = tree();
        assert!(!graph.add_server(ServerInfo {
            sid: sid("00B"),
            name: "dup".into(),
            description: String::new(),
            hopcount: 1,
            via: Some(sid("001")),
        }));
        assert_eq!(graph.get(&sid("00B")).unwrap().name, "00B.test");
    }
}
