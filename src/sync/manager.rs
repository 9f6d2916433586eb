//! The set of direct links and the fan-out of records to them.

use super::filter::{BroadcastFilter, ChannelEvent};
use super::link::{LinkState, ServerLink};
use super::observer::Listeners;
use super::topology::{ServerInfo, TopologyGraph};
use crate::config::ServerConfig;
use crate::error::LinkError;
use dashmap::DashMap;
use linkd_proto::{Record, ServerId};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Manages server-to-server links and what is sent down them.
pub struct SyncManager {
    pub local_id: ServerId,
    pub local_name: String,
    pub local_desc: String,
    /// Directly connected peers.
    pub links: DashMap<ServerId, ServerLink>,
    /// Every known server.
    pub topology: TopologyGraph,
    pub filter: BroadcastFilter,
    pub listeners: Listeners,
}

impl SyncManager {
    pub fn new(server: &ServerConfig) -> Self {
        let local_id = ServerId::new(server.sid.clone());
        let topology = TopologyGraph::new();
        topology.add_server(ServerInfo {
            sid: local_id.clone(),
            name: server.name.clone(),
            description: server.description.clone(),
            hopcount: 0,
            via: None,
        });
        Self {
            local_id,
            local_name: server.name.clone(),
            local_desc: server.description.clone(),
            links: DashMap::new(),
            topology,
            filter: BroadcastFilter::new(),
            listeners: Listeners::new(),
        }
    }

    /// Our own `SERVER` introduction, sent first on every new link.
    pub fn self_intro(&self) -> Record {
        Record::new(
            self.local_id.clone(),
            linkd_proto::RecordBody::Server {
                sid: self.local_id.clone(),
                name: self.local_name.clone(),
                description: self.local_desc.clone(),
            },
        )
    }

    /// Add a freshly handshaken peer as a direct link behind us.
    pub fn register_link(&self, link: ServerLink, description: &str) -> Result<(), LinkError> {
        let added = self.topology.add_server(ServerInfo {
            sid: link.sid.clone(),
            name: link.name.clone(),
            description: description.to_string(),
            hopcount: 1,
            via: Some(self.local_id.clone()),
        });
        if !added {
            return Err(LinkError::violation(format!(
                "server {} is already on the network",
                link.sid
            )));
        }
        self.links.insert(link.sid.clone(), link);
        Ok(())
    }

    pub fn set_link_state(&self, sid: &ServerId, state: LinkState) {
        if let Some(mut link) = self.links.get_mut(sid) {
            link.state = state;
        }
    }

    pub fn link_state(&self, sid: &ServerId) -> Option<LinkState> {
        self.links.get(sid).map(|link| link.state)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Send `record` to every open link except `via`. Returns how many
    /// links it was queued on.
    pub fn broadcast(&self, record: &Record, via: Option<&ServerId>) -> usize {
        self.fan_out(record, |sid| via != Some(sid))
    }

    /// Send a channel event to every open link the filter allows.
    pub fn broadcast_channel(&self, event: &ChannelEvent) -> usize {
        self.fan_out(&event.record, |sid| self.filter.should_send(event, sid))
    }

    /// Queue `record` on a single link.
    pub fn send_to(&self, sid: &ServerId, record: Record) -> Result<(), LinkError> {
        let tx = self
            .links
            .get(sid)
            .map(|link| link.tx.clone())
            .ok_or_else(|| LinkError::UnknownLink(sid.clone()))?;
        tx.try_send(record).map_err(|_| LinkError::Closed)
    }

    fn fan_out(&self, record: &Record, mut wanted: impl FnMut(&ServerId) -> bool) -> usize {
        let targets: Vec<(ServerId, _)> = self
            .links
            .iter()
            .filter(|link| link.state.is_open())
            .map(|link| (link.sid.clone(), link.tx.clone()))
            .collect();

        let mut sent = 0;
        let mut overflowed = Vec::new();
        for (sid, tx) in targets {
            if !wanted(&sid) {
                continue;
            }
            match tx.try_send(record.clone()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => overflowed.push(sid),
                Err(TrySendError::Closed(_)) => {
                    debug!(peer = %sid, "Link writer gone, record dropped");
                }
            }
        }

        // Dropping the sender closes the writer, which ends the link.
        for sid in overflowed {
            warn!(peer = %sid, "Outbound queue full, dropping link");
            self.links.remove(&sid);
        }
        sent
    }
}
