//! Netsplit handling.
//!
//! When a server leaves, everything reachable only through it goes with
//! it: the servers behind it, their users, those users' memberships, and
//! any channel left empty. The store removes all of that in one batch.

use crate::state::{Matrix, Uid};
use crate::telemetry::spans;
use linkd_proto::{Record, RecordBody, ServerId};
use tracing::{debug, info};

/// What a split took out of the network.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SplitReport {
    /// Lost servers, deepest first, the split server last.
    pub servers: Vec<ServerId>,
    pub users: Vec<Uid>,
    pub channels: Vec<String>,
    pub memberships: usize,
}

impl SplitReport {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Split `dead` and everything behind it off the network.
///
/// All removals are applied before any listener hears about the split.
/// The `SQUIT` is propagated to the remaining links except `via`, the link
/// that told us about it.
pub fn handle_netsplit(
    matrix: &Matrix,
    dead: &ServerId,
    reason: &str,
    via: Option<&ServerId>,
) -> SplitReport {
    let span = spans::split(dead.as_str());
    let _enter = span.enter();
    let sync = &matrix.sync;

    let affected = sync.topology.get_downstream_sids(dead);
    if affected.is_empty() || *dead == sync.local_id {
        debug!(sid = %dead, "Split of unknown server ignored");
        return SplitReport::default();
    }
    info!(affected = affected.len(), reason = %reason, "Netsplit detected, calculating affected scope");

    // Names go with the topology entries, so take them first.
    let names: Vec<(ServerId, String)> = affected
        .iter()
        .rev()
        .map(|sid| {
            let name = sync
                .topology
                .get(sid)
                .map(|info| info.name)
                .unwrap_or_else(|| sid.to_string());
            (sid.clone(), name)
        })
        .collect();

    let removed = matrix
        .store
        .remove_users_where(|user| affected.contains(&user.server));
    sync.topology.remove_servers(&affected);
    for sid in &affected {
        sync.links.remove(sid);
    }

    let report = SplitReport {
        servers: names.iter().map(|(sid, _)| sid.clone()).collect(),
        users: removed.users,
        channels: removed.channels,
        memberships: removed.memberships,
    };

    for listener in sync.listeners.link() {
        for (sid, name) in &names {
            listener.on_server_split(sid, name, &report);
        }
    }

    let squit = Record::new(
        sync.local_id.clone(),
        RecordBody::Squit {
            sid: dead.clone(),
            reason: reason.to_string(),
        },
    );
    sync.broadcast(&squit, via);

    info!(
        servers_removed = report.servers.len(),
        users_removed = report.users.len(),
        channels_destroyed = report.channels.len(),
        "Netsplit cleanup complete"
    );
    report
}

/// The conventional quit reason for users lost in a split.
pub fn netsplit_reason(local_name: &str, remote_name: &str) -> String {
    format!("{} {}", local_name, remote_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netsplit_reason_format() {
        assert_eq!(
            netsplit_reason("irc.local.net", "irc.remote.net"),
            "irc.local.net irc.remote.net"
        );
    }
}
