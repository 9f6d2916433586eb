//! Event listeners for external collaborators.
//!
//! Each listener kind keeps its own ordered list of handlers. Every method
//! has a no-op default so a handler implements only what it cares about.
//! Handlers are called with no store or registry lock held but must not
//! block.

use super::split::SplitReport;
use crate::state::{Channel, User};
use linkd_proto::ServerId;
use parking_lot::RwLock;
use std::sync::Arc;

/// Told about each event of an outgoing burst as it is generated.
pub trait SyncListener: Send + Sync {
    fn on_sync_user(&self, _peer: &ServerId, _user: &User) {}

    fn on_sync_channel(&self, _peer: &ServerId, _channel: &Channel) {}

    /// Push extra key/value pairs to carry in the burst's network metadata.
    fn on_sync_network(&self, _peer: &ServerId, _metadata: &mut Vec<(String, String)>) {}
}

/// Told when a server joins or leaves the network.
pub trait LinkListener: Send + Sync {
    /// A direct peer finished its burst.
    fn on_server_link(&self, _sid: &ServerId, _name: &str) {}

    /// A server was split off. Called for every lost server, deepest
    /// first, with the whole split's removals.
    fn on_server_split(&self, _sid: &ServerId, _name: &str, _report: &SplitReport) {}
}

#[derive(Default)]
pub struct Listeners {
    sync: RwLock<Vec<Arc<dyn SyncListener>>>,
    link: RwLock<Vec<Arc<dyn LinkListener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sync(&self, listener: Arc<dyn SyncListener>) {
        self.sync.write().push(listener);
    }

    pub fn add_link(&self, listener: Arc<dyn LinkListener>) {
        self.link.write().push(listener);
    }

    /// Registered sync listeners, in registration order.
    pub fn sync(&self) -> Vec<Arc<dyn SyncListener>> {
        self.sync.read().clone()
    }

    /// Registered link listeners, in registration order.
    pub fn link(&self) -> Vec<Arc<dyn LinkListener>> {
        self.link.read().clone()
    }
}
