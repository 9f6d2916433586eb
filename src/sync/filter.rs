//! Per-link forwarding decisions for channel events.
//!
//! Providers are asked in registration order and the first one with an
//! opinion decides. With no opinion the topology rule applies: an event is
//! never sent back down the link it arrived on.

use crate::decision::Decision;
use linkd_proto::{Record, ServerId};
use parking_lot::RwLock;
use std::sync::Arc;

/// A channel event on its way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel: String,
    /// The direct link it arrived on, `None` when it happened here.
    pub via: Option<ServerId>,
    pub record: Record,
}

impl ChannelEvent {
    pub fn local(channel: impl Into<String>, record: Record) -> Self {
        Self {
            channel: channel.into(),
            via: None,
            record,
        }
    }

    pub fn relayed(channel: impl Into<String>, via: ServerId, record: Record) -> Self {
        Self {
            channel: channel.into(),
            via: Some(via),
            record,
        }
    }
}

/// A forwarding policy hook.
pub trait BroadcastListener: Send + Sync {
    fn on_broadcast(&self, _event: &ChannelEvent, _link: &ServerId) -> Decision {
        Decision::Passthru
    }
}

#[derive(Default)]
pub struct BroadcastFilter {
    providers: RwLock<Vec<Arc<dyn BroadcastListener>>>,
}

impl BroadcastFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&self, provider: Arc<dyn BroadcastListener>) {
        self.providers.write().push(provider);
    }

    /// The providers' combined answer for sending `event` down `link`.
    pub fn decision(&self, event: &ChannelEvent, link: &ServerId) -> Decision {
        let providers = self.providers.read().clone();
        Decision::first_of(providers.iter().map(|p| p.on_broadcast(event, link)))
    }

    pub fn should_send(&self, event: &ChannelEvent, link: &ServerId) -> bool {
        match self.decision(event, link) {
            Decision::Allow => true,
            Decision::Deny => false,
            Decision::Passthru => event.via.as_ref() != Some(link),
        }
    }
}
