//! Peer link state.

use linkd_proto::{Record, ServerId};
use std::fmt;
use std::time::Instant;
use tokio::sync::mpsc;

/// Where a link instance is in its life.
///
/// `Idle -> Bursting -> Synced -> SplitPending -> Idle`. A link lost while
/// still bursting splits as well. A new connection starts a fresh instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Idle,
    Bursting,
    Synced,
    SplitPending,
}

impl LinkState {
    pub fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (Idle, Bursting)
                | (Bursting, Synced)
                | (Bursting, SplitPending)
                | (Synced, SplitPending)
                | (SplitPending, Idle)
        )
    }

    /// Whether records may be queued to the peer.
    pub fn is_open(self) -> bool {
        matches!(self, LinkState::Bursting | LinkState::Synced)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Idle => "idle",
            LinkState::Bursting => "bursting",
            LinkState::Synced => "synced",
            LinkState::SplitPending => "split-pending",
        };
        f.write_str(s)
    }
}

/// A directly connected peer.
#[derive(Debug, Clone)]
pub struct ServerLink {
    pub sid: ServerId,
    pub name: String,
    pub state: LinkState,
    /// Outbound queue drained by the link's writer task.
    pub tx: mpsc::Sender<Record>,
    pub connected_at: Instant,
}

impl ServerLink {
    pub fn new(sid: ServerId, name: impl Into<String>, tx: mpsc::Sender<Record>) -> Self {
        Self {
            sid,
            name: name.into(),
            state: LinkState::Bursting,
            tx,
            connected_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LinkState::*;

    #[test]
    fn legal_transitions() {
        assert!(Idle.can_transition_to(Bursting));
        assert!(Bursting.can_transition_to(Synced));
        assert!(Synced.can_transition_to(SplitPending));
        assert!(SplitPending.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Synced));
        assert!(!Synced.can_transition_to(Bursting));
        assert!(!SplitPending.can_transition_to(Synced));
    }
}
