//! Sync Module - Server-to-Server Synchronization.
//!
//! Keeps every server's view of channels convergent: link state machines,
//! burst generation, netsplit teardown, and per-link broadcast filtering.

pub mod burst;
pub mod coordinator;
pub mod filter;
pub mod link;
pub mod manager;
pub mod network;
mod observer;
pub mod split;
mod topology;

pub use burst::{SyncDispatcher, SyncEvent};
pub use coordinator::LinkCoordinator;
pub use filter::{BroadcastFilter, BroadcastListener, ChannelEvent};
pub use link::{LinkState, ServerLink};
pub use manager::SyncManager;
pub use observer::{LinkListener, Listeners, SyncListener};
pub use split::{SplitReport, handle_netsplit, netsplit_reason};
pub use topology::{ServerInfo, TopologyGraph};
