//! linkd - Straylight link daemon core.
//!
//! The distributed channel-state core of an IRC network daemon: the channel
//! store and its mode registry, extended bans, the merge-time conflict
//! resolver, and the per-peer link machinery (burst, split, broadcast
//! filtering) that keeps every server's view of channels convergent.

pub mod config;
pub mod decision;
pub mod error;
pub mod modes;
pub mod security;
pub mod state;
pub mod sync;
pub mod telemetry;

pub use decision::Decision;
pub use state::Matrix;
