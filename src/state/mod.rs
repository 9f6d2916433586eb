//! State management module.
//!
//! Contains the channel store, its entities, and the Matrix that ties the
//! store to the registries and the link machinery.

mod channel;
mod dashmap_ext;
mod matrix;
mod store;
mod user;

pub use channel::{Channel, ListEntry, Membership, ParamEntry, Topic};
pub use dashmap_ext::DashMapExt;
pub use matrix::{Matrix, ModeBatch};
pub use store::{ChannelPolicy, ChannelStore, PartOutcome, RemovalReport};
pub use user::{Uid, User};
