//! # linkd-proto
//!
//! Protocol-level building blocks for the linkd server-to-server core:
//!
//! - RFC 1459 case mapping for channel and nick names
//! - Server identifiers (SIDs)
//! - Peer-link wire records with parsing and serialization
//! - A `tokio_util` codec framing those records one per line
//! - Numeric reply codes and a small numeric reply type
//!
//! ```rust
//! use linkd_proto::{Record, RecordBody};
//!
//! let record: Record = ":00A QUIT 00AAAAAAB :Client exited".parse().unwrap();
//! assert!(matches!(record.body, RecordBody::Quit { .. }));
//! assert_eq!(record.to_string(), ":00A QUIT 00AAAAAAB :Client exited");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
#[cfg(feature = "tokio")]
pub mod codec;
pub mod error;
pub mod ids;
pub mod record;
pub mod response;

pub use casemap::{irc_eq, irc_lower_char, irc_to_lower};
#[cfg(feature = "tokio")]
pub use codec::RecordCodec;
pub use error::ProtocolError;
pub use ids::ServerId;
pub use record::{ListItem, MemberEntry, ModeItem, ParamItem, Record, RecordBody};
pub use response::{Numeric, Response};
