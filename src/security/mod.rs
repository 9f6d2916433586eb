//! Ban matching.
//!
//! Ordinary `nick!user@host` masks and the extban registry that plugs
//! predicates into the ban list.

pub mod extban;

pub use extban::{ExtBan, ExtBanCheck, ExtBanMask, ExtBanRegistry, wildcard_match};
