//! Unified error handling for linkd.
//!
//! Local per-entity failures (`ModeError`, `StoreError`, `ExtBanError`) are
//! recoverable and leave state untouched. `LinkError` covers the peer link;
//! a fatal `LinkError` tears the link down and triggers split handling.

use linkd_proto::{Numeric, ProtocolError, Response, ServerId};
use thiserror::Error;

// ============================================================================
// Mode Errors (Apply outcomes)
// ============================================================================

/// Why a mode change was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("list +{letter} is full ({cap} entries)")]
    ListFull { letter: char, cap: usize },

    #[error("+{letter} has no entry {value}")]
    NotFound { letter: char, value: String },

    #[error("+{letter} is set to a different value")]
    ValueMismatch { letter: char },

    #[error("rank {have} is below the required {need}")]
    InsufficientRank { have: u32, need: u32 },

    #[error("unknown mode: {0}")]
    UnknownMode(char),

    #[error("+{0} needs an argument")]
    MissingArgument(char),

    #[error("invalid argument for +{letter}: {value}")]
    InvalidArgument { letter: char, value: String },

    #[error("no such channel: {0}")]
    NoSuchChannel(String),

    #[error("{0} is not on that channel")]
    NotOnChannel(String),
}

impl ModeError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ListFull { .. } => "list_full",
            Self::NotFound { .. } => "not_found",
            Self::ValueMismatch { .. } => "value_mismatch",
            Self::InsufficientRank { .. } => "insufficient_rank",
            Self::UnknownMode(_) => "unknown_mode",
            Self::MissingArgument(_) => "missing_argument",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::NoSuchChannel(_) => "no_such_channel",
            Self::NotOnChannel(_) => "not_on_channel",
        }
    }

    /// Convert to the numeric sent to the client whose change failed.
    ///
    /// Returns `None` when the failure is silent (removing a list entry that
    /// is not there is not worth a reply).
    pub fn to_irc_reply(&self, server_name: &str, nick: &str, channel: &str) -> Option<Numeric> {
        let (response, params) = match self {
            Self::ListFull { letter, .. } => (
                Response::ERR_BANLISTFULL,
                vec![
                    nick.to_string(),
                    channel.to_string(),
                    letter.to_string(),
                    "Channel list is full".to_string(),
                ],
            ),
            Self::ValueMismatch { .. } => (
                Response::ERR_KEYSET,
                vec![
                    nick.to_string(),
                    channel.to_string(),
                    "Channel key already set".to_string(),
                ],
            ),
            Self::InsufficientRank { .. } => (
                Response::ERR_CHANOPRIVSNEEDED,
                vec![
                    nick.to_string(),
                    channel.to_string(),
                    "You're not channel operator".to_string(),
                ],
            ),
            Self::UnknownMode(letter) => (
                Response::ERR_UNKNOWNMODE,
                vec![
                    nick.to_string(),
                    letter.to_string(),
                    "is unknown mode char to me".to_string(),
                ],
            ),
            Self::MissingArgument(letter) => (
                Response::ERR_INVALIDMODEPARAM,
                vec![
                    nick.to_string(),
                    channel.to_string(),
                    letter.to_string(),
                    "*".to_string(),
                    "You must specify a parameter".to_string(),
                ],
            ),
            Self::InvalidArgument { letter, value } => (
                Response::ERR_INVALIDMODEPARAM,
                vec![
                    nick.to_string(),
                    channel.to_string(),
                    letter.to_string(),
                    value.clone(),
                    "Invalid mode parameter".to_string(),
                ],
            ),
            Self::NoSuchChannel(name) => (
                Response::ERR_NOSUCHCHANNEL,
                vec![nick.to_string(), name.clone(), "No such channel".to_string()],
            ),
            Self::NotOnChannel(target) => (
                Response::ERR_USERNOTINCHANNEL,
                vec![
                    nick.to_string(),
                    target.clone(),
                    channel.to_string(),
                    "They aren't on that channel".to_string(),
                ],
            ),
            Self::NotFound { .. } => return None,
        };
        Some(Numeric::new(server_name, response, params))
    }
}

// ============================================================================
// Store Errors
// ============================================================================

/// Channel store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no such user: {0}")]
    NoSuchUser(String),

    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("no such channel: {0}")]
    NoSuchChannel(String),

    #[error("{0} is not on that channel")]
    NotOnChannel(String),
}

// ============================================================================
// ExtBan Errors
// ============================================================================

/// Registration-time ExtBan failures. The registry is unchanged when
/// either is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtBanError {
    #[error("extban letter {0} is already registered")]
    DuplicateLetter(char),

    #[error("extban name {0} is already registered")]
    DuplicateName(String),
}

// ============================================================================
// Link Errors
// ============================================================================

/// Peer link failures.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Malformed or out-of-order traffic. Fatal to the link.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A peer referenced a mode this server does not know. Logged and skipped.
    #[error("unknown mode: {0}")]
    UnknownMode(char),

    #[error("no link to {0}")]
    UnknownLink(ServerId),

    /// The peer split itself off with a SQUIT naming its own SID.
    #[error("peer quit: {0}")]
    Squit(String),

    #[error("link closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether the link must be torn down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownMode(_))
    }

    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::UnknownMode(_) => "unknown_mode",
            Self::UnknownLink(_) => "unknown_link",
            Self::Squit(_) => "squit",
            Self::Closed => "closed",
            Self::Protocol(_) => "protocol_error",
            Self::Io(_) => "io_error",
        }
    }

    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }
}
