//! Errors raised while parsing or framing peer-link records.

use thiserror::Error;

/// A malformed or unframeable peer-link line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Every record must start with `:<source-sid>`.
    #[error("record has no source prefix")]
    MissingSource,

    /// The command word is not part of the link protocol.
    #[error("unknown record type: {0}")]
    UnknownCommand(String),

    /// A required parameter was absent.
    #[error("{command}: missing parameter {name}")]
    MissingParameter {
        /// Record command word.
        command: &'static str,
        /// Name of the missing field.
        name: &'static str,
    },

    /// A parameter was present but unusable.
    #[error("{command}: invalid {name}: {value}")]
    InvalidParameter {
        /// Record command word.
        command: &'static str,
        /// Name of the offending field.
        name: &'static str,
        /// The rejected text.
        value: String,
    },

    /// A SID that does not have the `DAA` shape.
    #[error("invalid server id: {0}")]
    InvalidServerId(String),

    /// A line exceeded the codec's configured maximum length.
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Underlying transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
