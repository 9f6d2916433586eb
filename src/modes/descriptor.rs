//! Channel mode descriptors.
//!
//! A mode is one tagged descriptor: its kind decides which part of the
//! channel it touches and carries the kind-specific policy.

use super::resolver::ConflictPolicy;
use crate::error::ModeError;

/// Rank granted by voice.
pub const VOICE_RANK: u32 = 10_000;
/// Rank granted by half-op.
pub const HALFOP_RANK: u32 = 20_000;
/// Rank granted by op.
pub const OP_RANK: u32 = 30_000;

/// How a parameter mode's value is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Free text, truncated to `max_len` characters.
    Text { max_len: usize },
    /// A positive integer.
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListPolicy {
    pub max_entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamPolicy {
    pub value: ValueKind,
    /// Unsetting must name the current value.
    pub unset_requires_match: bool,
    /// Local users cannot overwrite a value that is already set.
    pub locked_while_set: bool,
    /// Tie-break when a merge finds two different values.
    pub conflict: ConflictPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixPolicy {
    /// Rank granted to holders.
    pub rank: u32,
    /// Status symbol shown before nicks.
    pub symbol: char,
    pub rank_to_set: u32,
    pub rank_to_unset: u32,
    /// Holders may remove it from themselves below `rank_to_unset`.
    pub self_remove: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    List(ListPolicy),
    Param(ParamPolicy),
    Prefix(PrefixPolicy),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDescriptor {
    pub letter: char,
    pub name: &'static str,
    /// Rank needed to change a list or parameter mode. Prefix modes use
    /// their own set/unset ranks instead.
    pub rank_required: u32,
    pub kind: ModeKind,
}

impl ModeDescriptor {
    pub fn list(letter: char, name: &'static str, max_entries: usize) -> Self {
        Self {
            letter,
            name,
            rank_required: HALFOP_RANK,
            kind: ModeKind::List(ListPolicy { max_entries }),
        }
    }

    pub fn param(letter: char, name: &'static str, policy: ParamPolicy) -> Self {
        Self {
            letter,
            name,
            rank_required: HALFOP_RANK,
            kind: ModeKind::Param(policy),
        }
    }

    pub fn prefix(letter: char, name: &'static str, policy: PrefixPolicy) -> Self {
        Self {
            letter,
            name,
            rank_required: policy.rank_to_set,
            kind: ModeKind::Prefix(policy),
        }
    }

    pub fn with_rank_required(mut self, rank: u32) -> Self {
        self.rank_required = rank;
        self
    }

    pub fn as_prefix(&self) -> Option<&PrefixPolicy> {
        match &self.kind {
            ModeKind::Prefix(policy) => Some(policy),
            _ => None,
        }
    }

    /// Whether a change in this direction carries an argument.
    pub fn takes_arg(&self, adding: bool) -> bool {
        match &self.kind {
            ModeKind::List(_) | ModeKind::Prefix(_) => true,
            ModeKind::Param(policy) => adding || policy.unset_requires_match,
        }
    }

    /// Validate and normalize a parameter value.
    pub fn normalize(&self, raw: &str) -> Result<String, ModeError> {
        let ModeKind::Param(policy) = &self.kind else {
            return Ok(raw.to_string());
        };
        let invalid = || ModeError::InvalidArgument {
            letter: self.letter,
            value: raw.to_string(),
        };
        match policy.value {
            ValueKind::Text { max_len } => {
                let value: String = raw.chars().take(max_len).collect();
                if value.is_empty() {
                    return Err(invalid());
                }
                Ok(value)
            }
            ValueKind::Number => match raw.parse::<u32>() {
                Ok(n) if n > 0 => Ok(n.to_string()),
                _ => Err(invalid()),
            },
        }
    }
}
