//! Channel and link limits configuration.

use serde::Deserialize;

/// Limits applied by the channel core and link machinery.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum entries in each list mode (default: 64).
    /// Merges that would exceed it drop the oldest entries first.
    #[serde(default = "default_max_list_entries")]
    pub max_list_entries: usize,
    /// Maximum channel key length (default: 32). Longer keys are truncated.
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,
    /// Outbound record queue capacity per peer link (default: 1024).
    #[serde(default = "default_link_queue_capacity")]
    pub link_queue_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_list_entries: default_max_list_entries(),
            max_key_length: default_max_key_length(),
            link_queue_capacity: default_link_queue_capacity(),
        }
    }
}

fn default_max_list_entries() -> usize {
    64
}

fn default_max_key_length() -> usize {
    32
}

fn default_link_queue_capacity() -> usize {
    1024
}
