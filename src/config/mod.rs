//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, ListenConfig, LogConfig)
//! - [`limits`]: Channel and link limits (LimitsConfig)
//! - [`links`]: Server-to-server link configuration (LinkBlock)
//! - [`validation`]: Startup validation of the loaded config

mod limits;
mod links;
mod types;
mod validation;

pub use limits::LimitsConfig;
pub use links::LinkBlock;
pub use types::{Config, ConfigError, ListenConfig, LogConfig, LogFormat, ServerConfig};
pub use validation::{ValidationError, validate};
