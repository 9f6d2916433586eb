//! Configuration validation.
//!
//! Validates configuration at load time to catch common errors early.

use super::Config;
use linkd_proto::ServerId;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("server.sid must match pattern [0-9][A-Z0-9][A-Z0-9], got '{0}'")]
    InvalidSid(String),
    #[error("links[{0}].sid must match pattern [0-9][A-Z0-9][A-Z0-9], got '{1}'")]
    InvalidLinkSid(usize, String),
    #[error("links[{0}] reuses this server's own SID")]
    LinkToSelf(usize),
    #[error("limits.{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }
    if ServerId::parse(&config.server.sid).is_err() {
        errors.push(ValidationError::InvalidSid(config.server.sid.clone()));
    }

    for (i, link) in config.links.iter().enumerate() {
        let Some(sid) = &link.sid else { continue };
        if ServerId::parse(sid).is_err() {
            errors.push(ValidationError::InvalidLinkSid(i, sid.clone()));
        } else if *sid == config.server.sid {
            errors.push(ValidationError::LinkToSelf(i));
        }
    }

    let limits = &config.limits;
    if limits.max_list_entries == 0 {
        errors.push(ValidationError::ZeroLimit("max_list_entries"));
    }
    if limits.max_key_length == 0 {
        errors.push(ValidationError::ZeroLimit("max_key_length"));
    }
    if limits.link_queue_capacity == 0 {
        errors.push(ValidationError::ZeroLimit("link_queue_capacity"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
