//! User-related types.

use linkd_proto::ServerId;
use std::collections::HashSet;

/// Unique user identifier (TS6 format: owning SID + 6 characters).
pub type Uid = String;

/// A user known to this server, local or remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: Uid,
    pub nick: String,
    pub user: String,
    pub host: String,
    pub realname: String,
    /// Account name if logged in.
    pub account: Option<String>,
    /// Signon time (unix seconds).
    pub created_at: i64,
    /// The server that owns this user.
    pub server: ServerId,
    /// Channels this user is in (case-folded names).
    pub channels: HashSet<String>,
}

impl User {
    /// Build a user owned by the server encoded in its UID.
    pub fn new(
        uid: impl Into<Uid>,
        nick: impl Into<String>,
        user: impl Into<String>,
        host: impl Into<String>,
        realname: impl Into<String>,
        created_at: i64,
    ) -> Self {
        let uid = uid.into();
        let server = ServerId::of_uid(&uid).unwrap_or_else(|| ServerId::new(uid.clone()));
        Self {
            uid,
            nick: nick.into(),
            user: user.into(),
            host: host.into(),
            realname: realname.into(),
            account: None,
            created_at,
            server,
            channels: HashSet::new(),
        }
    }

    /// `nick!user@host`, the string ordinary ban masks match against.
    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }
}
