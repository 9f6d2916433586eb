//! Peer-link wire records.
//!
//! Every record is a single line of the form
//!
//! ```text
//! :<source-sid> <COMMAND> <middle params...> [:<trailing>]
//! ```
//!
//! The burst is carried by `SERVER`, `UID`, `SJOIN`, `LMODE`, `FTOPIC` and a
//! single terminating `NETINFO`. After the burst, `MODE`, `JOIN`, `PART`,
//! `QUIT` and `SQUIT` carry deltas.
//!
//! Mode changes are written as one token per change: sign, letter, then the
//! argument glued on (`+b*!*@h1`, `-l`, `+o00AAAAAAB`). The letter is always
//! a single character, so the argument boundary is unambiguous without
//! knowing which modes take parameters.

use crate::error::ProtocolError;
use crate::ids::ServerId;
use std::fmt;
use std::str::FromStr;

/// A channel member as carried in `SJOIN` and `JOIN`: `<prefix letters>,<uid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    /// Prefix mode letters held by the member (e.g. `"ov"`), possibly empty.
    pub prefixes: String,
    /// The member's UID.
    pub uid: String,
}

impl MemberEntry {
    fn parse(command: &'static str, token: &str) -> Result<Self, ProtocolError> {
        let (prefixes, uid) = token
            .split_once(',')
            .ok_or_else(|| ProtocolError::InvalidParameter {
                command,
                name: "member",
                value: token.to_string(),
            })?;
        if uid.is_empty() {
            return Err(ProtocolError::InvalidParameter {
                command,
                name: "member",
                value: token.to_string(),
            });
        }
        Ok(Self {
            prefixes: prefixes.to_string(),
            uid: uid.to_string(),
        })
    }
}

impl fmt::Display for MemberEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.prefixes, self.uid)
    }
}

/// A parameter mode carried in `SJOIN`: `<letter>,<set time>,<value>`.
///
/// The set time travels with the value so both ends of a link resolve a
/// clash from the same inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamItem {
    /// Mode letter.
    pub letter: char,
    /// When the value was set (unix seconds).
    pub set_at: i64,
    /// The value.
    pub value: String,
}

impl ParamItem {
    fn parse(command: &'static str, token: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidParameter {
            command,
            name: "param",
            value: token.to_string(),
        };
        let mut parts = token.splitn(3, ',');
        let mut letters = parts.next().ok_or_else(invalid)?.chars();
        let letter = letters.next().ok_or_else(invalid)?;
        if letters.next().is_some() {
            return Err(invalid());
        }
        let set_at = parts
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(invalid)?;
        let value = parts.next().filter(|v| !v.is_empty()).ok_or_else(invalid)?;
        Ok(Self {
            letter,
            set_at,
            value: value.to_string(),
        })
    }
}

impl fmt::Display for ParamItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.letter, self.set_at, self.value)
    }
}

/// A list mode entry carried in `LMODE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    /// The mask.
    pub mask: String,
    /// Who set it.
    pub setter: String,
    /// When it was set (unix seconds).
    pub set_at: i64,
}

/// One mode change carried in `MODE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeItem {
    /// `+` or `-`.
    pub adding: bool,
    /// Mode letter.
    pub letter: char,
    /// Argument, if the change carries one.
    pub arg: Option<String>,
}

impl ModeItem {
    fn parse(token: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidParameter {
            command: "MODE",
            name: "change",
            value: token.to_string(),
        };
        let mut chars = token.chars();
        let adding = match chars.next() {
            Some('+') => true,
            Some('-') => false,
            _ => return Err(invalid()),
        };
        let letter = chars.next().ok_or_else(invalid)?;
        let rest = chars.as_str();
        Ok(Self {
            adding,
            letter,
            arg: (!rest.is_empty()).then(|| rest.to_string()),
        })
    }
}

impl fmt::Display for ModeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.adding { '+' } else { '-' };
        write!(f, "{}{}{}", sign, self.letter, self.arg.as_deref().unwrap_or(""))
    }
}

/// The typed payload of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    /// Introduces a server. The record source is its uplink.
    Server {
        /// The introduced server.
        sid: ServerId,
        /// Its name.
        name: String,
        /// Free-form description.
        description: String,
    },
    /// Introduces a user.
    Uid {
        /// UID, prefixed by the owning SID.
        uid: String,
        /// Nickname.
        nick: String,
        /// Username.
        user: String,
        /// Visible hostname.
        host: String,
        /// Signon time.
        ts: i64,
        /// Services account, `*` on the wire when not logged in.
        account: Option<String>,
        /// Realname (GECOS).
        realname: String,
    },
    /// Introduces a channel with its parameter modes and members.
    Sjoin {
        /// Channel name.
        channel: String,
        /// Creation time.
        ts: i64,
        /// Parameter modes with their set times.
        params: Vec<ParamItem>,
        /// Members.
        members: Vec<MemberEntry>,
    },
    /// List mode contents for a channel already introduced by `SJOIN`.
    Lmode {
        /// Channel name.
        channel: String,
        /// List mode letter.
        letter: char,
        /// Entries.
        entries: Vec<ListItem>,
    },
    /// Topic for a channel already introduced by `SJOIN`.
    Ftopic {
        /// Channel name.
        channel: String,
        /// When the topic was set.
        set_at: i64,
        /// Who set it.
        setter: String,
        /// Topic text.
        text: String,
    },
    /// Network metadata. Exactly one ends every burst.
    Netinfo {
        /// Key/value pairs, in order.
        metadata: Vec<(String, String)>,
    },
    /// Mode changes on a channel.
    Mode {
        /// Channel name.
        channel: String,
        /// When the changes were made.
        ts: i64,
        /// Who made them (nick or server name).
        setter: String,
        /// The changes, in order.
        changes: Vec<ModeItem>,
    },
    /// A user joined a channel.
    Join {
        /// Channel name.
        channel: String,
        /// The member and any prefixes granted on join.
        member: MemberEntry,
    },
    /// A user left a channel.
    Part {
        /// Channel name.
        channel: String,
        /// UID of the leaving user.
        uid: String,
        /// Optional part message.
        reason: Option<String>,
    },
    /// A user left the network.
    Quit {
        /// UID of the quitting user.
        uid: String,
        /// Quit message.
        reason: String,
    },
    /// A server left the network.
    Squit {
        /// The departing server.
        sid: ServerId,
        /// Split reason.
        reason: String,
    },
}

impl RecordBody {
    /// The command word for this record.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Server { .. } => "SERVER",
            Self::Uid { .. } => "UID",
            Self::Sjoin { .. } => "SJOIN",
            Self::Lmode { .. } => "LMODE",
            Self::Ftopic { .. } => "FTOPIC",
            Self::Netinfo { .. } => "NETINFO",
            Self::Mode { .. } => "MODE",
            Self::Join { .. } => "JOIN",
            Self::Part { .. } => "PART",
            Self::Quit { .. } => "QUIT",
            Self::Squit { .. } => "SQUIT",
        }
    }
}

/// A record together with the server it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The originating server.
    pub source: ServerId,
    /// The payload.
    pub body: RecordBody,
}

impl Record {
    /// Build a record.
    pub fn new(source: ServerId, body: RecordBody) -> Self {
        Self { source, body }
    }
}

/// Escape a metadata value so it survives as a single token.
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ' ' => out.push_str("\\s"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Cursor over the middle parameters of a line.
struct Params<'a> {
    command: &'static str,
    tokens: std::vec::IntoIter<&'a str>,
}

impl<'a> Params<'a> {
    fn next(&mut self, name: &'static str) -> Result<&'a str, ProtocolError> {
        self.tokens.next().ok_or(ProtocolError::MissingParameter {
            command: self.command,
            name,
        })
    }

    fn next_i64(&mut self, name: &'static str) -> Result<i64, ProtocolError> {
        let raw = self.next(name)?;
        raw.parse().map_err(|_| ProtocolError::InvalidParameter {
            command: self.command,
            name,
            value: raw.to_string(),
        })
    }

    fn next_letter(&mut self, name: &'static str) -> Result<char, ProtocolError> {
        let raw = self.next(name)?;
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(ProtocolError::InvalidParameter {
                command: self.command,
                name,
                value: raw.to_string(),
            }),
        }
    }

    fn rest(self) -> Vec<&'a str> {
        self.tokens.collect()
    }
}

fn required<'a>(
    command: &'static str,
    name: &'static str,
    trailing: Option<&'a str>,
) -> Result<&'a str, ProtocolError> {
    trailing.ok_or(ProtocolError::MissingParameter { command, name })
}

impl FromStr for Record {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let rest = line.strip_prefix(':').ok_or(ProtocolError::MissingSource)?;
        let (source, rest) = rest.split_once(' ').ok_or(ProtocolError::MissingSource)?;
        let source = ServerId::parse(source)?;

        let (middle, trailing) = match rest.split_once(" :") {
            Some((middle, trailing)) => (middle, Some(trailing)),
            None => (rest, None),
        };
        let mut words = middle.split_ascii_whitespace();
        let word = words.next().ok_or(ProtocolError::MissingSource)?;
        let command: &'static str = match word {
            "SERVER" => "SERVER",
            "UID" => "UID",
            "SJOIN" => "SJOIN",
            "LMODE" => "LMODE",
            "FTOPIC" => "FTOPIC",
            "NETINFO" => "NETINFO",
            "MODE" => "MODE",
            "JOIN" => "JOIN",
            "PART" => "PART",
            "QUIT" => "QUIT",
            "SQUIT" => "SQUIT",
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        let mut p = Params {
            command,
            tokens: words.collect::<Vec<_>>().into_iter(),
        };

        let body = match command {
            "SERVER" => RecordBody::Server {
                sid: ServerId::parse(p.next("sid")?)?,
                name: p.next("name")?.to_string(),
                description: trailing.unwrap_or_default().to_string(),
            },
            "UID" => RecordBody::Uid {
                uid: p.next("uid")?.to_string(),
                nick: p.next("nick")?.to_string(),
                user: p.next("user")?.to_string(),
                host: p.next("host")?.to_string(),
                ts: p.next_i64("ts")?,
                account: match p.next("account")? {
                    "*" => None,
                    name => Some(name.to_string()),
                },
                realname: trailing.unwrap_or_default().to_string(),
            },
            "SJOIN" => {
                let channel = p.next("channel")?.to_string();
                let ts = p.next_i64("ts")?;
                let params = p
                    .rest()
                    .into_iter()
                    .map(|token| ParamItem::parse(command, token))
                    .collect::<Result<Vec<_>, _>>()?;
                let members = trailing
                    .unwrap_or_default()
                    .split_ascii_whitespace()
                    .map(|m| MemberEntry::parse(command, m))
                    .collect::<Result<_, _>>()?;
                RecordBody::Sjoin {
                    channel,
                    ts,
                    params,
                    members,
                }
            }
            "LMODE" => {
                let channel = p.next("channel")?.to_string();
                let letter = p.next_letter("letter")?;
                let words: Vec<&str> = trailing.unwrap_or_default().split_ascii_whitespace().collect();
                if words.len() % 3 != 0 {
                    return Err(ProtocolError::InvalidParameter {
                        command,
                        name: "entries",
                        value: trailing.unwrap_or_default().to_string(),
                    });
                }
                let mut entries = Vec::with_capacity(words.len() / 3);
                for chunk in words.chunks(3) {
                    let set_at = chunk[2].parse().map_err(|_| ProtocolError::InvalidParameter {
                        command,
                        name: "set_at",
                        value: chunk[2].to_string(),
                    })?;
                    entries.push(ListItem {
                        mask: chunk[0].to_string(),
                        setter: chunk[1].to_string(),
                        set_at,
                    });
                }
                RecordBody::Lmode {
                    channel,
                    letter,
                    entries,
                }
            }
            "FTOPIC" => RecordBody::Ftopic {
                channel: p.next("channel")?.to_string(),
                set_at: p.next_i64("set_at")?,
                setter: p.next("setter")?.to_string(),
                text: trailing.unwrap_or_default().to_string(),
            },
            "NETINFO" => {
                let mut metadata = Vec::new();
                for pair in p.rest() {
                    let (key, value) =
                        pair.split_once('=')
                            .ok_or_else(|| ProtocolError::InvalidParameter {
                                command,
                                name: "metadata",
                                value: pair.to_string(),
                            })?;
                    metadata.push((key.to_string(), unescape_value(value)));
                }
                RecordBody::Netinfo { metadata }
            }
            "MODE" => {
                let channel = p.next("channel")?.to_string();
                let ts = p.next_i64("ts")?;
                let setter = p.next("setter")?.to_string();
                let changes = p
                    .rest()
                    .into_iter()
                    .map(ModeItem::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                if changes.is_empty() {
                    return Err(ProtocolError::MissingParameter {
                        command,
                        name: "changes",
                    });
                }
                RecordBody::Mode {
                    channel,
                    ts,
                    setter,
                    changes,
                }
            }
            "JOIN" => RecordBody::Join {
                channel: p.next("channel")?.to_string(),
                member: MemberEntry::parse(command, p.next("member")?)?,
            },
            "PART" => RecordBody::Part {
                channel: p.next("channel")?.to_string(),
                uid: p.next("uid")?.to_string(),
                reason: trailing.map(str::to_string),
            },
            "QUIT" => RecordBody::Quit {
                uid: p.next("uid")?.to_string(),
                reason: required(command, "reason", trailing)?.to_string(),
            },
            _ => RecordBody::Squit {
                sid: ServerId::parse(p.next("sid")?)?,
                reason: required(command, "reason", trailing)?.to_string(),
            },
        };

        Ok(Record { source, body })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{} {}", self.source, self.body.command())?;
        match &self.body {
            RecordBody::Server {
                sid,
                name,
                description,
            } => write!(f, " {} {} :{}", sid, name, description),
            RecordBody::Uid {
                uid,
                nick,
                user,
                host,
                ts,
                account,
                realname,
            } => write!(
                f,
                " {} {} {} {} {} {} :{}",
                uid,
                nick,
                user,
                host,
                ts,
                account.as_deref().unwrap_or("*"),
                realname
            ),
            RecordBody::Sjoin {
                channel,
                ts,
                params,
                members,
            } => {
                write!(f, " {} {}", channel, ts)?;
                for param in params {
                    write!(f, " {}", param)?;
                }
                f.write_str(" :")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", member)?;
                }
                Ok(())
            }
            RecordBody::Lmode {
                channel,
                letter,
                entries,
            } => {
                write!(f, " {} {} :", channel, letter)?;
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{} {} {}", entry.mask, entry.setter, entry.set_at)?;
                }
                Ok(())
            }
            RecordBody::Ftopic {
                channel,
                set_at,
                setter,
                text,
            } => write!(f, " {} {} {} :{}", channel, set_at, setter, text),
            RecordBody::Netinfo { metadata } => {
                for (key, value) in metadata {
                    write!(f, " {}={}", key, escape_value(value))?;
                }
                Ok(())
            }
            RecordBody::Mode {
                channel,
                ts,
                setter,
                changes,
            } => {
                write!(f, " {} {} {}", channel, ts, setter)?;
                for change in changes {
                    write!(f, " {}", change)?;
                }
                Ok(())
            }
            RecordBody::Join { channel, member } => write!(f, " {} {}", channel, member),
            RecordBody::Part {
                channel,
                uid,
                reason,
            } => {
                write!(f, " {} {}", channel, uid)?;
                if let Some(reason) = reason {
                    write!(f, " :{}", reason)?;
                }
                Ok(())
            }
            RecordBody::Quit { uid, reason } => write!(f, " {} :{}", uid, reason),
            RecordBody::Squit { sid, reason } => write!(f, " {} :{}", sid, reason),
        }
    }
}
