//! Numeric replies produced by the channel core.

#![allow(non_camel_case_types)]

use std::fmt;

/// The numerics the channel core can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum Response {
    /// 005 - Server supported features (ISUPPORT)
    RPL_ISUPPORT = 5,
    /// 367 - Ban list entry
    RPL_BANLIST = 367,
    /// 368 - End of ban list
    RPL_ENDOFBANLIST = 368,
    /// 403 - No such channel
    ERR_NOSUCHCHANNEL = 403,
    /// 441 - They aren't on that channel
    ERR_USERNOTINCHANNEL = 441,
    /// 467 - Channel key already set
    ERR_KEYSET = 467,
    /// 472 - Unknown mode character
    ERR_UNKNOWNMODE = 472,
    /// 478 - Ban list is full
    ERR_BANLISTFULL = 478,
    /// 482 - You're not channel operator
    ERR_CHANOPRIVSNEEDED = 482,
    /// 696 - Invalid mode parameter
    ERR_INVALIDMODEPARAM = 696,
}

impl Response {
    /// The numeric value.
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}

/// A numeric reply addressed to one client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Numeric {
    /// Server name used as the prefix.
    pub server: String,
    /// The numeric.
    pub response: Response,
    /// Parameters, starting with the target nick.
    pub params: Vec<String>,
}

impl Numeric {
    /// Build a numeric reply.
    pub fn new(server: impl Into<String>, response: Response, params: Vec<String>) -> Self {
        Self {
            server: server.into(),
            response,
            params,
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{} {}", self.server, self.response)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_colon =
                i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_zero_padded() {
        assert_eq!(Response::RPL_ISUPPORT.to_string(), "005");
        assert_eq!(Response::ERR_KEYSET.to_string(), "467");
    }

    #[test]
    fn trailing_param_gets_colon_only_when_needed() {
        let n = Numeric::new(
            "irc.test",
            Response::RPL_ENDOFBANLIST,
            vec!["alice".into(), "#rust".into(), "End of channel ban list".into()],
        );
        assert_eq!(n.to_string(), ":irc.test 368 alice #rust :End of channel ban list");

        let n = Numeric::new(
            "irc.test",
            Response::RPL_BANLIST,
            vec!["alice".into(), "#rust".into(), "*!*@h1".into(), "bob".into(), "7".into()],
        );
        assert_eq!(n.to_string(), ":irc.test 367 alice #rust *!*@h1 bob 7");
    }
}
