//! IRC message prefix - identifies the origin of a message.
//!
//! A prefix is either a server name or a user's nick!user@host mask.
//! Parsing is lenient: a dot in the name part before any `!`/`@`
//! classifies the prefix as a server name.

use std::fmt;

/// The origin of an IRC message.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Prefix {
    /// Server name (e.g. "irc.example.com").
    ServerName(String),
    /// User prefix: (nickname, username, hostname). Empty components are
    /// kept as empty strings.
    Nickname(String, String, String),
}

impl Prefix {
    /// Parse a prefix string. Lenient - never fails.
    pub fn parse(s: &str) -> Self {
        #[derive(Copy, Clone, Eq, PartialEq)]
        enum Part {
            Name,
            User,
            Host,
        }

        let mut name = String::new();
        let mut user = String::new();
        let mut host = String::new();
        let mut part = Part::Name;
        let mut is_server = false;

        for c in s.chars() {
            if c == '.' && part == Part::Name {
                is_server = true;
            }

            match c {
                '!' if part == Part::Name => {
                    is_server = false;
                    part = Part::User;
                }
                '@' if part != Part::Host => {
                    is_server = false;
                    part = Part::Host;
                }
                _ => {
                    match part {
                        Part::Name => &mut name,
                        Part::User => &mut user,
                        Part::Host => &mut host,
                    }
                    .push(c);
                }
            }
        }

        if is_server {
            Prefix::ServerName(name)
        } else {
            Prefix::Nickname(name, user, host)
        }
    }

    /// Shorthand for a full user prefix.
    pub fn new(nick: impl Into<String>, user: impl Into<String>, host: impl Into<String>) -> Self {
        Prefix::Nickname(nick.into(), user.into(), host.into())
    }

    /// The nickname, if this is a user prefix.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::Nickname(nick, _, _) if !nick.is_empty() => Some(nick),
            _ => None,
        }
    }

    /// The username, if this is a user prefix.
    pub fn user(&self) -> Option<&str> {
        match self {
            Prefix::Nickname(_, user, _) if !user.is_empty() => Some(user),
            _ => None,
        }
    }

    /// The hostname, or the server name for server prefixes.
    pub fn host(&self) -> Option<&str> {
        match self {
            Prefix::ServerName(name) => Some(name),
            Prefix::Nickname(_, _, host) if !host.is_empty() => Some(host),
            _ => None,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::ServerName(name) => write!(f, "{}", name),
            Prefix::Nickname(nick, user, host) => {
                write!(f, "{}", nick)?;
                if !user.is_empty() {
                    write!(f, "!{}", user)?;
                }
                if !host.is_empty() {
                    write!(f, "@{}", host)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Prefix {
    fn from(s: &str) -> Self {
        Prefix::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_name() {
        let p = Prefix::parse("irc.example.com");
        assert_eq!(p, Prefix::ServerName("irc.example.com".into()));
    }

    #[test]
    fn test_parse_nick_user_host() {
        let p = Prefix::parse("nick!user@host.com");
        assert_eq!(
            p,
            Prefix::Nickname("nick".into(), "user".into(), "host.com".into())
        );
        assert_eq!(p.nick(), Some("nick"));
        assert_eq!(p.user(), Some("user"));
        assert_eq!(p.host(), Some("host.com"));
    }

    #[test]
    fn test_parse_nick_only() {
        let p = Prefix::parse("somenick");
        assert_eq!(p.nick(), Some("somenick"));
        assert_eq!(p.user(), None);
        assert_eq!(p.host(), None);
    }

    #[test]
    fn test_display_round_trip() {
        for raw in ["irc.example.com", "nick!user@host.com", "nick", "nick@host"] {
            assert_eq!(Prefix::parse(raw).to_string(), raw);
        }
    }
}
