//! Message parsing and serialization.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::ParseError;
use crate::prefix::Prefix;
use crate::tags::{escape_tag_value, unescape_tag_value};

/// A single IRCv3 message tag: key and optional value.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag(pub String, pub Option<String>);

/// A parsed IRC message.
///
/// The command is kept as an opaque uppercase-insensitive token; a bouncer
/// must round-trip commands it does not understand.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    /// IRCv3 message tags, in wire order.
    pub tags: Option<Vec<Tag>>,
    /// Origin of the message.
    pub prefix: Option<Prefix>,
    /// Command token (e.g. `PRIVMSG`, `001`).
    pub command: String,
    /// Parameters. A trailing parameter loses its `:` marker on parse and
    /// regains it on serialization when needed.
    pub params: Vec<String>,
}

impl Message {
    /// Build a message with no tags or prefix.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            tags: None,
            prefix: None,
            command: command.into(),
            params,
        }
    }

    /// Build a message with a prefix.
    pub fn with_prefix(prefix: Prefix, command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            tags: None,
            prefix: Some(prefix),
            command: command.into(),
            params,
        }
    }

    /// Parse a raw line. Trailing CR/LF is tolerated and stripped.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        let tags = if let Some(stripped) = rest.strip_prefix('@') {
            let space = stripped.find(' ').ok_or(ParseError::TagsWithoutCommand)?;
            let tags = parse_tags(&stripped[..space]);
            rest = stripped[space + 1..].trim_start_matches(' ');
            Some(tags)
        } else {
            None
        };

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let space = stripped
                .find(' ')
                .ok_or(ParseError::PrefixWithoutCommand)?;
            let prefix = Prefix::parse(&stripped[..space]);
            rest = stripped[space + 1..].trim_start_matches(' ');
            Some(prefix)
        } else {
            None
        };

        let (command, param_str) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        if let Some(mut remaining) = param_str {
            loop {
                remaining = remaining.trim_start_matches(' ');
                if remaining.is_empty() {
                    break;
                }
                if let Some(trailing) = remaining.strip_prefix(':') {
                    params.push(trailing.to_owned());
                    break;
                }
                match remaining.find(' ') {
                    Some(idx) => {
                        params.push(remaining[..idx].to_owned());
                        remaining = &remaining[idx + 1..];
                    }
                    None => {
                        params.push(remaining.to_owned());
                        break;
                    }
                }
            }
        }

        Ok(Self {
            tags,
            prefix,
            command: command.to_owned(),
            params,
        })
    }

    /// Get a parameter by index.
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    /// Get the value of a tag by key.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .as_ref()?
            .iter()
            .find(|tag| tag.0 == key)
            .and_then(|tag| tag.1.as_deref())
    }

    /// The nickname of the sender, when the prefix is a user prefix.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Prefix::nick)
    }
}

fn parse_tags(raw: &str) -> Vec<Tag> {
    raw.split(';')
        .filter(|s| !s.is_empty())
        .map(|tag| {
            let mut iter = tag.splitn(2, '=');
            let key = iter.next().unwrap_or("").to_owned();
            let value = iter.next().map(unescape_tag_value);
            Tag(key, value)
        })
        .collect()
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Message::parse(s)
    }
}

impl Display for Message {
    /// Serialize to the wire format, CRLF-terminated.
    ///
    /// The final parameter gets a leading `:` when it is empty, contains a
    /// space, or itself starts with `:`.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(ref tags) = self.tags {
            write!(f, "@")?;
            for (i, tag) in tags.iter().enumerate() {
                if i > 0 {
                    write!(f, ";")?;
                }
                write!(f, "{}", tag.0)?;
                if let Some(ref value) = tag.1 {
                    write!(f, "={}", escape_tag_value(value))?;
                }
            }
            write!(f, " ")?;
        }

        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }

        write!(f, "{}", self.command)?;

        if !self.params.is_empty() {
            let last = self.params.len() - 1;
            for (i, param) in self.params.iter().enumerate() {
                if i == last && (param.is_empty() || param.starts_with(':') || param.contains(' '))
                {
                    write!(f, " :{}", param)?;
                } else {
                    write!(f, " {}", param)?;
                }
            }
        }

        write!(f, "\r\n")
    }
}
