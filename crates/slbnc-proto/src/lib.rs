//! slbnc-proto - IRC wire framing for the Straylight bouncer.
//!
//! A bouncer relays traffic for commands it has never heard of, so messages
//! keep their command as an opaque token instead of a typed enum. The crate
//! covers exactly what the relay path needs: lenient parsing of
//! `[@tags] [:prefix] command params` lines, prefix classification, and
//! serialization that applies the IRC trailing-parameter rule.

mod error;
mod message;
mod prefix;
mod tags;

pub use error::ParseError;
pub use message::{Message, Tag};
pub use prefix::Prefix;
pub use tags::{escape_tag_value, unescape_tag_value};
