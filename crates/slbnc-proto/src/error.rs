use thiserror::Error;

/// Errors from parsing a raw IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,

    #[error("tags present but no message follows")]
    TagsWithoutCommand,

    #[error("prefix present but no command follows")]
    PrefixWithoutCommand,

    #[error("missing command")]
    MissingCommand,
}
