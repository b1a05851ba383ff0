use thiserror::Error;

/// Semantic command failures. Every variant maps to an ERR reply with the
/// variant's display text; the connection stays open and keeps reading.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum ServerError {
    #[error("Expecting string type")]
    ExpectingStringType,
    #[error("Expecting ZSET type")]
    ExpectingZsetType,
    #[error("Unknown command or wrong number of arguments")]
    UnknownCommand,
    #[error("Empty command")]
    EmptyCommand,
    #[error("ZADD requires pairs of score and member")]
    UnpairedScoreMember,
    #[error("value is not a valid float")]
    InvalidFloat,
    #[error("value is not an integer or out of range")]
    InvalidInteger,
}
