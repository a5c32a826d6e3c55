//! # Error Definitions
//!
//! Failures while building, validating, or (de)serializing an envelope.

/// Envelope failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The JSON codec rejected the payload.
    Serialization(String),
    /// A field required by the envelope was absent or empty.
    MissingField(&'static str),
    /// A field that must stay empty for this kind of request was set.
    UnexpectedField(&'static str),
    /// A command request named an action outside the closed command set.
    UnknownCommand(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::MissingField(field) => write!(f, "Missing required field: {}", field),
            Self::UnexpectedField(field) => write!(f, "Field must be empty: {}", field),
            Self::UnknownCommand(name) => write!(f, "Unknown command: {}", name),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// A specialized Result type for envelope operations.
pub type Result<T> = std::result::Result<T, Error>;
