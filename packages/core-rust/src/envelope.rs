//! Response envelope published for every handled request.
//!
//! # Wire format
//!
//! ```text
//! SUCCESS
//! SUCCESS: <payload>
//! ERROR: <reason>
//! ```
//!
//! Consumers match on the prefix and split on the first `": "`. Reasons are
//! free text and not meant for machine parsing.

use std::fmt;

use serde::Serialize;

const SUCCESS: &str = "SUCCESS";
const ERROR: &str = "ERROR";
const DELIMITER: &str = ": ";

/// Outcome of one request as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// `SUCCESS` or `SUCCESS: <payload>`.
    Success(Option<String>),
    /// `ERROR: <reason>`.
    Error(String),
}

/// Error from parsing a string that is not a response envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a response envelope: {0:?}")]
pub struct EnvelopeParseError(pub String);

impl Envelope {
    /// Bare `SUCCESS`.
    #[must_use]
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// `SUCCESS: id:<id>`, the reply to a create-style request.
    #[must_use]
    pub fn created(id: i64) -> Self {
        Self::Success(Some(format!("id:{id}")))
    }

    /// `SUCCESS: <compact json of value>`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error when `value` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(|s| Self::Success(Some(s)))
    }

    /// `ERROR: <reason>`.
    pub fn error(reason: impl fmt::Display) -> Self {
        Self::Error(reason.to_string())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Payload of a success, or reason of an error.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Success(payload) => payload.as_deref(),
            Self::Error(reason) => Some(reason),
        }
    }

    /// Parses a published response string.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeParseError`] when the input starts with neither
    /// `SUCCESS` nor `ERROR: `.
    pub fn parse(input: &str) -> Result<Self, EnvelopeParseError> {
        if input == SUCCESS {
            return Ok(Self::Success(None));
        }
        if let Some(rest) = input.strip_prefix(SUCCESS) {
            if let Some(payload) = rest.strip_prefix(DELIMITER) {
                return Ok(Self::Success(Some(payload.to_string())));
            }
        }
        if let Some(rest) = input.strip_prefix(ERROR) {
            if let Some(reason) = rest.strip_prefix(DELIMITER) {
                return Ok(Self::Error(reason.to_string()));
            }
        }
        Err(EnvelopeParseError(input.to_string()))
    }

    /// Wire bytes of the envelope.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(None) => f.write_str(SUCCESS),
            Self::Success(Some(payload)) => write!(f, "{SUCCESS}{DELIMITER}{payload}"),
            Self::Error(reason) => write!(f, "{ERROR}{DELIMITER}{reason}"),
        }
    }
}

impl std::str::FromStr for Envelope {
    type Err = EnvelopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
