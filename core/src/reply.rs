//! Reply payloads and their wire formats.
//!
//! The handling service answers every request it accepts, either with a success
//! payload or with a human-readable failure message. Two wire formats exist:
//!
//! - [`ReplyFormat::Tagged`]: a bincode-encoded [`Reply`]. Success and failure
//!   are distinguished by an explicit tag, so any payload (including the bytes
//!   `OK`) can be carried without ambiguity.
//! - [`ReplyFormat::Legacy`]: success is the literal [`LEGACY_SUCCESS_MARKER`]
//!   and anything else is a failure message. Peers that only understand the
//!   literal protocol need this format; the success payload is not transmitted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Literal success marker used by [`ReplyFormat::Legacy`].
pub const LEGACY_SUCCESS_MARKER: &[u8] = b"OK";

/// Outcome of one handled request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// The handler succeeded and produced this payload
    Success(Vec<u8>),
    /// The handler failed; the message is its error, verbatim
    Failure(String),
}

impl Reply {
    /// Successful reply carrying `payload`.
    #[must_use]
    pub fn success(payload: impl Into<Vec<u8>>) -> Self {
        Self::Success(payload.into())
    }

    /// Failed reply carrying `message`.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    /// Whether this is a [`Reply::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Convert into a `Result`, success payload on `Ok`, message on `Err`.
    ///
    /// # Errors
    ///
    /// Returns the failure message for [`Reply::Failure`].
    pub fn into_result(self) -> Result<Vec<u8>, String> {
        match self {
            Self::Success(payload) => Ok(payload),
            Self::Failure(message) => Err(message),
        }
    }
}

/// Errors encoding or decoding a reply payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplyCodecError {
    /// Failed to encode the reply
    #[error("Failed to encode reply: {0}")]
    Encode(String),

    /// The payload is not a valid reply in the expected format
    #[error("Failed to decode reply: {0}")]
    Decode(String),
}

/// Wire format for reply payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReplyFormat {
    /// Bincode-encoded [`Reply`] with an explicit success/failure tag
    #[default]
    Tagged,
    /// `OK` for success, the raw failure message otherwise
    Legacy,
}

impl ReplyFormat {
    /// Encode `reply` for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyCodecError::Encode`] if bincode serialization fails.
    ///
    /// # Example
    ///
    /// ```
    /// use reply_bridge_core::{Reply, ReplyFormat};
    ///
    /// let bytes = ReplyFormat::Legacy.encode(&Reply::failure("insufficient funds")).unwrap();
    /// assert_eq!(bytes, b"insufficient funds");
    /// ```
    pub fn encode(self, reply: &Reply) -> Result<Vec<u8>, ReplyCodecError> {
        match self {
            Self::Tagged => {
                bincode::serialize(reply).map_err(|e| ReplyCodecError::Encode(e.to_string()))
            },
            Self::Legacy => Ok(match reply {
                Reply::Success(_) => LEGACY_SUCCESS_MARKER.to_vec(),
                Reply::Failure(message) => message.as_bytes().to_vec(),
            }),
        }
    }

    /// Decode a reply payload read from the wire.
    ///
    /// In the legacy format decoding never fails: exactly `OK` is a success
    /// (with `OK` as its payload) and every other payload is a failure message.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyCodecError::Decode`] if a tagged payload is malformed.
    pub fn decode(self, bytes: &[u8]) -> Result<Reply, ReplyCodecError> {
        match self {
            Self::Tagged => {
                bincode::deserialize(bytes).map_err(|e| ReplyCodecError::Decode(e.to_string()))
            },
            Self::Legacy => {
                if bytes == LEGACY_SUCCESS_MARKER {
                    Ok(Reply::Success(LEGACY_SUCCESS_MARKER.to_vec()))
                } else {
                    Ok(Reply::Failure(String::from_utf8_lossy(bytes).into_owned()))
                }
            },
        }
    }

    /// Configuration name of the format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tagged => "tagged",
            Self::Legacy => "legacy",
        }
    }
}

impl fmt::Display for ReplyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplyFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tagged" => Ok(Self::Tagged),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown reply format '{other}' (expected 'tagged' or 'legacy')")),
        }
    }
}
