//! Error type shared by the client core.
//!
//! Command handlers flatten these into the user-facing message string the
//! shell shows in its notification toast.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PosError {
    /// The API could not be reached at all (DNS, refused, timeout).
    #[error("{0}")]
    Network(String),

    /// The API answered with a non-success status.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// The API answered with a body that is not JSON.
    #[error("Server did not return JSON.\nStatus: {status}\nContent-Type: {content_type}\nPreview: {preview}")]
    NotJson {
        status: u16,
        content_type: String,
        preview: String,
    },

    /// No access token is stored, or it could not be decoded.
    #[error("Not signed in")]
    Unauthenticated,

    /// User input failed a client-side check.
    #[error("{0}")]
    Validation(String),

    /// Local storage (SQLite, keyring, filesystem) failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A payload could not be decoded into the expected shape.
    #[error("Invalid data: {0}")]
    Decode(String),
}

pub type PosResult<T> = Result<T, PosError>;

impl PosError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when the error means the session is no longer valid.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::Http { status: 401, .. }
        )
    }
}

impl From<rusqlite::Error> for PosError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PosError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<PosError> for String {
    fn from(err: PosError) -> Self {
        err.to_string()
    }
}
