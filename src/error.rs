/*!
The error taxonomy shared by every cache engine.

Errors are grouped by *kind*, not by origin: a `TransientBackend` can come
from a dropped connection or a deadlocked transaction, a `Corrupt` can come
from a hand-edited row or a serializer version bump. Callers are expected to
match on kind, not on the underlying cause.
*/

use thiserror::Error;

/// Errors produced by a [`crate::CacheEngine`] operation.
#[derive(Error, Debug)]
pub enum Error {
    /// Partition/key empty, negative interval, or too many parents.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine does not implement this operation (e.g. `Peek` on a
    /// backend whose `CanPeek` capability bit is false).
    #[error("operation not supported by this engine: {0}")]
    NotSupported(String),

    /// The backend is unavailable, deadlocked, or timed out. Safe to retry.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// Encode/decode/compress failure on the write path.
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// The operation's deadline elapsed, or it was explicitly cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A row exists but failed to decode against the requested type.
    ///
    /// Readers map this to an empty result plus a logged event (see
    /// `CacheEngine::get`); it is only constructed directly by code that
    /// wants to surface the corruption rather than swallow it.
    #[error("corrupt cache row: {0}")]
    Corrupt(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Error::NotSupported(msg.into())
    }

    /// True for [`Error::SerializationFailure`] and [`Error::Corrupt`] — the
    /// two kinds readers downgrade to "absent" per the propagation policy.
    pub fn is_poisoned_row(&self) -> bool {
        matches!(self, Error::SerializationFailure(_) | Error::Corrupt(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Error::TransientBackend(e.to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                // Upsert statements should never surface a unique violation;
                // if one escapes the dialect's upsert idiom, treat it as a
                // transient race rather than caller error.
                Error::TransientBackend(e.to_string())
            }
            _ => Error::TransientBackend(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationFailure(e.to_string())
    }
}

#[cfg(feature = "msgpack")]
impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::SerializationFailure(e.to_string())
    }
}

#[cfg(feature = "msgpack")]
impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::SerializationFailure(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::SerializationFailure(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
