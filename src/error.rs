use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error payload shape CouchDB sends back on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDbErrorBody {
    pub error: String,
    pub reason: String,
}

/// The taxonomy from the Error Mapping component: every failure the client
/// can surface is classified into one of these, never a raw transport or
/// JSON error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unauthorized: {}: {}", .0.error, .0.reason)]
    Unauthorized(CouchDbErrorBody),

    #[error("forbidden: {}: {}", .0.error, .0.reason)]
    Forbidden(CouchDbErrorBody),

    #[error("not found: {}: {}", .0.error, .0.reason)]
    NotFound(CouchDbErrorBody),

    #[error("conflict: {}: {}", .0.error, .0.reason)]
    Conflict(CouchDbErrorBody),

    #[error("precondition failed: {}: {}", .0.error, .0.reason)]
    PreconditionFailed(CouchDbErrorBody),

    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server error ({status}): {}: {}", .body.error, .body.reason)]
    ServerError { status: u16, body: CouchDbErrorBody },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    /// Whether a fresh attempt of the same operation might succeed.
    ///
    /// `Unauthorized` is retriable exactly once, after re-auth; that retry
    /// is orchestrated by the caller (`retry::with_backoff` /
    /// `auth::SessionAuth`), so it does not report itself as retriable here.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::ServerError { .. })
    }

    pub(crate) fn from_status_and_body(status: u16, body: CouchDbErrorBody) -> Self {
        match status {
            401 => Error::Unauthorized(body),
            403 => Error::Forbidden(body),
            404 => Error::NotFound(body),
            409 => Error::Conflict(body),
            412 => Error::PreconditionFailed(body),
            _ => Error::ServerError { status, body },
        }
    }
}
