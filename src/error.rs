//! Error taxonomy for the client library.
//!
//! Transport, server and computation failures are kept distinct so callers
//! can react to each class separately. Only the binary maps these onto
//! process exit codes.

use thiserror::Error;

/// All failures surfaced by the library.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network-level failure (DNS, connect, timeout).
    #[error("error making request: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response from the server, with the decoded body when the
    /// server sent parseable JSON.
    #[error("server returned error: status {status}: {message}")]
    Server {
        status: u16,
        message: String,
        body: Option<serde_json::Value>,
    },

    /// 401 response. Carries a hint on how to obtain credentials.
    #[error("authentication failed (401); obtain an access token at {hint}")]
    Auth { hint: String },

    /// The server reported the computation itself as failed. Distinct from
    /// a transport or HTTP failure.
    #[error("computation errored: {0}")]
    JobErrored(String),

    /// Aggregation inputs do not share the same binning or member layout.
    #[error("incompatible data: {0}")]
    IncompatibleData(String),

    /// Unsupported uncertainty combination method. Never silently defaulted.
    #[error("unknown combination method: {0}")]
    UnknownMethod(String),

    /// Malformed request-building input.
    #[error("invalid specification: {0}")]
    InvalidSpec(String),

    /// A server response could not be decoded.
    #[error("failed to decode server response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Local job-state file could not be read or written.
    #[error("job store error: {0}")]
    Store(#[from] std::io::Error),
}
