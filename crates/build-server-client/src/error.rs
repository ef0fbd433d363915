//! Error types for build-server-client

use remote_run_core::RemoteRunError;
use thiserror::Error;

/// Errors talking to the build server
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport failure: connect, timeout, TLS
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx response
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// 2xx response we could not make sense of
    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid server url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// IO error reading the patch
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Http(err.to_string())
        }
    }
}

impl From<ClientError> for RemoteRunError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Http(msg) => RemoteRunError::Network(msg),
            ClientError::Status { status, body } => RemoteRunError::Server { status, body },
            ClientError::Decode(msg) => {
                RemoteRunError::Network(format!("unexpected response: {msg}"))
            }
            e @ ClientError::InvalidUrl { .. } => RemoteRunError::InvalidState(e.to_string()),
            ClientError::Io(e) => RemoteRunError::Io(e),
        }
    }
}

/// Result type for build server calls
pub type Result<T> = std::result::Result<T, ClientError>;
