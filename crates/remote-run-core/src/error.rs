//! Error taxonomy for building, sending and following a remote run.

use std::path::PathBuf;

/// Errors produced while parsing a single VCS status row.
///
/// These never abort a batch: the batch parser logs them and drops the row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusRowError {
    #[error("unknown status code {code:?}")]
    UnknownCode { code: String },

    #[error("status code {code:?} expects {expected} path(s), got {actual}")]
    PathCount {
        code: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed row")]
    Malformed,
}

/// Remote run errors.
#[derive(Debug, thiserror::Error)]
pub enum RemoteRunError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("string of {len} bytes exceeds the 65535 byte limit")]
    Encoding { len: usize },

    #[error("content unavailable for {path}: {reason}")]
    ContentUnavailable { path: PathBuf, reason: String },

    #[error("unparseable status row {row:?}: {reason}")]
    Parse {
        row: String,
        #[source]
        reason: StatusRowError,
    },

    #[error("credentials are required to send a remote run")]
    AuthRequired,

    #[error("network error: {0}")]
    Network(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("vcs provider error: {0}")]
    Provider(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl RemoteRunError {
    pub(crate) fn content_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        RemoteRunError::ContentUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for remote run operations.
pub type Result<T> = std::result::Result<T, RemoteRunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_error_display() {
        let err = RemoteRunError::Encoding { len: 70_000 };
        assert!(err.to_string().contains("70000"));
        assert!(err.to_string().contains("65535"));
    }

    #[test]
    fn test_parse_error_carries_row() {
        let err = RemoteRunError::Parse {
            row: "Z\tfoo".to_string(),
            reason: StatusRowError::UnknownCode {
                code: "Z".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("Z\\tfoo"));
        assert!(msg.contains("unknown status code"));
    }

    #[test]
    fn test_io_error_converts_with_question_mark() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(RemoteRunError::Io(_))));
    }

    #[test]
    fn test_content_unavailable_names_path() {
        let err = RemoteRunError::content_unavailable("/tmp/missing.txt", "not found");
        assert!(err.to_string().contains("/tmp/missing.txt"));
        assert!(err.to_string().contains("not found"));
    }
}
