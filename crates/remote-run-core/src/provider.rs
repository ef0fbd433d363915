//! Content capability implemented by each VCS backend.
//!
//! The patch builder only ever talks to [`CvsProvider`]; it never knows
//! whether bytes come from the working tree, the git index or elsewhere.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::{RemoteRunError, Result};
use crate::resource::CvsResource;

/// Byte stream for one resource together with its exact length.
pub struct ContentStream {
    pub length: u64,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl ContentStream {
    pub fn new(length: u64, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            length,
            reader: Box::new(reader),
        }
    }

    /// Stream a file from disk.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| RemoteRunError::content_unavailable(path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| RemoteRunError::content_unavailable(path, e))?;
        if !metadata.is_file() {
            return Err(RemoteRunError::content_unavailable(path, "not a regular file"));
        }
        Ok(Self::new(metadata.len(), file))
    }

    /// Stream an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self::new(bytes.len() as u64, std::io::Cursor::new(bytes))
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStream")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// A version-control backend that can list pending changes and serve their
/// content.
#[async_trait]
pub trait CvsProvider: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Scan the working copy for pending changes, in tool output order.
    async fn changed_resources(&self) -> Result<Vec<CvsResource>>;

    /// Content of a non-deleted resource.
    ///
    /// The default reads the working-tree file.
    async fn content(&self, resource: &CvsResource) -> Result<ContentStream> {
        ContentStream::open(resource.local_path()).await
    }
}
