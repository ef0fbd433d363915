//! Append-only file sink used while a patch is being built.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter, ReadBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::encoding::encode_long;
use crate::error::{RemoteRunError, Result};
use crate::provider::ContentStream;

/// Single-file sink. All writes go through one lock, so concurrent callers
/// never interleave their bytes.
#[derive(Debug)]
pub struct StreamingWriter {
    path: PathBuf,
    sink: Mutex<Option<BufWriter<File>>>,
}

impl StreamingWriter {
    /// Create `path` (which must not exist yet) and open it for appending.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), "opened patch sink");
        Ok(Self {
            path,
            sink: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append raw bytes.
    pub async fn write(&self, buf: &[u8]) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or_else(closed)?;
        sink.write_all(buf).await?;
        Ok(())
    }

    /// Append an 8-byte length prefix followed by the content bytes.
    ///
    /// The content is relayed through a fixed-size buffer, so memory use does
    /// not grow with the file size. Returns the number of content bytes.
    ///
    /// A source that fails or ends early is reported as content unavailable
    /// for `source`; failures writing the sink stay io errors.
    pub async fn write_streamed_file(&self, source: &Path, content: ContentStream) -> Result<u64> {
        let ContentStream { length, reader } = content;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or_else(closed)?;

        sink.write_all(&encode_long(length)).await?;
        let mut limited = SourceReader {
            inner: reader.take(length),
            failed: false,
        };
        let copied = match tokio::io::copy(&mut limited, sink).await {
            Ok(copied) => copied,
            Err(e) if limited.failed => {
                return Err(RemoteRunError::content_unavailable(source, e));
            }
            Err(e) => return Err(e.into()),
        };
        if copied != length {
            return Err(RemoteRunError::content_unavailable(
                source,
                format!("content stream ended after {copied} of {length} bytes"),
            ));
        }
        Ok(copied)
    }

    /// Flush and close the sink. Calling it again is a no-op.
    pub async fn dispose(&self) -> Result<()> {
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            sink.flush().await?;
            sink.shutdown().await?;
            debug!(path = %self.path.display(), "closed patch sink");
        }
        Ok(())
    }

    pub async fn is_disposed(&self) -> bool {
        self.sink.lock().await.is_none()
    }
}

/// Records whether the wrapped source failed, so a copy error can be
/// attributed to the source or to the sink.
struct SourceReader<R> {
    inner: R,
    failed: bool,
}

impl<R: AsyncRead + Unpin> AsyncRead for SourceReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Err(_)) = &poll {
            this.failed = true;
        }
        poll
    }
}

fn closed() -> RemoteRunError {
    RemoteRunError::InvalidState("patch sink is already closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_and_dispose() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StreamingWriter::create(dir.path().join("p.bin")).await.unwrap();
        writer.write(b"abc").await.unwrap();
        writer.write(b"def").await.unwrap();
        writer.dispose().await.unwrap();

        assert_eq!(std::fs::read(writer.path()).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        std::fs::write(&path, b"old").unwrap();
        assert!(matches!(
            StreamingWriter::create(&path).await,
            Err(RemoteRunError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StreamingWriter::create(dir.path().join("p.bin")).await.unwrap();
        writer.dispose().await.unwrap();
        writer.dispose().await.unwrap();
        assert!(writer.is_disposed().await);
    }

    #[tokio::test]
    async fn test_write_after_dispose_fails() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StreamingWriter::create(dir.path().join("p.bin")).await.unwrap();
        writer.dispose().await.unwrap();
        assert!(matches!(
            writer.write(b"x").await,
            Err(RemoteRunError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_streamed_file_has_length_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StreamingWriter::create(dir.path().join("p.bin")).await.unwrap();
        let n = writer
            .write_streamed_file(Path::new("/w/hi"), ContentStream::from_bytes(b"hi".to_vec()))
            .await
            .unwrap();
        writer.dispose().await.unwrap();

        assert_eq!(n, 2);
        assert_eq!(
            std::fs::read(writer.path()).unwrap(),
            vec![0, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']
        );
    }

    #[tokio::test]
    async fn test_streamed_file_short_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StreamingWriter::create(dir.path().join("p.bin")).await.unwrap();
        let lying = ContentStream::new(10, std::io::Cursor::new(b"abc".to_vec()));
        let err = writer
            .write_streamed_file(Path::new("/w/short"), lying)
            .await
            .unwrap_err();
        match err {
            RemoteRunError::ContentUnavailable { path, reason } => {
                assert_eq!(path, PathBuf::from("/w/short"));
                assert!(reason.contains("3 of 10"));
            }
            other => panic!("expected ContentUnavailable, got {other:?}"),
        }
        writer.dispose().await.unwrap();
    }

    struct FailingSource;

    impl AsyncRead for FailingSource {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::other("disk went away")))
        }
    }

    #[tokio::test]
    async fn test_streamed_file_source_error_names_the_resource() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StreamingWriter::create(dir.path().join("p.bin")).await.unwrap();
        let err = writer
            .write_streamed_file(Path::new("/w/flaky"), ContentStream::new(4, FailingSource))
            .await
            .unwrap_err();
        match err {
            RemoteRunError::ContentUnavailable { path, reason } => {
                assert_eq!(path, PathBuf::from("/w/flaky"));
                assert!(reason.contains("disk went away"));
            }
            other => panic!("expected ContentUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streams_large_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("big.bin");
        let data = vec![0x5Au8; 3 * 1024 * 1024 + 17];
        std::fs::write(&source, &data).unwrap();

        let writer = StreamingWriter::create(dir.path().join("p.bin")).await.unwrap();
        let content = ContentStream::open(&source).await.unwrap();
        writer.write_streamed_file(&source, content).await.unwrap();
        writer.dispose().await.unwrap();

        let written = std::fs::read(writer.path()).unwrap();
        assert_eq!(written.len(), 8 + data.len());
        assert_eq!(&written[..8], &encode_long(data.len() as u64));
        assert!(written[8..] == data[..]);
    }

    #[tokio::test]
    async fn test_concurrent_writes_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(StreamingWriter::create(dir.path().join("p.bin")).await.unwrap());

        let mut handles = Vec::new();
        for byte in [b'a', b'b', b'c', b'd'] {
            let writer = Arc::clone(&writer);
            handles.push(tokio::spawn(async move {
                writer.write(&[byte; 4096]).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        writer.dispose().await.unwrap();

        let written = std::fs::read(writer.path()).unwrap();
        assert_eq!(written.len(), 4 * 4096);
        for chunk in written.chunks(4096) {
            assert!(chunk.iter().all(|b| *b == chunk[0]));
        }
    }
}
