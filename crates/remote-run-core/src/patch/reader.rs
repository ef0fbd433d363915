//! Decoder for finished patch files.

use std::io::{self, Read};

use serde::Serialize;

use crate::encoding::{decode_long, LONG_LEN};
use crate::error::Result;
use crate::resource::{ADDED_PREFIX, DELETED_PREFIX, MODIFIED_PREFIX, TERMINATOR_PREFIX};

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchRecord {
    pub prefix: u8,
    pub server_path: String,
    /// Present for every record except deletions.
    pub content_length: Option<u64>,
    /// Only filled when the reader captures content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
}

impl PatchRecord {
    pub fn kind_label(&self) -> &'static str {
        match self.prefix {
            ADDED_PREFIX => "added",
            MODIFIED_PREFIX => "modified",
            DELETED_PREFIX => "deleted",
            _ => "unknown",
        }
    }
}

/// Streaming patch decoder. Content is skipped unless
/// [`PatchReader::capture_content`] is enabled.
pub struct PatchReader<R> {
    inner: R,
    capture: bool,
    finished: bool,
}

impl<R: Read> PatchReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            capture: false,
            finished: false,
        }
    }

    pub fn capture_content(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    /// Read the next record, or `None` once the terminator has been read.
    pub fn next_record(&mut self) -> Result<Option<PatchRecord>> {
        if self.finished {
            return Ok(None);
        }

        let mut prefix = [0u8; 1];
        self.inner.read_exact(&mut prefix)?;
        let prefix = prefix[0];
        let server_path = self.read_utf()?;

        if prefix == TERMINATOR_PREFIX && server_path.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        let (content_length, content) = match prefix {
            DELETED_PREFIX => (None, None),
            ADDED_PREFIX | MODIFIED_PREFIX => {
                let mut raw = [0u8; LONG_LEN];
                self.inner.read_exact(&mut raw)?;
                let length = decode_long(&raw).unwrap_or_default();
                let content = self.read_content(length)?;
                (Some(length), content)
            }
            other => {
                return Err(invalid(format!("unknown record prefix {other}")).into());
            }
        };

        Ok(Some(PatchRecord {
            prefix,
            server_path,
            content_length,
            content,
        }))
    }

    /// Read every remaining record.
    pub fn read_all(&mut self) -> Result<Vec<PatchRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    fn read_utf(&mut self) -> Result<String> {
        let mut len = [0u8; 2];
        self.inner.read_exact(&mut len)?;
        let mut bytes = vec![0u8; usize::from(u16::from_be_bytes(len))];
        self.inner.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| invalid(e.to_string()).into())
    }

    fn read_content(&mut self, length: u64) -> Result<Option<Vec<u8>>> {
        let mut limited = (&mut self.inner).take(length);
        let (copied, content) = if self.capture {
            let mut buf = Vec::new();
            let n = limited.read_to_end(&mut buf)? as u64;
            (n, Some(buf))
        } else {
            (io::copy(&mut limited, &mut io::sink())?, None)
        };
        if copied != length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("record content truncated at {copied} of {length} bytes"),
            )
            .into());
        }
        Ok(content)
    }
}

impl<R: Read> Iterator for PatchReader<R> {
    type Item = Result<PatchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
