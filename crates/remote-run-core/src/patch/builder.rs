//! Builds one patch file from a set of check-ins.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};
use uuid::Uuid;

use super::writer::StreamingWriter;
use super::{encode_header, encode_terminator};
use crate::error::{RemoteRunError, Result};
use crate::provider::CvsProvider;
use crate::resource::{CheckInInfo, CvsResource};

enum State {
    Idle,
    Opened(StreamingWriter),
    Finalized,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Opened(_) => "opened",
            State::Finalized => "finalized",
        }
    }
}

/// Single-use patch builder.
///
/// `start_patching` opens the output, `append_cvs_resource` adds records in
/// call order and `finish_patching` seals the file. Once finished (or
/// aborted) the builder rejects further work.
pub struct PatchBuilder {
    temp_root: PathBuf,
    state: State,
    records: usize,
    content_bytes: u64,
}

impl Default for PatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchBuilder {
    /// Builder placing its private directory under the system temp dir.
    pub fn new() -> Self {
        Self::with_temp_root(std::env::temp_dir())
    }

    pub fn with_temp_root(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            state: State::Idle,
            records: 0,
            content_bytes: 0,
        }
    }

    /// Number of header records written so far, synthetic deletions included.
    pub fn records_written(&self) -> usize {
        self.records
    }

    pub fn content_bytes_written(&self) -> u64 {
        self.content_bytes
    }

    /// Allocate a private directory and open a uniquely named patch file.
    ///
    /// The directory outlives the builder; removing it is left to the
    /// caller's temp-file housekeeping.
    pub async fn start_patching(&mut self) -> Result<PathBuf> {
        if !matches!(self.state, State::Idle) {
            return Err(RemoteRunError::InvalidState(format!(
                "cannot start patching in state {}",
                self.state.name()
            )));
        }

        let dir = tempfile::Builder::new()
            .prefix("remote-run-")
            .tempdir_in(&self.temp_root)?
            .keep();
        let path = dir.join(format!("{}.patch", Uuid::new_v4()));
        let writer = StreamingWriter::create(&path).await?;

        debug!(path = %path.display(), "started patch");
        self.state = State::Opened(writer);
        Ok(path)
    }

    fn writer(&self) -> Result<&StreamingWriter> {
        match &self.state {
            State::Opened(writer) => Ok(writer),
            other => Err(RemoteRunError::InvalidState(format!(
                "cannot append to patch in state {}",
                other.name()
            ))),
        }
    }

    /// Append one resource: its header, its content unless it is a deletion,
    /// and for renames a synthetic deletion of the previous path.
    pub async fn append_cvs_resource(
        &mut self,
        provider: &dyn CvsProvider,
        resource: &CvsResource,
    ) -> Result<()> {
        let writer = self.writer()?;

        writer.write(&encode_header(resource)?).await?;
        let mut records = 1;
        let mut content_bytes = 0;

        if resource.kind.has_content() {
            let content = provider.content(resource).await.map_err(|e| match e {
                unavailable @ RemoteRunError::ContentUnavailable { .. } => unavailable,
                other => RemoteRunError::content_unavailable(resource.local_path(), other),
            })?;
            content_bytes = writer
                .write_streamed_file(resource.local_path(), content)
                .await?;
        }

        if let Some(previous) = resource.previous_as_deleted() {
            writer.write(&encode_header(&previous)?).await?;
            records += 1;
        }

        debug!(
            kind = resource.kind.label(),
            server_path = %resource.server_path,
            content_bytes,
            "appended resource"
        );
        self.records += records;
        self.content_bytes += content_bytes;
        Ok(())
    }

    /// Write the terminator, close the file and return its path.
    ///
    /// A failure writing the terminator is logged and the path is returned
    /// regardless.
    pub async fn finish_patching(&mut self) -> Result<PathBuf> {
        let writer = match std::mem::replace(&mut self.state, State::Finalized) {
            State::Opened(writer) => writer,
            other => {
                let name = other.name();
                self.state = other;
                return Err(RemoteRunError::InvalidState(format!(
                    "cannot finish patch in state {name}"
                )));
            }
        };

        if let Err(e) = writer.write(&encode_terminator()).await {
            error!(path = %writer.path().display(), error = %e, "failed to write patch terminator");
        }
        if let Err(e) = writer.dispose().await {
            error!(path = %writer.path().display(), error = %e, "failed to close patch file");
        }

        let path = absolute(writer.path());
        info!(
            path = %path.display(),
            records = self.records,
            content_bytes = self.content_bytes,
            "patch finished"
        );
        Ok(path)
    }

    /// Close the file without a terminator. Used on failure paths.
    async fn abort(&mut self) {
        if let State::Opened(writer) = std::mem::replace(&mut self.state, State::Finalized) {
            if let Err(e) = writer.dispose().await {
                error!(
                    path = %writer.path().display(),
                    error = %e,
                    "failed to close aborted patch"
                );
            }
        }
    }

    /// Build a complete patch from `check_ins`, preserving group order and
    /// resource order within each group.
    pub async fn prepare_patch(&mut self, check_ins: &[CheckInInfo]) -> Result<PathBuf> {
        self.start_patching().await?;
        if let Err(e) = self.append_all(check_ins).await {
            self.abort().await;
            return Err(e);
        }
        self.finish_patching().await
    }

    async fn append_all(&mut self, check_ins: &[CheckInInfo]) -> Result<()> {
        for check_in in check_ins {
            if check_in.is_empty() {
                continue;
            }
            let provider = check_in.provider().ok_or_else(|| {
                RemoteRunError::Provider(
                    "provider was dropped before the patch was built".to_string(),
                )
            })?;
            for resource in &check_in.resources {
                self.append_cvs_resource(provider.as_ref(), resource).await?;
            }
        }
        Ok(())
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
