//! In-memory fakes for the provider and build-server traits (testing only)
//!
//! Provides `MemoryContentProvider` and `MemoryBuildServer`, which satisfy
//! the trait contracts without touching a VCS binary or the network.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::credentials::Credentials;
use crate::error::{RemoteRunError, Result};
use crate::provider::{ContentStream, CvsProvider};
use crate::resource::CvsResource;
use crate::server::{BuildConfig, BuildId, BuildInfo, BuildServer, ChangeListId};

// ---------------------------------------------------------------------------
// MemoryContentProvider
// ---------------------------------------------------------------------------

/// Provider serving content from a `HashMap<local path, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryContentProvider {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    changes: Mutex<Vec<CvsResource>>,
}

impl MemoryContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(path.into(), bytes);
    }

    /// Resources returned by `changed_resources`.
    pub fn set_changes(&self, changes: Vec<CvsResource>) {
        *self.changes.lock().unwrap() = changes;
    }
}

#[async_trait]
impl CvsProvider for MemoryContentProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn changed_resources(&self) -> Result<Vec<CvsResource>> {
        Ok(self.changes.lock().unwrap().clone())
    }

    async fn content(&self, resource: &CvsResource) -> Result<ContentStream> {
        let files = self.files.lock().unwrap();
        files
            .get(resource.local_path())
            .map(|bytes| ContentStream::from_bytes(bytes.clone()))
            .ok_or_else(|| {
                RemoteRunError::content_unavailable(resource.local_path(), "no such file")
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryBuildServer
// ---------------------------------------------------------------------------

/// One recorded upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub patch: Vec<u8>,
    pub message: String,
    pub user_id: String,
}

#[derive(Debug, Default)]
struct ServerState {
    uploads: Vec<RecordedUpload>,
    triggered: Vec<(ChangeListId, String)>,
    failing_triggers: Vec<String>,
    scripts: HashMap<String, VecDeque<BuildInfo>>,
    pending_info_failures: HashMap<String, usize>,
    info_requests: HashMap<String, usize>,
    next_build: u64,
    requests: usize,
}

/// Build server that records calls and replays scripted build states.
///
/// Build ids are assigned sequentially from `"1"`. A build's script is
/// consumed one entry per request; the last entry repeats forever. Builds
/// without a script report `SUCCESS` straight away.
#[derive(Debug, Default)]
pub struct MemoryBuildServer {
    state: Mutex<ServerState>,
}

impl MemoryBuildServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_build_info(&self, build_id: &str, infos: Vec<BuildInfo>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(build_id.to_string(), infos.into());
    }

    /// Make the first `count` info requests for `build_id` fail.
    pub fn fail_info_requests(&self, build_id: &str, count: usize) {
        self.state
            .lock()
            .unwrap()
            .pending_info_failures
            .insert(build_id.to_string(), count);
    }

    pub fn fail_trigger_for(&self, build_config_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_triggers
            .push(build_config_id.to_string());
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn triggered_configs(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.triggered.iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn info_requests(&self, build_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.info_requests.get(build_id).copied().unwrap_or(0)
    }

    /// Total number of calls across all endpoints.
    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests
    }
}

#[async_trait]
impl BuildServer for MemoryBuildServer {
    async fn upload_changes(
        &self,
        credentials: &Credentials,
        patch: &Path,
        message: &str,
    ) -> Result<ChangeListId> {
        let bytes = tokio::fs::read(patch).await?;
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        state.uploads.push(RecordedUpload {
            patch: bytes,
            message: message.to_string(),
            user_id: credentials.user_id.clone(),
        });
        Ok(ChangeListId(format!("cl-{}", state.uploads.len())))
    }

    async fn trigger_build(
        &self,
        _credentials: &Credentials,
        change_list: &ChangeListId,
        config: &BuildConfig,
    ) -> Result<BuildId> {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        if state.failing_triggers.contains(&config.id) {
            return Err(RemoteRunError::Server {
                status: 500,
                body: format!("cannot queue {}", config.id),
            });
        }
        state.triggered.push((change_list.clone(), config.id.clone()));
        state.next_build += 1;
        Ok(BuildId(state.next_build.to_string()))
    }

    async fn build_info(&self, _credentials: &Credentials, build: &BuildId) -> Result<BuildInfo> {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        *state.info_requests.entry(build.0.clone()).or_default() += 1;

        if let Some(remaining) = state.pending_info_failures.get_mut(&build.0) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteRunError::Network("connection reset".to_string()));
            }
        }

        let Some(script) = state.scripts.get_mut(&build.0) else {
            return Ok(BuildInfo::finished("SUCCESS"));
        };
        let info = if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().cloned().unwrap_or_default()
        };
        Ok(info)
    }
}
