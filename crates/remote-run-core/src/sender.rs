//! Upload a patch, queue builds against it and follow them to completion.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::credentials::{CredentialStore, Credentials};
use crate::error::{RemoteRunError, Result};
use crate::patch::PatchBuilder;
use crate::poll::{retry_with_delay, CancellationFlag, PollConfig};
use crate::resource::CheckInInfo;
use crate::server::{BuildConfig, BuildServer, ChangeListId, QueuedBuild};

/// Aggregate outcome of a remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeListStatus {
    /// Every queued build finished with `SUCCESS`.
    Checked,
    Failed,
}

impl fmt::Display for ChangeListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeListStatus::Checked => write!(f, "CHECKED"),
            ChangeListStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Everything a caller needs to present a finished remote run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRunReport {
    pub change_list: ChangeListId,
    pub builds: Vec<QueuedBuild>,
    pub status: ChangeListStatus,
}

impl RemoteRunReport {
    pub fn failed_builds(&self) -> impl Iterator<Item = &QueuedBuild> {
        self.builds.iter().filter(|b| !b.succeeded())
    }
}

/// Builds queued by [`PatchSender::send_patch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPatch {
    pub change_list: ChangeListId,
    pub builds: Vec<QueuedBuild>,
}

/// Sends patches to a build server and polls the resulting builds.
pub struct PatchSender {
    server: Arc<dyn BuildServer>,
    credentials: Arc<dyn CredentialStore>,
    poll: PollConfig,
    cancel: CancellationFlag,
}

impl PatchSender {
    pub fn new(server: Arc<dyn BuildServer>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            server,
            credentials,
            poll: PollConfig::default(),
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops any in-flight polling when raised.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Usable credentials, or `AuthRequired` when any field is missing.
    pub fn require_credentials(&self) -> Result<Credentials> {
        self.credentials
            .credentials()
            .filter(Credentials::is_valid)
            .ok_or(RemoteRunError::AuthRequired)
    }

    /// Upload `patch_path` and queue one build per configuration, in input
    /// order. Any trigger failure fails the whole call.
    pub async fn send_patch(
        &self,
        build_configs: &[BuildConfig],
        patch_path: &Path,
        message: &str,
    ) -> Result<SentPatch> {
        let credentials = self.require_credentials()?;
        if build_configs.is_empty() {
            return Err(RemoteRunError::InvalidState(
                "no build configurations selected".to_string(),
            ));
        }

        let change_list = self
            .server
            .upload_changes(&credentials, patch_path, message)
            .await?;
        info!(change_list = %change_list, patch = %patch_path.display(), "patch uploaded");

        let mut builds = Vec::with_capacity(build_configs.len());
        for config in build_configs {
            let build_id = self
                .server
                .trigger_build(&credentials, &change_list, config)
                .await?;
            info!(build_id = %build_id, build_config = %config.id, "build queued");
            builds.push(QueuedBuild::new(build_id, &config.id));
        }

        Ok(SentPatch {
            change_list,
            builds,
        })
    }

    /// Poll every build, one after another, until each reports a terminal
    /// status. Failures do not cut polling short: later builds are still
    /// followed to completion.
    pub async fn wait_for_change_finish(
        &self,
        builds: &mut [QueuedBuild],
    ) -> Result<ChangeListStatus> {
        let credentials = self.require_credentials()?;
        let mut all_passed = true;

        for build in builds.iter_mut() {
            let status = self.poll_build(&credentials, build).await?;
            info!(build_id = %build.build_id, status = %status, "build finished");
            build.status = Some(status);
            all_passed &= build.succeeded();
        }

        Ok(if all_passed {
            ChangeListStatus::Checked
        } else {
            ChangeListStatus::Failed
        })
    }

    async fn poll_build(&self, credentials: &Credentials, build: &QueuedBuild) -> Result<String> {
        let server = &self.server;
        retry_with_delay(self.poll.interval, Some(&self.cancel), || async move {
            match server.build_info(credentials, &build.build_id).await {
                Ok(info) => {
                    let status = info.terminal_status().map(str::to_string);
                    if status.is_none() {
                        debug!(
                            build_id = %build.build_id,
                            state = ?info.state,
                            "build not finished"
                        );
                    }
                    status
                }
                Err(e) => {
                    warn!(
                        build_id = %build.build_id,
                        error = %e,
                        "build info request failed, retrying"
                    );
                    None
                }
            }
        })
        .await
    }

    /// Build a patch from `check_ins`, send it and wait for every build.
    pub async fn run(
        &self,
        builder: &mut PatchBuilder,
        check_ins: &[CheckInInfo],
        build_configs: &[BuildConfig],
        message: &str,
    ) -> Result<RemoteRunReport> {
        self.require_credentials()?;
        let patch = builder.prepare_patch(check_ins).await?;
        let SentPatch {
            change_list,
            mut builds,
        } = self.send_patch(build_configs, &patch, message).await?;
        let status = self.wait_for_change_finish(&mut builds).await?;
        Ok(RemoteRunReport {
            change_list,
            builds,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::fakes::MemoryBuildServer;
    use crate::server::BuildInfo;
    use std::time::Duration;

    fn credentials() -> Arc<dyn CredentialStore> {
        Arc::new(StaticCredentials::new(Credentials::new(
            "https://ci.example.com",
            "dev",
            "secret",
            "42",
        )))
    }

    fn patch_file() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.patch");
        std::fs::write(&path, [10, 0, 0]).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_network() {
        let server = Arc::new(MemoryBuildServer::new());
        let sender = PatchSender::new(server.clone(), Arc::new(StaticCredentials::empty()));
        let (_dir, patch) = patch_file();

        let err = sender
            .send_patch(&[BuildConfig::new("Proj_Build")], &patch, "msg")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteRunError::AuthRequired));
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_credentials_are_rejected() {
        let server = Arc::new(MemoryBuildServer::new());
        let blank = StaticCredentials::new(Credentials::new("https://ci", "dev", "", "42"));
        let sender = PatchSender::new(server.clone(), Arc::new(blank));
        let (_dir, patch) = patch_file();

        let err = sender
            .send_patch(&[BuildConfig::new("Proj_Build")], &patch, "msg")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteRunError::AuthRequired));
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_triggers_in_config_order() {
        let server = Arc::new(MemoryBuildServer::new());
        let sender = PatchSender::new(server.clone(), credentials());
        let (_dir, patch) = patch_file();
        let configs = [BuildConfig::new("B"), BuildConfig::new("A"), BuildConfig::new("C")];

        let sent = sender.send_patch(&configs, &patch, "fix it").await.unwrap();
        let ids: Vec<_> = sent.builds.iter().map(|b| b.build_config_id.as_str()).collect();
        assert_eq!(ids, ["B", "A", "C"]);
        assert_eq!(server.uploads()[0].message, "fix it");
        assert_eq!(server.uploads()[0].user_id, "42");
        assert_eq!(server.triggered_configs(), ["B", "A", "C"]);
    }

    #[tokio::test]
    async fn test_trigger_failure_aborts_send() {
        let server = Arc::new(MemoryBuildServer::new());
        server.fail_trigger_for("A");
        let sender = PatchSender::new(server.clone(), credentials());
        let (_dir, patch) = patch_file();
        let configs = [BuildConfig::new("B"), BuildConfig::new("A"), BuildConfig::new("C")];

        let err = sender.send_patch(&configs, &patch, "msg").await.unwrap_err();
        assert!(matches!(err, RemoteRunError::Server { .. }));
        assert_eq!(server.triggered_configs(), ["B"]);
    }

    #[tokio::test]
    async fn test_no_configs_is_rejected() {
        let server = Arc::new(MemoryBuildServer::new());
        let sender = PatchSender::new(server.clone(), credentials());
        let (_dir, patch) = patch_file();
        assert!(sender.send_patch(&[], &patch, "msg").await.is_err());
        assert!(server.uploads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_every_build_despite_failure() {
        let server = Arc::new(MemoryBuildServer::new());
        let sender = PatchSender::new(server.clone(), credentials());
        let (_dir, patch) = patch_file();
        server.script_build_info(
            "1",
            vec![BuildInfo::running(), BuildInfo::finished("FAILURE")],
        );
        server.script_build_info(
            "2",
            vec![BuildInfo::running(), BuildInfo::running(), BuildInfo::finished("SUCCESS")],
        );

        let mut sent = sender
            .send_patch(&[BuildConfig::new("A"), BuildConfig::new("B")], &patch, "m")
            .await
            .unwrap();
        let status = sender.wait_for_change_finish(&mut sent.builds).await.unwrap();

        assert_eq!(status, ChangeListStatus::Failed);
        assert_eq!(server.info_requests("1"), 2);
        assert_eq!(server.info_requests("2"), 3);
        assert_eq!(sent.builds[0].status.as_deref(), Some("FAILURE"));
        assert_eq!(sent.builds[1].status.as_deref(), Some("SUCCESS"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_success_is_checked() {
        let server = Arc::new(MemoryBuildServer::new());
        let sender = PatchSender::new(server.clone(), credentials())
            .with_poll_config(PollConfig::with_interval(Duration::from_secs(2)));
        let (_dir, patch) = patch_file();
        server.script_build_info("1", vec![BuildInfo::finished("SUCCESS")]);
        server.script_build_info("2", vec![BuildInfo::finished("SUCCESS")]);

        let mut sent = sender
            .send_patch(&[BuildConfig::new("A"), BuildConfig::new("B")], &patch, "m")
            .await
            .unwrap();
        let status = sender.wait_for_change_finish(&mut sent.builds).await.unwrap();
        assert_eq!(status, ChangeListStatus::Checked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_retried() {
        let server = Arc::new(MemoryBuildServer::new());
        let sender = PatchSender::new(server.clone(), credentials());
        let (_dir, patch) = patch_file();
        server.fail_info_requests("1", 2);
        server.script_build_info("1", vec![BuildInfo::finished("SUCCESS")]);

        let mut sent = sender
            .send_patch(&[BuildConfig::new("A")], &patch, "m")
            .await
            .unwrap();
        let status = sender.wait_for_change_finish(&mut sent.builds).await.unwrap();
        assert_eq!(status, ChangeListStatus::Checked);
        assert_eq!(server.info_requests("1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let server = Arc::new(MemoryBuildServer::new());
        let sender = PatchSender::new(server.clone(), credentials());
        let (_dir, patch) = patch_file();
        server.script_build_info("1", vec![BuildInfo::running()]);

        let mut sent = sender
            .send_patch(&[BuildConfig::new("A")], &patch, "m")
            .await
            .unwrap();
        let flag = sender.cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(35)).await;
            flag.cancel();
        });

        let err = sender.wait_for_change_finish(&mut sent.builds).await.unwrap_err();
        assert!(matches!(err, RemoteRunError::Cancelled));
        assert!(sent.builds[0].status.is_none());
    }
}
