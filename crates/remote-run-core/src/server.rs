//! Build server contract consumed by the sender.
//!
//! Three calls are needed: upload a patch, queue a build against the
//! uploaded changelist and read a build's state. Responses arrive here
//! already parsed; wire formats belong to the implementing client.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;
use crate::error::Result;

/// State reported for builds that have completed.
pub const FINISHED_STATE: &str = "finished";
/// Terminal status of a passing build.
pub const SUCCESS_STATUS: &str = "SUCCESS";

/// Server identifier of one uploaded patch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeListId(pub String);

impl fmt::Display for ChangeListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server identifier of one queued build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(pub String);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a build parameter lands on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Config,
    System,
    Env,
}

/// One key/value parameter passed when triggering a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParameter {
    pub kind: ParameterKind,
    pub name: String,
    pub value: String,
}

impl BuildParameter {
    pub fn new(kind: ParameterKind, name: &str, value: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Name as the server expects it, with `system.` or `env.` prepended
    /// unless already present.
    pub fn qualified_name(&self) -> String {
        let prefix = match self.kind {
            ParameterKind::Config => return self.name.clone(),
            ParameterKind::System => "system.",
            ParameterKind::Env => "env.",
        };
        if self.name.starts_with(prefix) {
            self.name.clone()
        } else {
            format!("{prefix}{}", self.name)
        }
    }
}

/// A build configuration selected for the remote run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// External id used by the trigger endpoint.
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<BuildParameter>,
}

impl BuildConfig {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: BuildParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// A build queued against an uploaded changelist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedBuild {
    pub build_id: BuildId,
    pub build_config_id: String,
    pub queued_at: DateTime<Utc>,
    /// Terminal status, set once polling observes the build finished.
    pub status: Option<String>,
}

impl QueuedBuild {
    pub fn new(build_id: BuildId, build_config_id: &str) -> Self {
        Self {
            build_id,
            build_config_id: build_config_id.to_string(),
            queued_at: Utc::now(),
            status: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status.as_deref() == Some(SUCCESS_STATUS)
    }
}

/// Build state as reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub state: Option<String>,
    pub status: Option<String>,
}

impl BuildInfo {
    pub fn finished(status: &str) -> Self {
        Self {
            state: Some(FINISHED_STATE.to_string()),
            status: Some(status.to_string()),
        }
    }

    pub fn running() -> Self {
        Self {
            state: Some("running".to_string()),
            status: None,
        }
    }

    /// The terminal status, present only once the build is finished and the
    /// server reported a non-empty status.
    pub fn terminal_status(&self) -> Option<&str> {
        if self.state.as_deref() != Some(FINISHED_STATE) {
            return None;
        }
        self.status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Remote build server.
#[async_trait]
pub trait BuildServer: Send + Sync {
    /// Upload the patch at `patch` with a free-text description.
    async fn upload_changes(
        &self,
        credentials: &Credentials,
        patch: &Path,
        message: &str,
    ) -> Result<ChangeListId>;

    /// Queue a personal build of `config` against `change_list`.
    async fn trigger_build(
        &self,
        credentials: &Credentials,
        change_list: &ChangeListId,
        config: &BuildConfig,
    ) -> Result<BuildId>;

    /// Current state of `build`.
    async fn build_info(&self, credentials: &Credentials, build: &BuildId) -> Result<BuildInfo>;
}
