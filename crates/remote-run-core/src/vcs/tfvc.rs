//! TFVC backend: pending changes from `tf diff /format:brief`.
//!
//! Brief rows look like `edit: C:\ws\src\a.cs` or `rename, edit: src/b.cs`,
//! a comma-separated list of change verbs followed by the local path.
//! Renames do not name their source in this listing, so it is looked up
//! separately per renamed file.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::process::run_tool;
use crate::error::{RemoteRunError, Result, StatusRowError};
use crate::provider::CvsProvider;
use crate::resource::CvsResource;

/// One change verb of a brief-diff row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TfvcVerb {
    Add,
    Branch,
    Undelete,
    Delete,
    Edit,
    Rename,
    /// Verbs with no bearing on the patch, e.g. `lock` or `encoding`.
    Other(String),
}

impl TfvcVerb {
    fn parse(verb: &str) -> Self {
        match verb.trim().to_ascii_lowercase().as_str() {
            "add" => TfvcVerb::Add,
            "branch" => TfvcVerb::Branch,
            "undelete" => TfvcVerb::Undelete,
            "delete" => TfvcVerb::Delete,
            "edit" => TfvcVerb::Edit,
            "rename" => TfvcVerb::Rename,
            other => TfvcVerb::Other(other.to_string()),
        }
    }
}

/// Change class of a brief-diff row before rename sources are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TfvcChange {
    Added(String),
    Modified(String),
    Deleted(String),
    /// `with_edit` records whether the row also carried `edit`, which
    /// decides the fallback when the rename source cannot be found.
    Renamed { path: String, with_edit: bool },
}

fn row_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(?P<verbs>[A-Za-z]+(?:\s*,\s*[A-Za-z]+)*)\s*:\s*(?P<path>\S.*?)\s*$")
            .expect("static regex is valid")
    })
}

/// Parse one brief-diff row.
pub fn parse_brief_row(row: &str) -> std::result::Result<TfvcChange, StatusRowError> {
    let caps = row_pattern()
        .captures(row)
        .ok_or(StatusRowError::Malformed)?;
    let verbs: Vec<TfvcVerb> = caps["verbs"].split(',').map(TfvcVerb::parse).collect();
    let path = caps["path"].to_string();
    let has = |v: TfvcVerb| verbs.contains(&v);

    if has(TfvcVerb::Add) || has(TfvcVerb::Branch) || has(TfvcVerb::Undelete) {
        Ok(TfvcChange::Added(path))
    } else if has(TfvcVerb::Delete) {
        Ok(TfvcChange::Deleted(path))
    } else if has(TfvcVerb::Rename) {
        Ok(TfvcChange::Renamed {
            path,
            with_edit: has(TfvcVerb::Edit),
        })
    } else if has(TfvcVerb::Edit) {
        Ok(TfvcChange::Modified(path))
    } else {
        Err(StatusRowError::UnknownCode {
            code: caps["verbs"].to_string(),
        })
    }
}

/// Parse a whole brief-diff listing. Unparseable rows are logged and
/// skipped; blank lines are ignored.
pub fn parse_brief_output(output: &str) -> Vec<TfvcChange> {
    output
        .lines()
        .filter(|row| !row.trim().is_empty())
        .filter_map(|row| match parse_brief_row(row) {
            Ok(change) => Some(change),
            Err(reason) => {
                let err = RemoteRunError::Parse {
                    row: row.to_string(),
                    reason,
                };
                warn!(error = %err, "skipping tfvc status row");
                None
            }
        })
        .collect()
}

/// Secondary lookup for the source of a pending rename.
#[async_trait]
pub trait RenameHistory: Send + Sync {
    /// Server item the file at `local_path` was renamed from.
    async fn previous_server_item(&self, local_path: &Path) -> Option<String>;
}

/// TFVC provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfvcConfig {
    /// Path to the `tf` binary.
    pub binary: String,
    /// Local root of the mapped workspace folder.
    pub workspace_root: PathBuf,
    /// Server folder mapped to `workspace_root`, e.g. `$/Project`.
    pub server_root: String,
}

impl TfvcConfig {
    pub fn new(workspace_root: impl Into<PathBuf>, server_root: &str) -> Self {
        Self {
            binary: "tf".to_string(),
            workspace_root: workspace_root.into(),
            server_root: server_root.trim_end_matches('/').to_string(),
        }
    }
}

/// TFVC workspace.
#[derive(Debug)]
pub struct TfvcProvider {
    config: TfvcConfig,
}

impl TfvcProvider {
    pub fn new(config: TfvcConfig) -> Self {
        Self { config }
    }

    /// Local path of a row path, relative rows being anchored at the
    /// workspace root.
    pub fn local_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.workspace_root.join(path)
        }
    }

    /// Server item (`$/...`) mapped to `local`, if it lies in the workspace.
    pub fn server_item(&self, local: &Path) -> Option<String> {
        let rel = local.strip_prefix(&self.config.workspace_root).ok()?;
        let mut item = self.config.server_root.clone();
        for component in rel.components() {
            item.push('/');
            item.push_str(&component.as_os_str().to_string_lossy());
        }
        Some(item)
    }

    /// Local path mapped to a server item.
    pub fn local_for_item(&self, item: &str) -> PathBuf {
        let rel = item
            .strip_prefix(&self.config.server_root)
            .unwrap_or(item)
            .trim_start_matches('/');
        rel.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.config.workspace_root.clone(), |acc, part| acc.join(part))
    }

    /// Build-server path of a server item.
    pub fn server_path(item: &str) -> String {
        format!("tfs://{item}")
    }

    /// Local path and build-server path for a row path, or `None` when it
    /// lies outside the workspace mapping.
    fn mapped(&self, path: &str) -> Option<(PathBuf, String)> {
        let local = self.local_path(path);
        match self.server_item(&local) {
            Some(item) => Some((local, Self::server_path(&item))),
            None => {
                warn!(path = %local.display(), "pending change outside the workspace mapping");
                None
            }
        }
    }

    /// Turn parsed rows into resources, resolving rename sources through
    /// `history`. Rows outside the workspace mapping are dropped.
    pub async fn resolve(
        &self,
        changes: Vec<TfvcChange>,
        history: &dyn RenameHistory,
    ) -> Vec<CvsResource> {
        let mut resources = Vec::with_capacity(changes.len());
        for change in changes {
            let resource = match change {
                TfvcChange::Added(p) => self.mapped(&p).map(|(l, s)| CvsResource::added(l, s)),
                TfvcChange::Modified(p) => {
                    self.mapped(&p).map(|(l, s)| CvsResource::modified(l, s))
                }
                TfvcChange::Deleted(p) => self.mapped(&p).map(|(l, s)| CvsResource::deleted(l, s)),
                TfvcChange::Renamed { path, with_edit } => match self.mapped(&path) {
                    Some((local, server_path)) => {
                        self.resolve_rename(local, server_path, with_edit, history).await
                    }
                    None => None,
                },
            };
            resources.extend(resource);
        }
        resources
    }

    async fn resolve_rename(
        &self,
        local: PathBuf,
        server_path: String,
        with_edit: bool,
        history: &dyn RenameHistory,
    ) -> Option<CvsResource> {
        match history.previous_server_item(&local).await {
            Some(previous) => Some(CvsResource::renamed(
                local,
                server_path,
                self.local_for_item(&previous),
                Self::server_path(&previous),
            )),
            None if with_edit => {
                debug!(path = %local.display(), "rename source unknown, sending as edit");
                Some(CvsResource::modified(local, server_path))
            }
            None => {
                warn!(path = %local.display(), "rename source unknown, dropping row");
                None
            }
        }
    }
}

fn source_item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\s*Source item\s*:\s*(?P<item>\$/\S.*?)\s*$")
            .expect("static regex is valid")
    })
}

/// Extract the rename source from `tf status /format:detailed` output.
pub fn parse_source_item(detailed: &str) -> Option<String> {
    source_item_pattern()
        .captures(detailed)
        .map(|caps| caps["item"].to_string())
}

#[async_trait]
impl RenameHistory for TfvcProvider {
    async fn previous_server_item(&self, local_path: &Path) -> Option<String> {
        let path = local_path.to_string_lossy();
        let args = ["status", &*path, "/format:detailed", "/noprompt"];
        match run_tool(&self.config.binary, &args, &self.config.workspace_root).await {
            Ok(output) => parse_source_item(&output),
            Err(e) => {
                warn!(path = %local_path.display(), error = %e, "rename source lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl CvsProvider for TfvcProvider {
    fn name(&self) -> &str {
        "tfvc"
    }

    async fn changed_resources(&self) -> Result<Vec<CvsResource>> {
        let root = self.config.workspace_root.to_string_lossy();
        let args = ["diff", &*root, "/format:brief", "/recursive", "/noprompt"];
        let output = run_tool(&self.config.binary, &args, &self.config.workspace_root).await?;
        let resources = self.resolve(parse_brief_output(&output), self).await;
        debug!(count = resources.len(), "collected tfvc changes");
        Ok(resources)
    }
}
