//! Git backend: pending changes from `git diff --name-status`.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use super::process::run_tool;
use crate::error::{RemoteRunError, Result, StatusRowError};
use crate::provider::{ContentStream, CvsProvider};
use crate::resource::CvsResource;

/// One entry of `git diff --name-status` output, paths relative to the
/// repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitChange {
    Added(String),
    Modified(String),
    Deleted(String),
    Renamed { from: String, to: String },
}

/// Parse one tab-separated `--name-status` row.
///
/// Rename and copy codes carry a similarity score (`R087`) and two paths.
/// A copy is reported as an addition of its destination.
pub fn parse_status_row(row: &str) -> std::result::Result<GitChange, StatusRowError> {
    let mut fields = row.split('\t');
    let code = fields.next().unwrap_or_default();
    let paths: Vec<&str> = fields.filter(|p| !p.is_empty()).collect();
    parse_status_fields(code, &paths)
}

/// Classify a status code and its already separated paths.
pub fn parse_status_fields(
    code: &str,
    paths: &[&str],
) -> std::result::Result<GitChange, StatusRowError> {
    let code = code.trim();
    let mut chars = code.chars();
    let letter = chars.next().ok_or(StatusRowError::Malformed)?;
    let score = chars.as_str();
    if !score.chars().all(|c| c.is_ascii_digit()) {
        return Err(StatusRowError::UnknownCode {
            code: code.to_string(),
        });
    }

    let expect = |n: usize| {
        if paths.len() == n {
            Ok(())
        } else {
            Err(StatusRowError::PathCount {
                code: code.to_string(),
                expected: n,
                actual: paths.len(),
            })
        }
    };

    match letter {
        'M' => expect(1).map(|_| GitChange::Modified(paths[0].to_string())),
        'A' => expect(1).map(|_| GitChange::Added(paths[0].to_string())),
        'D' => expect(1).map(|_| GitChange::Deleted(paths[0].to_string())),
        'R' => expect(2).map(|_| GitChange::Renamed {
            from: paths[0].to_string(),
            to: paths[1].to_string(),
        }),
        'C' => expect(2).map(|_| GitChange::Added(paths[1].to_string())),
        _ => Err(StatusRowError::UnknownCode {
            code: code.to_string(),
        }),
    }
}

/// Number of path fields following `code` in `-z` output.
fn path_count(code: &str) -> usize {
    match code.chars().next() {
        Some('R') | Some('C') => 2,
        _ => 1,
    }
}

/// Parse a whole `--name-status -z` listing.
///
/// Every code and path is its own NUL-terminated field, so paths arrive
/// verbatim with no quoting. Entries that fail to parse are logged and
/// skipped.
pub fn parse_status_output(output: &str) -> Vec<GitChange> {
    let mut fields = output.split('\0').filter(|f| !f.is_empty());
    let mut changes = Vec::new();

    while let Some(code) = fields.next() {
        let paths: Vec<&str> = fields.by_ref().take(path_count(code)).collect();
        match parse_status_fields(code, &paths) {
            Ok(change) => changes.push(change),
            Err(reason) => {
                let mut row = vec![code];
                row.extend(&paths);
                let err = RemoteRunError::Parse {
                    row: row.join("\t"),
                    reason,
                };
                warn!(error = %err, "skipping git status entry");
            }
        }
    }
    changes
}

/// Where content of modified files is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    /// Files as they are on disk, staged or not.
    #[default]
    WorkingTree,
    /// Only what has been staged in the index.
    Staged,
}

/// Git provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Path to the git binary.
    pub binary: String,
    /// Any directory inside the working tree.
    pub work_dir: PathBuf,
    pub content_mode: ContentMode,
    /// Remote whose URL identifies the repository on the build server.
    pub remote: String,
}

impl GitConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: "git".to_string(),
            work_dir: work_dir.into(),
            content_mode: ContentMode::default(),
            remote: "origin".to_string(),
        }
    }

    pub fn with_content_mode(mut self, content_mode: ContentMode) -> Self {
        self.content_mode = content_mode;
        self
    }
}

/// Git working copy.
#[derive(Debug)]
pub struct GitProvider {
    config: GitConfig,
    root: PathBuf,
    remote_url: String,
}

impl GitProvider {
    /// Locate the repository root and the remote URL for `config`.
    pub async fn discover(config: GitConfig) -> Result<Self> {
        let root = run_tool(&config.binary, &["rev-parse", "--show-toplevel"], &config.work_dir)
            .await?
            .trim()
            .to_string();
        if root.is_empty() {
            return Err(RemoteRunError::Provider(
                "git rev-parse --show-toplevel returned empty output".to_string(),
            ));
        }
        let root = PathBuf::from(root);

        let key = format!("remote.{}.url", config.remote);
        let remote_url = match run_tool(&config.binary, &["config", "--get", &key], &root).await {
            Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => {
                warn!(remote = %config.remote, "remote has no url, using repository root");
                root.display().to_string()
            }
        };

        debug!(root = %root.display(), remote_url = %remote_url, "discovered git repository");
        Ok(Self {
            config,
            root,
            remote_url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build-server path of a repository-relative file.
    pub fn server_path(&self, relative: &str) -> String {
        format!("jetbrains.git://|{}|{}", self.remote_url, relative)
    }

    fn to_resource(&self, change: GitChange) -> CvsResource {
        let local = |rel: &str| self.root.join(rel);
        match change {
            GitChange::Added(p) => CvsResource::added(local(&p), self.server_path(&p)),
            GitChange::Modified(p) => CvsResource::modified(local(&p), self.server_path(&p)),
            GitChange::Deleted(p) => CvsResource::deleted(local(&p), self.server_path(&p)),
            GitChange::Renamed { from, to } => CvsResource::renamed(
                local(&to),
                self.server_path(&to),
                local(&from),
                self.server_path(&from),
            ),
        }
    }

    fn relative_path(&self, resource: &CvsResource) -> Result<String> {
        let rel = resource.local_path().strip_prefix(&self.root).map_err(|_| {
            RemoteRunError::content_unavailable(resource.local_path(), "outside the repository")
        })?;
        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    async fn staged_content(&self, resource: &CvsResource) -> Result<ContentStream> {
        let rel = self.relative_path(resource)?;
        let object = format!(":{rel}");
        let path = resource.local_path();

        let size = run_tool(&self.config.binary, &["cat-file", "-s", &object], &self.root)
            .await
            .map_err(|e| RemoteRunError::content_unavailable(path, e))?;
        let length: u64 = size.trim().parse().map_err(|_| {
            RemoteRunError::content_unavailable(path, format!("bad blob size {size:?}"))
        })?;

        let mut child = Command::new(&self.config.binary)
            .args(["cat-file", "blob", &object])
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemoteRunError::content_unavailable(path, e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            RemoteRunError::content_unavailable(path, "no stdout from git cat-file")
        })?;

        Ok(ContentStream::new(length, StagedBlob { _child: child, stdout }))
    }
}

#[async_trait]
impl CvsProvider for GitProvider {
    fn name(&self) -> &str {
        "git"
    }

    async fn changed_resources(&self) -> Result<Vec<CvsResource>> {
        let mut args = vec!["-c", "core.quotepath=off", "diff", "--name-status", "-z", "-M"];
        if self.config.content_mode == ContentMode::Staged {
            args.push("--cached");
        }
        args.push("HEAD");

        let output = run_tool(&self.config.binary, &args, &self.root).await?;
        let resources: Vec<_> = parse_status_output(&output)
            .into_iter()
            .map(|change| self.to_resource(change))
            .collect();
        debug!(count = resources.len(), "collected git changes");
        Ok(resources)
    }

    async fn content(&self, resource: &CvsResource) -> Result<ContentStream> {
        match self.config.content_mode {
            ContentMode::WorkingTree => ContentStream::open(resource.local_path()).await,
            ContentMode::Staged => self.staged_content(resource).await,
        }
    }
}

/// Blob streamed from a running `git cat-file`; keeps the child alive until
/// the stream is dropped.
struct StagedBlob {
    _child: Child,
    stdout: ChildStdout,
}

impl AsyncRead for StagedBlob {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}
