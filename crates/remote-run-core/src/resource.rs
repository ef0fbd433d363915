//! Change model for a single file in a remote run.
//!
//! A [`CvsResource`] is one changed file as seen by a version-control
//! backend. The change kind is a closed sum type; each kind maps to the
//! fixed prefix byte written before its path in the patch.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::provider::CvsProvider;

/// Prefix byte of a deleted file record.
pub const DELETED_PREFIX: u8 = 3;
/// Prefix byte of a modified (or renamed) file record.
pub const MODIFIED_PREFIX: u8 = 25;
/// Prefix byte of an added file record.
pub const ADDED_PREFIX: u8 = 26;
/// Prefix byte of the end-of-patch marker.
pub const TERMINATOR_PREFIX: u8 = 10;

/// Kind of change for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed {
        previous_local_path: PathBuf,
        previous_server_path: String,
    },
}

impl ChangeKind {
    /// Prefix byte written before the resource path.
    ///
    /// Renames share the modified prefix; the receiver learns about the old
    /// name from the synthetic deletion that follows the record.
    pub fn prefix(&self) -> u8 {
        match self {
            ChangeKind::Deleted => DELETED_PREFIX,
            ChangeKind::Modified | ChangeKind::Renamed { .. } => MODIFIED_PREFIX,
            ChangeKind::Added => ADDED_PREFIX,
        }
    }

    /// Short lowercase label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed { .. } => "renamed",
        }
    }

    /// Whether a record of this kind carries file content.
    pub fn has_content(&self) -> bool {
        !matches!(self, ChangeKind::Deleted)
    }
}

/// One changed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CvsResource {
    #[serde(flatten)]
    pub kind: ChangeKind,
    /// Absolute path in the local working copy.
    pub local_path: PathBuf,
    /// Path as the build server knows it.
    pub server_path: String,
}

impl CvsResource {
    pub fn new(
        kind: ChangeKind,
        local_path: impl Into<PathBuf>,
        server_path: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            local_path: local_path.into(),
            server_path: server_path.into(),
        }
    }

    pub fn added(local_path: impl Into<PathBuf>, server_path: impl Into<String>) -> Self {
        Self::new(ChangeKind::Added, local_path, server_path)
    }

    pub fn modified(local_path: impl Into<PathBuf>, server_path: impl Into<String>) -> Self {
        Self::new(ChangeKind::Modified, local_path, server_path)
    }

    pub fn deleted(local_path: impl Into<PathBuf>, server_path: impl Into<String>) -> Self {
        Self::new(ChangeKind::Deleted, local_path, server_path)
    }

    pub fn renamed(
        local_path: impl Into<PathBuf>,
        server_path: impl Into<String>,
        previous_local_path: impl Into<PathBuf>,
        previous_server_path: impl Into<String>,
    ) -> Self {
        Self::new(
            ChangeKind::Renamed {
                previous_local_path: previous_local_path.into(),
                previous_server_path: previous_server_path.into(),
            },
            local_path,
            server_path,
        )
    }

    /// Synthetic deletion of the old name of a renamed resource.
    pub fn previous_as_deleted(&self) -> Option<CvsResource> {
        match &self.kind {
            ChangeKind::Renamed {
                previous_local_path,
                previous_server_path,
            } => Some(CvsResource::deleted(
                previous_local_path.clone(),
                previous_server_path.clone(),
            )),
            _ => None,
        }
    }

    pub fn prefix(&self) -> u8 {
        self.kind.prefix()
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

/// Changes collected from one provider, plus the message to send with them.
///
/// Holds only a weak reference to the provider; it is used to fetch content
/// while the patch is being built and never keeps the provider alive.
#[derive(Debug, Clone)]
pub struct CheckInInfo {
    pub resources: Vec<CvsResource>,
    pub message: String,
    provider: Weak<dyn CvsProvider>,
}

impl CheckInInfo {
    pub fn new(
        provider: &Arc<dyn CvsProvider>,
        resources: Vec<CvsResource>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            resources,
            message: message.into(),
            provider: Arc::downgrade(provider),
        }
    }

    /// Scan `provider` for pending changes.
    pub async fn collect(
        provider: &Arc<dyn CvsProvider>,
        message: impl Into<String>,
    ) -> Result<Self> {
        let resources = provider.changed_resources().await?;
        Ok(Self::new(provider, resources, message))
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// The originating provider, if it is still alive.
    pub fn provider(&self) -> Option<Arc<dyn CvsProvider>> {
        self.provider.upgrade()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryContentProvider;

    #[test]
    fn test_prefix_table() {
        assert_eq!(ChangeKind::Deleted.prefix(), 3);
        assert_eq!(ChangeKind::Modified.prefix(), 25);
        assert_eq!(ChangeKind::Added.prefix(), 26);
        let renamed = CvsResource::renamed("/w/new.txt", "new.txt", "/w/old.txt", "old.txt");
        assert_eq!(renamed.prefix(), MODIFIED_PREFIX);
    }

    #[test]
    fn test_only_deleted_has_no_content() {
        assert!(ChangeKind::Added.has_content());
        assert!(ChangeKind::Modified.has_content());
        assert!(!ChangeKind::Deleted.has_content());
        let renamed = CvsResource::renamed("/w/n", "n", "/w/o", "o");
        assert!(renamed.kind.has_content());
    }

    #[test]
    fn test_previous_as_deleted() {
        let renamed = CvsResource::renamed("/w/new.txt", "new.txt", "/w/old.txt", "old.txt");
        let deleted = renamed.previous_as_deleted().unwrap();
        assert_eq!(deleted.kind, ChangeKind::Deleted);
        assert_eq!(deleted.server_path, "old.txt");
        assert_eq!(deleted.local_path, PathBuf::from("/w/old.txt"));

        assert!(CvsResource::added("/w/a", "a").previous_as_deleted().is_none());
    }

    #[test]
    fn test_resource_serde_shape() {
        let renamed = CvsResource::renamed("/w/new.txt", "new.txt", "/w/old.txt", "old.txt");
        let json = serde_json::to_value(&renamed).unwrap();
        assert_eq!(json["kind"], "renamed");
        assert_eq!(json["previous_server_path"], "old.txt");
        assert_eq!(json["server_path"], "new.txt");
    }

    #[test]
    fn test_check_in_info_does_not_own_provider() {
        let provider: Arc<dyn CvsProvider> = Arc::new(MemoryContentProvider::new());
        let mut info = CheckInInfo::new(&provider, vec![CvsResource::added("/w/a", "a")], "msg");
        info.set_message("edited");
        assert_eq!(info.message, "edited");
        assert!(info.provider().is_some());

        drop(provider);
        assert!(info.provider().is_none());
    }
}
