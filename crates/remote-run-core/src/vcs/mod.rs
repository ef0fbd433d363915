//! Version-control backends.
//!
//! Each backend turns its tool's status output into [`CvsResource`]s and
//! serves file content through [`CvsProvider`].
//!
//! [`CvsResource`]: crate::resource::CvsResource
//! [`CvsProvider`]: crate::provider::CvsProvider

pub mod git;
mod process;
pub mod tfvc;

pub use git::{ContentMode, GitConfig, GitProvider};
pub use tfvc::{RenameHistory, TfvcConfig, TfvcProvider};
