//! Remote Run Core
//!
//! Packs pending Git or TFVC changes into a binary patch, uploads it to a
//! build server, queues one personal build per selected configuration and
//! follows every build until it finishes.
//!
//! ## Flow
//!
//! 1. [`CheckInInfo::collect`] scans a [`CvsProvider`] for changes.
//! 2. [`PatchBuilder::prepare_patch`] writes the patch file.
//! 3. [`PatchSender::send_patch`] uploads it and queues builds.
//! 4. [`PatchSender::wait_for_change_finish`] polls the builds and
//!    aggregates a [`ChangeListStatus`].

pub mod credentials;
pub mod encoding;
pub mod error;
pub mod fakes;
pub mod patch;
pub mod poll;
pub mod provider;
pub mod resource;
pub mod sender;
pub mod server;
pub mod vcs;

pub use credentials::{CredentialStore, Credentials, EnvCredentialStore, StaticCredentials};
pub use encoding::{decode_long, encode_byte, encode_long, encode_utf};
pub use error::{RemoteRunError, Result, StatusRowError};
pub use patch::{PatchBuilder, PatchReader, PatchRecord, StreamingWriter};
pub use poll::{retry_with_delay, CancellationFlag, PollConfig};
pub use provider::{ContentStream, CvsProvider};
pub use resource::{ChangeKind, CheckInInfo, CvsResource};
pub use sender::{ChangeListStatus, PatchSender, RemoteRunReport, SentPatch};
pub use server::{
    BuildConfig, BuildId, BuildInfo, BuildParameter, BuildServer, ChangeListId, ParameterKind,
    QueuedBuild,
};
pub use vcs::{ContentMode, GitConfig, GitProvider, TfvcConfig, TfvcProvider};
