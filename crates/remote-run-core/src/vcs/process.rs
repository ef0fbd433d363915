//! Spawning VCS command-line tools.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{RemoteRunError, Result};

/// Run `binary args..` in `cwd` and return its stdout.
///
/// A non-zero exit status is an error carrying the tool's stderr.
pub(crate) async fn run_tool(binary: &str, args: &[&str], cwd: &Path) -> Result<String> {
    debug!(binary, ?args, cwd = %cwd.display(), "running vcs tool");
    let output = Command::new(binary)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| RemoteRunError::Provider(format!("failed to run {binary}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RemoteRunError::Provider(format!(
            "{binary} {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
