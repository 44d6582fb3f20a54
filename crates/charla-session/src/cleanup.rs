// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Disk and process cleanup for tenant session directories.
//!
//! The transport may leave credential files and helper child processes
//! behind; forced cleanup must remove both or reconnects inherit corrupt
//! state.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Remove a tenant's session directory, tolerating its absence.
pub(crate) async fn remove_session_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "session directory removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove session directory"),
    }
}

/// Kill OS processes scoped to a tenant's session directory.
///
/// Matches processes whose command line references the directory or whose
/// working directory lives under it. Kill failures are logged, not
/// propagated; the directory removal that follows invalidates whatever
/// state a survivor holds.
pub(crate) async fn kill_session_processes(dir: &Path) {
    let dir: PathBuf = dir.to_path_buf();
    let killed = tokio::task::spawn_blocking(move || {
        let needle = dir.to_string_lossy().to_string();
        let mut system = sysinfo::System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

        let mut killed = 0usize;
        for (pid, process) in system.processes() {
            let in_cmdline = process
                .cmd()
                .iter()
                .any(|arg| arg.to_string_lossy().contains(&needle));
            let in_cwd = process.cwd().map(|cwd| cwd.starts_with(&dir)).unwrap_or(false);

            if in_cmdline || in_cwd {
                if process.kill() {
                    killed += 1;
                } else {
                    warn!(pid = pid.as_u32(), "failed to kill session process");
                }
            }
        }
        killed
    })
    .await
    .unwrap_or(0);

    if killed > 0 {
        info!(killed, "terminated leftover session processes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn remove_session_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let session_dir = dir.path().join("tenant-1");
        tokio::fs::create_dir_all(&session_dir).await.unwrap();
        tokio::fs::write(session_dir.join("creds.json"), b"{}")
            .await
            .unwrap();

        remove_session_dir(&session_dir).await;
        assert!(!session_dir.exists());

        // A second pass on the missing directory must be a no-op.
        remove_session_dir(&session_dir).await;
    }
}
