use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Directory under a project workspace holding oprime's own files
/// (config, session snapshot, logs).
pub const OPRIME_DIR: &str = ".oprime";

/// Resolve the oprime state directory for a workspace root.
pub fn state_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join(OPRIME_DIR)
}

/// Session snapshot path for a workspace root.
pub fn snapshot_path(workspace_root: &Path) -> PathBuf {
    state_dir(workspace_root).join("state.json")
}

/// JSONL session log path for a workspace root.
pub fn session_log_path(workspace_root: &Path) -> PathBuf {
    state_dir(workspace_root).join("logs").join("session.jsonl")
}

/// Write `contents` to `path` atomically: write to a sibling temp file, then
/// rename over the target. The parent directory is created if missing.
///
/// Readers of `path` never observe a partial write; the rename is the commit.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path has no parent directory: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .with_context(|| format!("path has no file name: {}", path.display()))?
        .to_string_lossy();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write temp file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
