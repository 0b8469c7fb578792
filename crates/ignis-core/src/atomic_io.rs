use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

/// Replaces `path` with `content` through a synced sibling temp file.
///
/// Readers observe either the previous file or the complete new one; the
/// temp file is removed when any step fails.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_path = temp_sibling(parent_dir, path);
    let written = write_synced(&temp_path, content).and_then(|()| {
        fs::rename(&temp_path, path).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                temp_path.display(),
                path.display()
            )
        })
    });
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}

fn temp_sibling(parent_dir: &Path, path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("ignis-artifact");
    parent_dir.join(format!(
        ".{file_name}.tmp-{}-{}",
        std::process::id(),
        current_unix_timestamp_ms()
    ))
}

fn write_synced(path: &Path, content: &str) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))
}
