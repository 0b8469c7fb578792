//! Single-writer lock file for on-disk journals.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use crate::{JournalError, JournalResult};

/// Removes the lock file when dropped.
#[derive(Debug)]
pub(crate) struct JournalLock {
    path: PathBuf,
}

impl JournalLock {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Refreshes the lock's mtime so a live writer is never judged stale.
    ///
    /// Fails with [`JournalError::LockLost`] once another process has
    /// reclaimed the file.
    pub(crate) fn touch(&self) -> JournalResult<()> {
        if !self.is_held() {
            return Err(JournalError::LockLost(self.path.display().to_string()));
        }
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_modified(SystemTime::now())?;
        Ok(())
    }

    fn is_held(&self) -> bool {
        fs::read_to_string(&self.path)
            .is_ok_and(|holder| holder.trim() == std::process::id().to_string())
    }
}

impl Drop for JournalLock {
    fn drop(&mut self) {
        if self.is_held() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Creates `path` exclusively, waiting up to `timeout` for another holder.
///
/// A lock older than `stale_after` is assumed abandoned by a crashed process
/// and reclaimed; `Duration::ZERO` disables reclamation.
pub(crate) fn acquire_journal_lock(
    path: &Path,
    timeout: Duration,
    stale_after: Duration,
) -> JournalResult<JournalLock> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let start = SystemTime::now();
    loop {
        match OpenOptions::new().create_new(true).write(true).open(path) {
            Ok(mut file) => {
                write_holder(&mut file)?;
                return Ok(JournalLock {
                    path: path.to_path_buf(),
                });
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                if stale_after > Duration::ZERO && reclaim_stale_lock(path, stale_after) {
                    tracing::warn!(lock = %path.display(), "reclaimed stale journal lock");
                    continue;
                }
                let elapsed = SystemTime::now().duration_since(start).unwrap_or_default();
                if elapsed >= timeout {
                    return Err(JournalError::LockTimeout(path.display().to_string()));
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(error) => return Err(error.into()),
        }
    }
}

fn write_holder(file: &mut File) -> JournalResult<()> {
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;
    Ok(())
}

fn reclaim_stale_lock(path: &Path, stale_after: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|metadata| metadata.modified()) else {
        return false;
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    if age < stale_after {
        return false;
    }
    fs::remove_file(path).is_ok()
}
