use std::{
    env,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    process,
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::infrastructure::directories::ResolvedPaths;

const LOCK_FILENAME: &str = ".moderation.lock";

/// Exclusive lock on the data directory so only one worker moderates a
/// given database. Released when dropped.
#[derive(Debug)]
pub struct InstanceGuard {
    file: File,
    path: PathBuf,
}

impl InstanceGuard {
    pub fn acquire(paths: &ResolvedPaths) -> Result<Self> {
        Self::acquire_at(&paths.data_dir.join(LOCK_FILENAME))
    }

    fn acquire_at(lock_path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                write_lock_info(&mut file, process::id())?;
                tracing::info!(
                    target: "lifecycle",
                    pid = process::id(),
                    path = %lock_path.display(),
                    "acquired moderation worker lock"
                );
                Ok(Self {
                    file,
                    path: lock_path.to_path_buf(),
                })
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                let holder = read_lock_info(lock_path)
                    .map(|info| info.pid.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Err(anyhow!(
                    "another moderation worker (pid {holder}) holds {}",
                    lock_path.display()
                ))
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    target: "lifecycle",
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove lock file on shutdown"
                );
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: i64,
}

fn write_lock_info(file: &mut File, pid: u32) -> Result<()> {
    let info = LockInfo {
        pid,
        started_at: Utc::now().timestamp_millis(),
    };
    let payload = serde_json::to_vec(&info)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&payload)?;
    file.sync_all()?;
    Ok(())
}

fn read_lock_info(lock_path: &Path) -> Option<LockInfo> {
    let contents = fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(contents.trim()).ok()
}

pub fn skip_guard() -> bool {
    matches!(
        env::var("SKIP_PROCESS_GUARD")
            .ok()
            .map(|v| v.eq_ignore_ascii_case("1") || v.eq_ignore_ascii_case("true")),
        Some(true)
    )
}
