//! Durable file primitives shared by every persisted document.
//!
//! Writes go to a sibling temp file which is fsynced and renamed over the
//! target, so a concurrent reader sees either the old or the new bytes.
//! Read-modify-write sequences hold an advisory `fs2` lock on `<doc>.lock`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{ResourceKind, Result, TaskforgeError};

/// Default time to wait for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Write bytes to `path` atomically.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TaskforgeError::io(parent, e))?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(TaskforgeError::io(path, e));
    }

    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write_bytes(path, &bytes)
}

/// Read and parse a JSON document.
///
/// A missing file is `NotFound` with the given kind; a file that exists but
/// does not parse is `StateCorrupt`. The two are never conflated.
pub fn read_json<T: DeserializeOwned>(path: &Path, kind: ResourceKind) -> Result<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TaskforgeError::not_found(kind, path.display().to_string()));
        }
        Err(e) => return Err(TaskforgeError::io(path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|source| TaskforgeError::StateCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held advisory lock. Released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    file: File,
    path: PathBuf,
}

impl DocumentLock {
    /// Acquire a lock on `<document>.lock`, polling until `timeout`.
    pub fn acquire(document: &Path, mode: LockMode, timeout: Duration) -> Result<Self> {
        let path = lock_path(document);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TaskforgeError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| TaskforgeError::io(&path, e))?;

        let deadline = Instant::now() + timeout;
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => {
                    debug!(lock = %path.display(), ?mode, "lock acquired");
                    return Ok(Self { file, path });
                }
                Err(_) if Instant::now() < deadline => std::thread::sleep(LOCK_POLL_INTERVAL),
                Err(_) => return Err(TaskforgeError::Locked { path }),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn lock_path(document: &Path) -> PathBuf {
    let mut name = document
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    document.with_file_name(name)
}
