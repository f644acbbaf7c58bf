//! Shared helpers for the taskforge crate.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Number of hex characters kept from a SHA-256 digest.
pub const CHECKSUM_LEN: usize = 16;

/// Truncated SHA-256 of a byte slice.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = format!("{:x}", hasher.finalize());
    digest[..CHECKSUM_LEN].to_string()
}

/// Truncated SHA-256 of a file, or `None` when it cannot be read.
pub fn checksum_file(path: &Path) -> Option<String> {
    std::fs::read(path).ok().map(|bytes| checksum_bytes(&bytes))
}

/// Resolve a task-reported file path against the target directory.
///
/// Workers sometimes report paths prefixed with the target directory's own
/// name (`myapp/src/lib.rs` for target `/work/myapp`); that prefix is dropped.
pub fn resolve_target_path(target_dir: &Path, reported: &str) -> PathBuf {
    let reported_path = Path::new(reported);
    if reported_path.is_absolute() {
        return reported_path.to_path_buf();
    }
    let mut components = reported_path.components();
    if let (Some(first), Some(name)) = (components.next(), target_dir.file_name())
        && first.as_os_str() == name
    {
        let rest = components.as_path();
        if !rest.as_os_str().is_empty() {
            return target_dir.join(rest);
        }
    }
    target_dir.join(reported_path)
}
