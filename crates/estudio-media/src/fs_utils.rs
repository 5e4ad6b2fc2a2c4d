//! Filesystem utilities for cross-device file operations.

use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Attempts a fast rename first; on EXDEV (work dir and delivery dir on
/// different filesystems) falls back to copy-then-delete, staging the copy
/// next to the destination so the final rename is atomic.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.exists() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
            let staging = dst.with_extension("tmp-move");
            fs::copy(src, &staging).await?;
            fs::rename(&staging, dst).await?;
            fs::remove_file(src).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Ensure a directory exists.
pub async fn ensure_dir(path: impl AsRef<Path>) -> MediaResult<()> {
    fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}

/// Size of a file in bytes.
pub async fn file_size(path: impl AsRef<Path>) -> MediaResult<u64> {
    let meta = fs::metadata(path.as_ref()).await?;
    Ok(meta.len())
}

/// Remove a directory tree, ignoring a missing root.
pub async fn remove_dir_if_exists(path: impl AsRef<Path>) -> MediaResult<()> {
    match fs::remove_dir_all(path.as_ref()).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

const fn libc_exdev() -> i32 {
    // EXDEV on Linux and macOS
    18
}
