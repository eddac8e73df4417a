//! Filesystem helpers shared by the on-disk backends.
//!
//! Every file a store creates must be usable by cooperating processes that
//! run under the same group, so files get mode `0o660` and directories
//! `0o770` on unix.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Mode for files shared within a group.
pub const SHARED_FILE_MODE: u32 = 0o660;
/// Mode for directories shared within a group.
pub const SHARED_DIR_MODE: u32 = 0o770;

/// Apply a unix mode to `path`. No-op elsewhere.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Create `dir` and its parents, group-shared.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    // Another process may own the directory; permissions are best effort.
    if let Err(e) = set_mode(dir, SHARED_DIR_MODE) {
        tracing::debug!(dir = %dir.display(), error = %e, "could not set directory mode");
    }
    Ok(())
}

/// Atomically replace `path` with `data`.
///
/// The bytes go to a temp file in the same directory, are fsynced, and the
/// temp file is renamed over `path`. Readers see either the old or the new
/// file, never a torn one.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    ensure_dir(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    set_mode(tmp.path(), SHARED_FILE_MODE)?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)
}

/// Fsync a directory so a rename inside it is durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
