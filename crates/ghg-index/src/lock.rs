//! Exclusive commit lock shared between processes.
//!
//! The lock is a `<name>.lock` file created with `O_EXCL`, like git's
//! `index.lock`. It exists only for the duration of a commit. Acquisition
//! polls until the configured timeout; a lock file older than the stale age
//! is assumed to belong to a crashed writer and is removed.
//!
//! Every lock file carries a random token, and nothing removes a lock file
//! without first taking the short-lived `<name>.lock.break` guard and
//! re-reading the token under it. Breaking a stale lock deletes only the
//! exact file judged stale, and a holder whose lock was broken does not
//! remove its successor's on release.
//!
//! Lock files are created group read/write so a cooperating process under
//! the same group can inspect and break a stale lock.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use ghg_store::fsutil::{self, SHARED_FILE_MODE};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{IndexError, IndexResult};

/// Timing knobs for lock acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up after waiting this long.
    pub timeout: Duration,
    /// Delay between attempts.
    pub poll_interval: Duration,
    /// Locks older than this are broken.
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            stale_after: Duration::from_secs(600),
        }
    }
}

/// A held lock. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    stamp: String,
    options: LockOptions,
}

impl FileLock {
    /// Block until the lock at `path` is ours or the timeout passes.
    pub fn acquire(path: &Path, options: &LockOptions) -> IndexResult<Self> {
        if let Some(parent) = path.parent() {
            fsutil::ensure_dir(parent)?;
        }
        let started = Instant::now();
        let mut waited = false;
        loop {
            let stamp = new_stamp();
            match create_exclusive(path, &stamp) {
                Ok(()) => {
                    debug!(lock = %path.display(), waited_ms = started.elapsed().as_millis(), "lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        stamp,
                        options: options.clone(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if let Some(stale) = stale_stamp(path, options.stale_after) {
                        match with_break_guard(path, options, || remove_if_matches(path, &stale))? {
                            Some(true) => {
                                warn!(lock = %path.display(), holder = stale.trim(), "broke stale lock");
                                continue;
                            }
                            Some(false) => continue,
                            None => {}
                        }
                    }
                    let elapsed = started.elapsed();
                    if elapsed >= options.timeout {
                        return Err(IndexError::LockTimeout {
                            path: path.to_path_buf(),
                            waited_ms: elapsed.as_millis(),
                        });
                    }
                    if !waited {
                        debug!(lock = %path.display(), "lock busy, waiting");
                        waited = true;
                    }
                    thread::sleep(options.poll_interval);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fail with [`IndexError::LockLost`] unless the lock file on disk is
    /// still this one.
    pub fn verify(&self) -> IndexResult<()> {
        match fs::read_to_string(&self.path) {
            Ok(current) if current == self.stamp => Ok(()),
            Ok(_) => Err(IndexError::LockLost {
                path: self.path.clone(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(IndexError::LockLost {
                path: self.path.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let released = with_break_guard(&self.path, &self.options, || {
            remove_if_matches(&self.path, &self.stamp)
        });
        match released {
            Ok(Some(true)) => {}
            Ok(Some(false)) => warn!(lock = %self.path.display(), "lock was broken while held"),
            Ok(None) => warn!(lock = %self.path.display(), "break guard busy, lock left to go stale"),
            Err(e) => warn!(lock = %self.path.display(), error = %e, "failed to release lock"),
        }
    }
}

fn new_stamp() -> String {
    format!(
        "{} {} {}\n",
        std::process::id(),
        chrono::Utc::now().to_rfc3339(),
        Uuid::now_v7().simple()
    )
}

fn create_exclusive(path: &Path, stamp: &str) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(SHARED_FILE_MODE);
    }
    let mut file = options.open(path)?;
    // The umask may have stripped group bits from the create mode.
    let written = fsutil::set_mode(path, SHARED_FILE_MODE)
        .and_then(|()| file.write_all(stamp.as_bytes()))
        .and_then(|()| file.sync_all());
    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

/// Contents of the lock file if it is older than `stale_after`.
fn stale_stamp(path: &Path, stale_after: Duration) -> Option<String> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let age = SystemTime::now().duration_since(modified).ok()?;
    if age <= stale_after {
        return None;
    }
    fs::read_to_string(path).ok()
}

/// Remove the lock file if it still reads `stamp`. Only called under the
/// break guard.
fn remove_if_matches(path: &Path, stamp: &str) -> io::Result<bool> {
    match fs::read_to_string(path) {
        Ok(current) if current == stamp => {}
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn guard_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".break");
    PathBuf::from(name)
}

/// Run `f` while holding the break guard of `path`. `None` when the guard
/// stayed busy for the whole timeout.
///
/// The guard is held only for a read and an unlink, so a guard older than
/// `stale_after` was left by a crashed process and is removed outright.
fn with_break_guard<T>(
    path: &Path,
    options: &LockOptions,
    f: impl FnOnce() -> io::Result<T>,
) -> io::Result<Option<T>> {
    let guard = guard_path(path);
    let started = Instant::now();
    loop {
        match create_exclusive(&guard, &new_stamp()) {
            Ok(()) => break,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if stale_stamp(&guard, options.stale_after).is_some() {
                    match fs::remove_file(&guard) {
                        Ok(()) => continue,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(e),
                    }
                }
                if started.elapsed() >= options.timeout {
                    return Ok(None);
                }
                thread::sleep(options.poll_interval.min(Duration::from_millis(5)));
            }
            Err(e) => return Err(e),
        }
    }
    let result = f();
    fs::remove_file(&guard)?;
    result.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            stale_after: Duration::from_secs(3600),
        }
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.lock");
        let held = FileLock::acquire(&path, &quick()).unwrap();
        assert!(path.exists());
        assert!(matches!(
            FileLock::acquire(&path, &quick()),
            Err(IndexError::LockTimeout { .. })
        ));
        drop(held);
        assert!(!path.exists());
        FileLock::acquire(&path, &quick()).unwrap();
    }

    #[test]
    fn waiter_gets_lock_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.lock");
        let held = FileLock::acquire(&path, &quick()).unwrap();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            let options = LockOptions {
                timeout: Duration::from_secs(5),
                ..quick()
            };
            FileLock::acquire(&waiter_path, &options).map(|_| ())
        });
        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    /// A lock file left behind by a writer that crashed an hour ago.
    fn crashed_lock(path: &Path) {
        fs::write(path, b"12345 crashed\n").unwrap();
        let an_hour_ago = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(an_hour_ago)
            .unwrap();
    }

    #[test]
    fn stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.lock");
        crashed_lock(&path);
        let options = LockOptions {
            stale_after: Duration::from_secs(600),
            ..quick()
        };
        let lock = FileLock::acquire(&path, &options).unwrap();
        let contents = fs::read_to_string(lock.path()).unwrap();
        assert!(contents.starts_with(&std::process::id().to_string()));
        lock.verify().unwrap();
        drop(lock);
        assert!(!path.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn competing_breakers_never_share_the_lock() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Barrier};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.lock");
        crashed_lock(&path);
        let options = LockOptions {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1),
            stale_after: Duration::from_secs(600),
        };

        let holders = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(Barrier::new(8));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let (path, options) = (path.clone(), options.clone());
                let (holders, overlaps, start) = (holders.clone(), overlaps.clone(), start.clone());
                thread::spawn(move || {
                    start.wait();
                    let lock = FileLock::acquire(&path, &options).unwrap();
                    if holders.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(5));
                    lock.verify().unwrap();
                    holders.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(!path.exists());
    }

    #[test]
    fn broken_holder_leaves_successor_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.lock");
        let first = FileLock::acquire(&path, &quick()).unwrap();
        thread::sleep(Duration::from_millis(20));
        let impatient = LockOptions {
            stale_after: Duration::from_millis(10),
            ..quick()
        };
        let second = FileLock::acquire(&path, &impatient).unwrap();
        assert!(matches!(first.verify(), Err(IndexError::LockLost { .. })));

        drop(first);
        assert!(path.exists());
        second.verify().unwrap();
        drop(second);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn lock_file_is_group_writable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.lock");
        let _lock = FileLock::acquire(&path, &quick()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o660);
    }
}
