//! Per-table lock file.
//!
//! On Unix the lock is an advisory `flock(LOCK_EX)` on a sibling `.lock`
//! file, polled non-blocking until the configured timeout. The kernel drops
//! the lock when a holder dies, so a crashed process cannot wedge later
//! callers. The lock file is unlinked on release while still locked; an
//! acquirer that locked an already-unlinked inode notices the mismatch and
//! retries on the fresh file.
//!
//! Elsewhere an exclusively-created lock file stands in for `flock`.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use xref_error::{Result, XrefError};

/// Scoped lock guarding one table's file pair. Released on drop.
pub struct TableLock {
    path: PathBuf,
    waited: Duration,
    contended: bool,
    #[cfg(unix)]
    _guard: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl TableLock {
    /// Acquire the lock at `path`, waiting at most `timeout`.
    pub fn acquire(path: &Path, timeout: Duration, poll_interval: Duration) -> Result<Self> {
        let started = Instant::now();
        let mut contended = false;

        loop {
            match try_lock(path)? {
                Some(held) => {
                    let waited = started.elapsed();
                    debug!(
                        path = %path.display(),
                        waited_us = waited.as_micros() as u64,
                        contended,
                        "acquired table lock"
                    );
                    return Ok(Self::from_held(path, held, waited, contended));
                }
                None => {
                    if !contended {
                        debug!(path = %path.display(), "table lock busy, waiting");
                    }
                    contended = true;
                }
            }

            let waited = started.elapsed();
            if waited >= timeout {
                warn!(
                    path = %path.display(),
                    waited_ms = waited.as_millis() as u64,
                    "gave up waiting for table lock"
                );
                return Err(XrefError::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            thread::sleep(poll_interval.min(timeout.saturating_sub(waited)));
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time spent waiting before the lock was granted.
    #[must_use]
    pub const fn waited(&self) -> Duration {
        self.waited
    }

    /// Whether at least one attempt found the lock held by someone else.
    #[must_use]
    pub const fn was_contended(&self) -> bool {
        self.contended
    }
}

impl fmt::Debug for TableLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableLock")
            .field("path", &self.path)
            .field("waited", &self.waited)
            .field("contended", &self.contended)
            .finish_non_exhaustive()
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        // Unlink before the descriptor closes so waiters re-check the inode.
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove lock file");
            }
        }
    }
}

#[cfg(unix)]
type Held = nix::fcntl::Flock<File>;

#[cfg(not(unix))]
type Held = File;

impl TableLock {
    #[cfg(unix)]
    fn from_held(path: &Path, held: Held, waited: Duration, contended: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            waited,
            contended,
            _guard: held,
        }
    }

    #[cfg(not(unix))]
    fn from_held(path: &Path, held: Held, waited: Duration, contended: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            waited,
            contended,
            _file: held,
        }
    }
}

/// One non-blocking attempt. `Ok(None)` means someone else holds the lock.
#[cfg(unix)]
fn try_lock(path: &Path) -> Result<Option<Held>> {
    use std::os::unix::fs::MetadataExt;

    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|err| XrefError::io(path, err))?;

    let guard = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(guard) => guard,
        Err((_, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EINTR => {
            return Ok(None);
        }
        Err((_, errno)) => return Err(XrefError::io(path, io::Error::from(errno))),
    };

    // The previous holder may have unlinked this inode between our open and
    // our lock; only a lock on the file currently at `path` counts.
    let held = guard.metadata().map_err(|err| XrefError::io(path, err))?;
    match fs::metadata(path) {
        Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => {
            Ok(Some(guard))
        }
        Ok(_) => Ok(None),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(XrefError::io(path, err)),
    }
}

#[cfg(not(unix))]
fn try_lock(path: &Path) -> Result<Option<Held>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(XrefError::io(path, err)),
    }
}
