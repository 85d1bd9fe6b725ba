//! Advisory file locks scoped to a single upload id
//!
//! One lock file per upload under `{root}/locks/`, claimed with a
//! non-blocking flock(2). The kernel releases the lock when the holding
//! process exits, so a crash never strands an upload; the lock file itself
//! stays behind and is garbage-collected by [`DiskLockingService::cleanup_stale_locks`].

use crate::error::TusError;
use crate::storage::{UploadLock, UploadLockingService};
use crate::upload::UploadId;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    // retried on EINTR like any slow syscall
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// An exclusive flock on one upload's lock file, held until drop.
pub struct FileBasedLock {
    id: UploadId,
    path: PathBuf,
    file: File,
}

impl FileBasedLock {
    /// Try to claim the lock file without blocking.
    fn acquire(id: &UploadId, path: PathBuf) -> Result<Self, TusError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(TusError::Io)?;
        match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => {
                debug!(upload = %id, "acquired upload lock");
                Ok(FileBasedLock {
                    id: id.clone(),
                    path,
                    file,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(TusError::UploadAlreadyLocked(id.to_string()))
            }
            Err(e) => Err(TusError::Io(e)),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl UploadLock for FileBasedLock {
    fn id(&self) -> &UploadId {
        &self.id
    }
}

impl Drop for FileBasedLock {
    fn drop(&mut self) {
        // the close below would release it anyway; explicit for clarity
        if let Err(e) = flock(&self.file, libc::LOCK_UN) {
            warn!(upload = %self.id, error = %e, "failed to release upload lock");
        }
        debug!(upload = %self.id, "released upload lock");
    }
}

/// Lock service backed by a directory of flock files.
pub struct DiskLockingService {
    locks_dir: PathBuf,
}

impl DiskLockingService {
    pub fn new(storage_root: impl AsRef<Path>) -> Result<Self, TusError> {
        let locks_dir = storage_root.as_ref().join("locks");
        fs::create_dir_all(&locks_dir).map_err(TusError::Io)?;
        Ok(DiskLockingService { locks_dir })
    }

    fn lock_path(&self, id: &UploadId) -> PathBuf {
        self.locks_dir.join(id.as_str())
    }
}

impl UploadLockingService for DiskLockingService {
    fn lock_upload(&self, id: &UploadId) -> Result<Box<dyn UploadLock>, TusError> {
        let lock = FileBasedLock::acquire(id, self.lock_path(id))?;
        Ok(Box::new(lock))
    }

    /// Probe by briefly acquiring and releasing. Inherently racy: the
    /// answer can be stale by the time the caller acts on it, and an
    /// unexpected IO failure reads as "locked" so that sweeps stay on the
    /// safe side.
    fn is_locked(&self, id: &UploadId) -> bool {
        if !self.lock_path(id).exists() {
            return false;
        }
        match FileBasedLock::acquire(id, self.lock_path(id)) {
            Ok(_probe) => false,
            Err(TusError::UploadAlreadyLocked(_)) => true,
            Err(_) => true,
        }
    }

    /// Delete lock files idle for longer than `grace`. The mtime check is
    /// only a pre-filter; the authority to delete is a successful acquire,
    /// so a lock that is merely old but still held is never removed.
    fn cleanup_stale_locks(&self, grace: Duration) -> Result<usize, TusError> {
        let cutoff = SystemTime::now()
            .checked_sub(grace)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        for entry in fs::read_dir(&self.locks_dir).map_err(TusError::Io)? {
            let entry = entry.map_err(TusError::Io)?;
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if modified >= cutoff {
                continue;
            }
            let id = UploadId::new(entry.file_name().to_string_lossy());
            match FileBasedLock::acquire(&id, entry.path()) {
                Ok(lock) => {
                    // deleted while held, so no concurrent claim can win
                    if let Err(e) = fs::remove_file(lock.path()) {
                        if e.kind() != io::ErrorKind::NotFound {
                            warn!(upload = %id, error = %e, "failed to remove stale lock file");
                            continue;
                        }
                    }
                    removed += 1;
                    debug!(upload = %id, "removed stale lock file");
                }
                Err(_) => continue,
            }
        }
        Ok(removed)
    }
}
