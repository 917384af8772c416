//! Mutual exclusion for index passes.
//!
//! - `FileLock`: flock() on the data directory, so two processes never write
//!   the same index file
//! - `PassLock`: at most one pass at a time within a process
//! - `StopSignal`: cooperative cancellation for the continuous worker

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Lock file name placed in the base directory
const LOCK_FILE_NAME: &str = "smartfind.lock";

/// A held file lock that releases on drop
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
}

impl FileLock {
    /// Attempt to acquire an exclusive lock on the data directory.
    /// Returns an error if another process holds it.
    pub fn try_acquire(base_path: &Path) -> io::Result<Self> {
        let lock_path = base_path.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        Self::try_lock_exclusive(&file)?;

        Ok(FileLock { file })
    }

    #[cfg(unix)]
    fn try_lock_exclusive(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.raw_os_error() == Some(libc::EAGAIN)
            {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "index is locked by another smartfind process",
                ));
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock_exclusive(_file: &File) -> io::Result<()> {
        // no locking outside unix
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // Release the lock - ignore errors on drop
        unsafe { libc::flock(fd, libc::LOCK_UN) };
    }
}

/// Busy flag shared by every pass trigger in the process.
#[derive(Clone, Default)]
pub struct PassLock {
    busy: Arc<Mutex<bool>>,
}

impl PassLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while another pass holds a permit. Never waits.
    pub fn try_acquire(&self) -> Option<PassPermit> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if *busy {
            return None;
        }
        *busy = true;

        Some(PassPermit {
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the duration of one pass; can be moved into the worker thread.
pub struct PassPermit {
    busy: Arc<Mutex<bool>>,
}

impl Drop for PassPermit {
    fn drop(&mut self) {
        *self.busy.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request stop and wake every waiter. Returns true for the first call only.
    pub fn stop(&self) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let first = !*stopped;
        *stopped = true;
        cvar.notify_all();
        first
    }

    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`, returning early once stopped.
    /// Returns true if stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();

        // First lock should succeed
        let lock1 = FileLock::try_acquire(dir.path());
        assert!(lock1.is_ok(), "First lock should succeed");

        // Second lock should fail (non-blocking)
        let lock2 = FileLock::try_acquire(dir.path());
        assert!(lock2.is_err(), "Second lock should fail");

        drop(lock1);

        let lock3 = FileLock::try_acquire(dir.path());
        assert!(lock3.is_ok(), "Third lock should succeed after release");
    }

    #[test]
    fn test_pass_lock_is_exclusive() {
        let lock = PassLock::new();

        let permit = lock.try_acquire().unwrap();
        assert!(lock.is_busy());
        assert!(lock.try_acquire().is_none());
        assert!(lock.clone().try_acquire().is_none());

        drop(permit);
        assert!(!lock.is_busy());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_pass_permit_released_from_another_thread() {
        let lock = PassLock::new();
        let permit = lock.try_acquire().unwrap();

        std::thread::spawn(move || drop(permit)).join().unwrap();
        assert!(!lock.is_busy());
    }

    #[test]
    fn test_stop_signal_is_idempotent() {
        let stop = StopSignal::new();
        assert!(!stop.is_stopped());
        assert!(stop.stop());
        assert!(!stop.stop());
        assert!(stop.is_stopped());
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                let started = Instant::now();
                let stopped = stop.wait_timeout(Duration::from_secs(30));
                (stopped, started.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        stop.stop();

        let (stopped, elapsed) = waiter.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_times_out_without_stop() {
        let stop = StopSignal::new();
        assert!(!stop.wait_timeout(Duration::from_millis(20)));
    }
}
