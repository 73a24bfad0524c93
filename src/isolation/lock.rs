//! Advisory file locks for the isolation critical section and for session
//! liveness.
//!
//! Both rely on the OS releasing `fs2` locks when the owning process dies, so a
//! crashed holder is detected by successfully taking its lock.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::IsolationError;

const LEASE_EXTENSION: &str = "lease";

/// Metadata written inside a held lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub session: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current(session: &str) -> Self {
        Self {
            session: session.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File, IsolationError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(IsolationError::io(parent))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(IsolationError::io(path))
}

fn write_holder(file: &mut File, path: &Path, holder: &LockHolder) -> Result<(), IsolationError> {
    let json = serde_json::to_vec(holder).unwrap_or_default();
    file.set_len(0)
        .and_then(|_| file.seek(SeekFrom::Start(0)))
        .and_then(|_| file.write_all(&json))
        .and_then(|_| file.sync_data())
        .map_err(IsolationError::io(path))
}

fn read_holder(file: &mut File) -> Option<LockHolder> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&content).ok()
}

/// The repository-wide lock around checkout + branch creation + mount.
pub struct IsolationLock {
    path: PathBuf,
}

/// Held lock; released on drop.
pub struct IsolationLockGuard {
    file: File,
    path: PathBuf,
}

impl IsolationLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is free, then record `session` as holder.
    pub fn acquire(&self, session: &str) -> Result<IsolationLockGuard, IsolationError> {
        let mut file = open_lock_file(&self.path)?;
        file.lock_exclusive().map_err(IsolationError::io(&self.path))?;
        if let Some(previous) = read_holder(&mut file) {
            // A holder that released cleanly leaves the file empty.
            warn!(
                session = %previous.session,
                pid = previous.pid,
                "isolation lock left behind by a crashed holder"
            );
        }
        write_holder(&mut file, &self.path, &LockHolder::current(session))?;
        debug!(session, path = %self.path.display(), "isolation lock acquired");
        Ok(IsolationLockGuard {
            file,
            path: self.path.clone(),
        })
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self, session: &str) -> Result<Option<IsolationLockGuard>, IsolationError> {
        let mut file = open_lock_file(&self.path)?;
        if FileExt::try_lock_exclusive(&file).is_err() {
            return Ok(None);
        }
        write_holder(&mut file, &self.path, &LockHolder::current(session))?;
        Ok(Some(IsolationLockGuard {
            file,
            path: self.path.clone(),
        }))
    }

    /// If the lock file exists, is not held, and still carries a holder record
    /// (its owner crashed), return that record.
    pub fn stale_holder(&self) -> Result<Option<LockHolder>, IsolationError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut file = open_lock_file(&self.path)?;
        if FileExt::try_lock_exclusive(&file).is_err() {
            return Ok(None);
        }
        let holder = read_holder(&mut file);
        let _ = FileExt::unlock(&file);
        Ok(holder)
    }

    /// Clear the holder record left by a crashed holder. Returns the record
    /// that was cleared.
    pub fn clear_stale(&self) -> Result<Option<LockHolder>, IsolationError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut file = open_lock_file(&self.path)?;
        if FileExt::try_lock_exclusive(&file).is_err() {
            return Ok(None);
        }
        let holder = read_holder(&mut file);
        let cleared = if holder.is_some() {
            file.set_len(0).map_err(IsolationError::io(&self.path))
        } else {
            Ok(())
        };
        let _ = FileExt::unlock(&file);
        cleared?;
        Ok(holder)
    }
}

impl IsolationLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IsolationLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            warn!(error = %e, "failed to clear isolation lock holder");
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "failed to release isolation lock");
        }
        debug!(path = %self.path.display(), "isolation lock released");
    }
}

/// Liveness marker for a running session. While the lease is held, cleanup
/// treats the session's overlay and branch as live.
pub struct Lease {
    file: File,
    path: PathBuf,
    session: String,
}

impl Lease {
    pub fn path_for(live_dir: &Path, session: &str) -> PathBuf {
        live_dir.join(format!("{}.{}", session, LEASE_EXTENSION))
    }

    pub fn acquire(live_dir: &Path, session: &str) -> Result<Self, IsolationError> {
        let path = Self::path_for(live_dir, session);
        let mut file = open_lock_file(&path)?;
        FileExt::try_lock_exclusive(&file).map_err(IsolationError::io(&path))?;
        write_holder(&mut file, &path, &LockHolder::current(session))?;
        Ok(Self {
            file,
            path,
            session: session.to_string(),
        })
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Release the lease and delete its file.
    pub fn release(self) {
        let _ = FileExt::unlock(&self.file);
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove lease file");
        }
    }
}

/// Whether a lease for `session` exists and is currently held.
pub fn is_live(live_dir: &Path, session: &str) -> bool {
    let path = Lease::path_for(live_dir, session);
    let Ok(file) = File::open(&path) else {
        return false;
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}

/// Session ids with a lease file in `live_dir`, split into (held, stale).
pub fn scan_leases(live_dir: &Path) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut held = BTreeSet::new();
    let mut stale = BTreeSet::new();
    let Ok(entries) = fs::read_dir(live_dir) else {
        return (held, stale);
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(LEASE_EXTENSION) {
            continue;
        }
        let Some(session) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if is_live(live_dir, session) {
            held.insert(session.to_string());
        } else {
            stale.insert(session.to_string());
        }
    }
    (held, stale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_lock_is_mutually_exclusive_across_threads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("isolation.lock");
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let path = path.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    let lock = IsolationLock::new(path);
                    let _guard = lock.acquire(&format!("s{}", i)).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let lock = IsolationLock::new(dir.path().join("isolation.lock"));
        let guard = lock.acquire("a").unwrap();
        assert!(lock.try_acquire("b").unwrap().is_none());
        assert!(lock.stale_holder().unwrap().is_none());
        drop(guard);
        assert!(lock.try_acquire("b").unwrap().is_some());
    }

    #[test]
    fn test_clean_release_leaves_no_stale_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("isolation.lock");
        let lock = IsolationLock::new(&path);
        drop(lock.acquire("a").unwrap());
        assert!(lock.stale_holder().unwrap().is_none());

        // Simulate a crash: holder metadata present but no lock held.
        let holder = LockHolder::current("deadbeef");
        fs::write(&path, serde_json::to_vec(&holder).unwrap()).unwrap();
        assert_eq!(lock.stale_holder().unwrap().unwrap().session, "deadbeef");
        assert_eq!(lock.clear_stale().unwrap().unwrap().session, "deadbeef");
        assert!(lock.stale_holder().unwrap().is_none());
    }

    #[test]
    fn test_lease_liveness() {
        let dir = tempdir().unwrap();
        let lease = Lease::acquire(dir.path(), "abcd1234").unwrap();
        assert!(is_live(dir.path(), "abcd1234"));
        assert!(!is_live(dir.path(), "ffff0000"));

        // A lease file nobody holds belongs to a crashed session.
        fs::write(Lease::path_for(dir.path(), "dead0000"), "{}").unwrap();
        let (held, stale) = scan_leases(dir.path());
        assert!(held.contains("abcd1234"));
        assert!(stale.contains("dead0000"));

        lease.release();
        assert!(!Lease::path_for(dir.path(), "abcd1234").exists());
    }
}
