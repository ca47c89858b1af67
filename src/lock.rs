//! Advisory, cross-process maintenance locks.
//!
//! One file per job category under the lock directory records the holder's
//! PID. A lock whose holder is no longer alive is stale and gets taken over.
//! Files are published with a hard link from a fully written temp file, so a
//! reader never observes a half-written lock.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LockError;
use crate::job::JobCategory;

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    pub holder_pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHandle {
    fn for_current_process() -> Self {
        Self {
            holder_pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    /// Parses the JSON form, or a bare PID as written by `echo $$ > file`.
    fn parse(contents: &str, modified: Option<DateTime<Utc>>) -> Option<Self> {
        if let Ok(handle) = serde_json::from_str::<LockHandle>(contents) {
            return Some(handle);
        }
        let holder_pid = contents.trim().parse::<u32>().ok()?;
        Some(Self {
            holder_pid,
            acquired_at: modified.unwrap_or_else(Utc::now),
        })
    }

    pub fn holder_alive(&self) -> bool {
        process_alive(self.holder_pid)
    }

    /// A lock blocks new runs while its holder lives, and for `grace` after
    /// acquisition even if the holder is gone.
    pub fn blocks(&self, grace: Duration) -> bool {
        if self.holder_alive() {
            return true;
        }
        let age = (Utc::now() - self.acquired_at).to_std().unwrap_or_default();
        age < grace
    }
}

/// Zero-effect liveness probe (`kill(pid, 0)`). `EPERM` means the process
/// exists under another user.
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// What is sitting in a category's lock slot right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held(LockHandle),
    Stale(LockHandle),
    Unreadable,
}

/// Why [`LockStore::acquire`] did not hand out a guard.
#[derive(Debug)]
pub enum AcquireError {
    Held(LockHandle),
    Io(LockError),
}

impl From<LockError> for AcquireError {
    fn from(err: LockError) -> Self {
        AcquireError::Io(err)
    }
}

/// Directory of lock files, one per job category.
#[derive(Debug, Clone)]
pub struct LockStore {
    dir: PathBuf,
}

impl LockStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, category: &JobCategory) -> PathBuf {
        self.dir.join(format!("{category}.lock"))
    }

    /// Takes the lock for `category`, replacing a stale one. Never waits.
    pub fn acquire(
        &self,
        category: &JobCategory,
        grace: Duration,
    ) -> Result<LockGuard, AcquireError> {
        fs::create_dir_all(&self.dir).map_err(|e| LockError::io(&self.dir, e))?;
        let path = self.path_for(category);

        // Two passes: the second one follows the removal of a stale lock.
        for _ in 0..2 {
            let handle = LockHandle::for_current_process();
            if publish(&path, &handle)? {
                return Ok(LockGuard {
                    path,
                    handle,
                    released: false,
                });
            }
            match read_handle(&path)? {
                None => continue,
                Some(existing) if existing.blocks(grace) => {
                    return Err(AcquireError::Held(existing));
                }
                Some(existing) => {
                    tracing::warn!(
                        lock = %path.display(),
                        holder_pid = existing.holder_pid,
                        "taking over stale lock"
                    );
                    remove_stale(&path, &existing)?;
                }
            }
        }

        match read_handle(&path)? {
            Some(existing) => Err(AcquireError::Held(existing)),
            None => Err(AcquireError::Io(LockError::io(
                &path,
                std::io::Error::new(ErrorKind::WouldBlock, "lock contended"),
            ))),
        }
    }

    pub fn inspect(&self, category: &JobCategory) -> Result<LockState, LockError> {
        let path = self.path_for(category);
        if !path.exists() {
            return Ok(LockState::Free);
        }
        Ok(match read_handle(&path)? {
            None => LockState::Free,
            Some(handle) if handle.holder_alive() => LockState::Held(handle),
            Some(handle) if handle.holder_pid == 0 => LockState::Unreadable,
            Some(handle) => LockState::Stale(handle),
        })
    }
}

/// Exclusive ownership of a lock file. Release explicitly with
/// [`LockGuard::release`]; dropping an unreleased guard removes the file on a
/// best-effort basis.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    handle: LockHandle,
    released: bool,
}

impl LockGuard {
    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the lock file if it is still ours.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match read_handle(&self.path)? {
            None => Ok(()),
            Some(current) if current == self.handle => remove_if_present(&self.path),
            Some(current) => Err(LockError::Stolen {
                path: self.path.clone(),
                holder_pid: current.holder_pid,
            }),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(Some(current)) = read_handle(&self.path) {
            if current == self.handle {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}

/// Atomically creates `path` with `handle` as content. `Ok(false)` when the
/// file already exists.
fn publish(path: &Path, handle: &LockHandle) -> Result<bool, LockError> {
    let tmp = path.with_extension(format!(
        "lock.{}.{}.tmp",
        handle.holder_pid,
        Uuid::new_v4().simple()
    ));
    let body = serde_json::to_vec(handle)
        .map_err(|e| LockError::io(&tmp, std::io::Error::new(ErrorKind::InvalidData, e)))?;
    {
        let mut file = fs::File::create(&tmp).map_err(|e| LockError::io(&tmp, e))?;
        file.write_all(&body).map_err(|e| LockError::io(&tmp, e))?;
        file.sync_all().map_err(|e| LockError::io(&tmp, e))?;
    }
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(LockError::io(path, e)),
    }
}

/// `Ok(None)` when the file is gone. Unparseable content is reported as a
/// handle with PID 0, which is never alive.
fn read_handle(path: &Path) -> Result<Option<LockHandle>, LockError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LockError::io(path, e)),
    };
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    Ok(Some(LockHandle::parse(&contents, modified).unwrap_or(LockHandle {
        holder_pid: 0,
        acquired_at: modified.unwrap_or_else(Utc::now),
    })))
}

/// Deletes `path` only while it still holds `stale`. Takeovers serialize on
/// an exclusive flock over a sidecar file, so a lock that a concurrent taker
/// has already published is never removed on the strength of an older read.
fn remove_stale(path: &Path, stale: &LockHandle) -> Result<(), LockError> {
    let gate_path = path.with_extension("lock.takeover");
    let gate = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&gate_path)
        .map_err(|e| LockError::io(&gate_path, e))?;
    let _gate = Flock::lock(gate, FlockArg::LockExclusive)
        .map_err(|(_, errno)| LockError::io(&gate_path, std::io::Error::from(errno)))?;

    match read_handle(path)? {
        Some(current) if current == *stale => remove_if_present(path),
        _ => Ok(()),
    }
}

fn remove_if_present(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LockError::io(path, e)),
    }
}
