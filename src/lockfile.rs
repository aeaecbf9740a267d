//! Single-instance locking through an exclusively created PID file.
//!
//! The lock is the file itself: whoever manages to create the path with
//! `O_CREAT | O_EXCL` holds it, and the PID written inside identifies the
//! holder. Ownership is re-checked against the file content on release, so a
//! process never removes a lock it did not create.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Delay between two attempts to create a contended lock file.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

const LOCK_FILE_MODE: u32 = 0o644;

/// How long [`PidLockFile::acquire`] waits for a contended lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Retry until the lock is acquired.
    Blocking,
    /// Retry until the lock is acquired or the duration has elapsed.
    BoundedWait(Duration),
    /// Give up as soon as the lock is found to be held.
    #[default]
    Immediate,
}

impl WaitPolicy {
    /// Maps a timeout in seconds onto a policy: `None` waits forever, a
    /// non-positive value does not wait at all.
    pub fn from_timeout(seconds: Option<f64>) -> Self {
        match seconds {
            None => WaitPolicy::Blocking,
            Some(s) if s.is_nan() || s <= 0.0 => WaitPolicy::Immediate,
            Some(s) => Duration::try_from_secs_f64(s)
                .map(WaitPolicy::BoundedWait)
                .unwrap_or(WaitPolicy::Blocking),
        }
    }
}

/// A PID lock file at a fixed path.
#[derive(Debug, Clone)]
pub struct PidLockFile {
    path: PathBuf,
    policy: WaitPolicy,
}

impl PidLockFile {
    /// Creates a guard for `path` that fails immediately when the lock is held.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_policy(path, WaitPolicy::Immediate)
    }

    pub fn with_policy<P: Into<PathBuf>>(path: P, policy: WaitPolicy) -> Self {
        PidLockFile { path: path.into(), policy }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.policy
    }

    /// Tries to take the lock, waiting according to the configured policy.
    ///
    /// Returns `true` once the file has been created and holds our PID.
    /// Every I/O failure counts as "not acquired this round"; nothing is raised.
    pub fn acquire(&self) -> bool {
        let started = Instant::now();
        loop {
            match self.try_create() {
                Ok(()) => {
                    debug!(path = %self.path.display(), pid = std::process::id(), "lock acquired");
                    return true;
                }
                Err(err) => {
                    debug!(path = %self.path.display(), error = %err, "lock attempt failed");
                }
            }

            match self.policy {
                WaitPolicy::Immediate => return false,
                WaitPolicy::BoundedWait(limit) if started.elapsed() > limit => {
                    warn!(
                        path = %self.path.display(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "timed out waiting for lock"
                    );
                    return false;
                }
                WaitPolicy::BoundedWait(_) | WaitPolicy::Blocking => thread::sleep(RETRY_INTERVAL),
            }
        }
    }

    fn try_create(&self) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(LOCK_FILE_MODE)
            .open(&self.path)?;

        let written = writeln!(file, "{}", std::process::id()).and_then(|_| file.sync_all());
        if let Err(err) = written {
            // A half-written file would block everyone; it is ours to remove.
            drop(file);
            let _ = fs::remove_file(&self.path);
            return Err(err);
        }
        Ok(())
    }

    /// PID currently recorded in the lock file, if any.
    pub fn read_pid(&self) -> Option<u32> {
        read_pid(&self.path)
    }

    /// Whether a lock file exists at the path, regardless of its holder.
    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }

    /// Whether the lock file exists and records this process as holder.
    pub fn i_am_locking(&self) -> bool {
        self.read_pid() == Some(std::process::id())
    }

    /// Removes the lock file if, and only if, it records this process.
    ///
    /// An already-absent file at deletion time counts as released.
    pub fn release(&self) -> bool {
        if !self.i_am_locking() {
            debug!(path = %self.path.display(), "not releasing a lock held by another process");
            return false;
        }
        remove_lock(&self.path)
    }

    /// Removes the lock file whoever holds it. Meant for cleanup tooling.
    pub fn force_remove(&self) -> bool {
        remove_lock(&self.path)
    }
}

fn remove_lock(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to remove lock file");
            false
        }
    }
}

/// Reads the PID stored in the file at `path`.
///
/// `None` when the file is missing, unreadable or does not start with a number.
pub fn read_pid<P: AsRef<Path>>(path: P) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    parse_pid(&content)
}

/// Parses the leading decimal integer of PID file content.
///
/// Leading zeros, surrounding whitespace and anything after the first number
/// (a second line, a trailing comment) are tolerated.
pub fn parse_pid(content: &str) -> Option<u32> {
    let trimmed = content.trim();
    let digits = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .map_or(trimmed, |end| &trimmed[..end]);
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
