//! OS bindings used by the daemonization stages.
//!
//! Every irreversible process-wide operation goes through [`Sys`], so the
//! orchestration logic can be driven by a fake in tests without forking or
//! exiting the test process.

use std::fs::File;
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;

use libc::c_int;

use crate::lockfile::PidLockFile;
use crate::signals::SignalHandler;

pub(crate) mod unix;

#[cfg(test)]
pub(crate) mod mock;

pub use unix::UnixSys;

/// Which side of a `fork` the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    Parent(libc::pid_t),
    Child,
}

pub trait Sys {
    fn current_uid(&self) -> u32;
    fn current_gid(&self) -> u32;
    fn parent_pid(&self) -> libc::pid_t;
    /// Whether standard input is a socket (started by a super-server such as inetd).
    fn stdin_is_socket(&self) -> bool;

    fn user_name(&self, uid: u32) -> io::Result<Option<String>>;
    fn uid_for_name(&self, name: &str) -> io::Result<Option<u32>>;
    fn gid_for_name(&self, name: &str) -> io::Result<Option<u32>>;

    fn chroot(&self, path: &Path) -> io::Result<()>;
    fn disable_core_dumps(&self) -> io::Result<()>;
    /// Sets the file-creation mask, returning the previous one.
    fn set_umask(&self, mask: u32) -> u32;
    fn chdir(&self, path: &Path) -> io::Result<()>;
    fn init_groups(&self, user: &str, gid: u32) -> io::Result<()>;
    fn set_gid(&self, gid: u32) -> io::Result<()>;
    fn set_uid(&self, uid: u32) -> io::Result<()>;

    /// # Safety
    ///
    /// Same contract as `fork(2)`: in a multi-threaded process only
    /// async-signal-safe work may happen in the child until it execs or exits.
    unsafe fn fork(&self) -> io::Result<Fork>;
    fn setsid(&self) -> io::Result<()>;
    /// Terminates the process now, without unwinding or running exit handlers.
    fn exit_now(&self, code: i32) -> !;

    /// Installs `handler` for `signal`; `None` ignores the signal.
    fn install_signal(&self, signal: c_int, handler: Option<&SignalHandler>) -> io::Result<()>;

    fn open_null(&self) -> io::Result<File>;
    fn dup2(&self, source: RawFd, target: RawFd) -> io::Result<()>;

    /// Arranges for `lock` to be released when the process exits.
    fn register_finalizer(&self, lock: Option<&PidLockFile>) -> io::Result<()>;
    fn clear_finalizer(&self);

    /// Tells the service manager that startup is complete.
    fn notify_ready(&self) -> io::Result<()>;
}
