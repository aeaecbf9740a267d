//! # daemon_context
//!
//! Turns the running process into a well-behaved Unix daemon: chroot, core
//! dump prevention, umask, working directory, privilege drop, double-fork
//! detachment, signal dispositions and standard stream redirection, in that
//! order. A [`PidLockFile`] guarantees that a single instance runs at a time.
//!
//! ```no_run
//! use daemon_context::{DaemonContext, PidLockFile, WaitPolicy};
//! use std::time::Duration;
//!
//! let lock = PidLockFile::with_policy(
//!     "/run/mydaemon.pid",
//!     WaitPolicy::BoundedWait(Duration::from_secs(5)),
//! );
//! let mut daemon = DaemonContext::new()
//!     .user("nobody")
//!     .working_directory("/var/lib/mydaemon")
//!     .lock(lock);
//!
//! daemon.daemonize()?;
//! // ... serve ...
//! daemon.shutdown();
//! # Ok::<(), daemon_context::DaemonError>(())
//! ```

#[cfg(not(unix))]
compile_error!("daemon_context only supports Unix-like systems");

mod daemon;
mod error;
mod finalizer;
mod lockfile;
mod signals;
mod stdio;
mod sys;
mod types;

// Re-export public types to keep the API flat
pub use daemon::DaemonContext;
pub use error::{DaemonError, DaemonResult, Stage};
pub use lockfile::{parse_pid, read_pid, PidLockFile, WaitPolicy, RETRY_INTERVAL};
pub use signals::{default_signal_table, SignalHandler, SignalTable};
pub use stdio::Stdio;
pub use sys::{Fork, Sys, UnixSys};
pub use types::{Group, User};
