use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The daemonization step that was running when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ChangeRoot,
    DisableCoreDumps,
    ChangeDirectory,
    DropPrivileges,
    Detach,
    InstallSignals,
    RedirectStreams,
    AcquireLock,
    RegisterFinalizer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Stage::ChangeRoot => "changing the root directory",
            Stage::DisableCoreDumps => "disabling core dumps",
            Stage::ChangeDirectory => "changing the working directory",
            Stage::DropPrivileges => "dropping privileges",
            Stage::Detach => "detaching from the terminal",
            Stage::InstallSignals => "installing signal handlers",
            Stage::RedirectStreams => "redirecting standard streams",
            Stage::AcquireLock => "acquiring the lock file",
            Stage::RegisterFinalizer => "registering the exit finalizer",
        };
        f.write_str(what)
    }
}

/// Error type for daemonization.
///
/// Every variant is fatal: daemonization stops at the first failure and the
/// stages that already ran are not undone.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// An OS-level transition failed.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: io::Error,
    },
    /// The target user (by name or uid) has no account entry.
    #[error("unable to resolve user account '{0}'")]
    UnknownUser(String),
    /// The target group name has no group entry.
    #[error("unable to resolve group '{0}'")]
    UnknownGroup(String),
    /// The PID lock file is held by another instance.
    #[error("unable to acquire lock file {}: daemon is already running", .path.display())]
    TargetLocked { path: PathBuf },
}

impl DaemonError {
    pub(crate) fn stage(stage: Stage) -> impl FnOnce(io::Error) -> DaemonError {
        move |source| DaemonError::Stage { stage, source }
    }

    /// The stage this error was raised from, if it wraps an OS failure.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            DaemonError::Stage { stage, .. } => Some(*stage),
            DaemonError::UnknownUser(_) | DaemonError::UnknownGroup(_) => {
                Some(Stage::DropPrivileges)
            }
            DaemonError::TargetLocked { .. } => Some(Stage::AcquireLock),
        }
    }
}

/// A specialized Result type for daemonization.
pub type DaemonResult<T> = Result<T, DaemonError>;
