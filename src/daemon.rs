use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};

use libc::c_int;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, DaemonResult, Stage};
use crate::lockfile::PidLockFile;
use crate::signals::{default_signal_table, SignalHandler, SignalTable};
use crate::stdio::Stdio;
use crate::sys::{Fork, Sys, UnixSys};
use crate::types::{Group, User};

/// Describes the daemon the current process should turn into, and performs
/// the transition.
///
/// Configure it with the builder methods, then call [`daemonize`](Self::daemonize).
/// The transition is irreversible; only the lock file is released again by
/// [`shutdown`](Self::shutdown) or automatically at process exit.
pub struct DaemonContext<S: Sys = UnixSys> {
    sys: S,
    detach: bool,
    user: User,
    group: Group,
    init_groups: bool,
    umask: Option<u32>,
    root: Option<PathBuf>,
    directory: PathBuf,
    prevent_core: bool,
    signals: SignalTable,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
    lock: Option<PidLockFile>,
    notify_ready: bool,
    is_daemon: bool,
}

impl<S: Sys> fmt::Debug for DaemonContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonContext")
            .field("detach", &self.detach)
            .field("user", &self.user)
            .field("group", &self.group)
            .field("init_groups", &self.init_groups)
            .field("umask", &self.umask)
            .field("root", &self.root)
            .field("directory", &self.directory)
            .field("prevent_core", &self.prevent_core)
            .field("signals", &self.signals)
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("lock", &self.lock)
            .field("notify_ready", &self.notify_ready)
            .field("is_daemon", &self.is_daemon)
            .finish()
    }
}

impl Default for DaemonContext<UnixSys> {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonContext<UnixSys> {
    /// Creates a new default configuration for the running process.
    ///
    /// # Defaults
    /// - Detach: yes, unless started by init or by a super-server (stdin is a socket)
    /// - User / group: the current uid / gid
    /// - Working directory: `/`
    /// - Umask: inherited
    /// - Core dumps: disabled
    /// - Signals: [`default_signal_table`]
    /// - Stdio: `/dev/null`
    pub fn new() -> Self {
        Self::with_sys(UnixSys)
    }
}

impl<S: Sys> DaemonContext<S> {
    /// Same as [`DaemonContext::new`] on top of a custom OS binding.
    pub fn with_sys(sys: S) -> Self {
        let detach = !(sys.parent_pid() == 1 || sys.stdin_is_socket());
        DaemonContext {
            detach,
            user: User::Id(sys.current_uid()),
            group: Group::Id(sys.current_gid()),
            init_groups: false,
            umask: None,
            root: None,
            directory: PathBuf::from("/"),
            prevent_core: true,
            signals: default_signal_table(),
            stdin: Stdio::devnull(),
            stdout: Stdio::devnull(),
            stderr: Stdio::devnull(),
            lock: None,
            notify_ready: true,
            is_daemon: false,
            sys,
        }
    }

    // --- Public Getters ---

    /// Whether [`daemonize`](Self::daemonize) has completed and no shutdown happened since.
    pub fn is_daemon(&self) -> bool {
        self.is_daemon
    }

    pub fn detach_enabled(&self) -> bool {
        self.detach
    }

    /// The signal dispositions that will be installed.
    pub fn signal_table(&self) -> &SignalTable {
        &self.signals
    }

    pub fn pid_lock(&self) -> Option<&PidLockFile> {
        self.lock.as_ref()
    }

    pub fn working_directory_path(&self) -> &Path {
        &self.directory
    }

    // --- Builder Methods ---

    /// Whether to double-fork away from the controlling terminal.
    pub fn detach(mut self, detach: bool) -> Self { self.detach = detach; self }

    /// Sets the user to run the daemon as (privilege dropping).
    pub fn user<U: Into<User>>(mut self, user: U) -> Self { self.user = user.into(); self }

    /// Sets the group to run the daemon as.
    pub fn group<G: Into<Group>>(mut self, group: G) -> Self { self.group = group.into(); self }

    /// Also load the supplementary groups of the target user.
    pub fn init_groups(mut self, init: bool) -> Self { self.init_groups = init; self }

    /// Sets the umask for the daemon process.
    pub fn umask(mut self, mask: u32) -> Self { self.umask = Some(mask); self }

    /// Sets a chroot directory for the daemon.
    pub fn chroot<P: Into<PathBuf>>(mut self, path: P) -> Self { self.root = Some(path.into()); self }

    /// Sets the working directory for the daemon. Resolved inside the chroot, if any.
    pub fn working_directory<P: Into<PathBuf>>(mut self, path: P) -> Self { self.directory = path.into(); self }

    /// Whether to set the core dump size limit to zero.
    pub fn prevent_core(mut self, prevent: bool) -> Self { self.prevent_core = prevent; self }

    /// Replaces the whole signal table.
    pub fn signal_map(mut self, table: SignalTable) -> Self { self.signals = table; self }

    /// Sets the disposition of one signal; `None` ignores it.
    pub fn signal(mut self, signal: c_int, handler: Option<SignalHandler>) -> Self {
        self.signals.insert(signal, handler);
        self
    }

    /// Configures the standard input stream.
    pub fn stdin<T: Into<Stdio>>(mut self, stdio: T) -> Self { self.stdin = stdio.into(); self }

    /// Configures the standard output stream.
    pub fn stdout<T: Into<Stdio>>(mut self, stdio: T) -> Self { self.stdout = stdio.into(); self }

    /// Configures the standard error stream.
    pub fn stderr<T: Into<Stdio>>(mut self, stdio: T) -> Self { self.stderr = stdio.into(); self }

    /// Guards the daemon with a PID lock file that fails immediately when held.
    pub fn pid_file<P: Into<PathBuf>>(self, path: P) -> Self { self.lock(PidLockFile::new(path)) }

    /// Guards the daemon with the given lock, keeping its wait policy.
    pub fn lock(mut self, lock: PidLockFile) -> Self { self.lock = Some(lock); self }

    /// Whether to send `READY=1` to systemd once daemonized (no-op outside systemd).
    pub fn notify_ready(mut self, notify: bool) -> Self { self.notify_ready = notify; self }

    /// Turns the current process into a daemon.
    ///
    /// Stages run in a fixed order: chroot, core dump limit, umask, working
    /// directory, privilege drop, detach, signal handlers, stream redirection,
    /// lock acquisition. The first failure aborts; earlier stages are not
    /// rolled back, except that a lock acquired just before a failed exit
    /// finalizer registration is released again. Calling this again once
    /// daemonized does nothing.
    pub fn daemonize(&mut self) -> DaemonResult<()> {
        if self.is_daemon {
            return Ok(());
        }

        if let Some(root) = &self.root {
            debug!(root = %root.display(), "changing root directory");
            self.sys.chroot(root).map_err(DaemonError::stage(Stage::ChangeRoot))?;
        }

        if self.prevent_core {
            debug!("disabling core dumps");
            self.sys
                .disable_core_dumps()
                .map_err(DaemonError::stage(Stage::DisableCoreDumps))?;
        }

        if let Some(mask) = self.umask {
            let previous = self.sys.set_umask(mask);
            debug!("umask set to {:03o} (was {:03o})", mask, previous);
        }

        debug!(directory = %self.directory.display(), "changing working directory");
        self.sys
            .chdir(&self.directory)
            .map_err(DaemonError::stage(Stage::ChangeDirectory))?;

        self.drop_privileges()?;

        if self.detach {
            self.detach_from_terminal()?;
        }

        self.install_signal_handlers()?;
        self.redirect_streams()?;

        if let Some(lock) = &self.lock {
            if !lock.acquire() {
                return Err(DaemonError::TargetLocked { path: lock.path().to_path_buf() });
            }
        }

        if let Err(err) = self.sys.register_finalizer(self.lock.as_ref()) {
            // Nothing would remove the lock at exit; give it back now.
            if let Some(lock) = &self.lock {
                lock.release();
            }
            return Err(DaemonError::Stage { stage: Stage::RegisterFinalizer, source: err });
        }
        self.is_daemon = true;

        if self.notify_ready {
            if let Err(err) = self.sys.notify_ready() {
                warn!(error = %err, "failed to notify service manager");
            }
        }

        info!(pid = std::process::id(), "process daemonized");
        Ok(())
    }

    /// Releases the lock file (if we hold it) and leaves the daemon state.
    ///
    /// Never fails: release errors are logged and otherwise ignored. Does
    /// nothing if the process is not currently a daemon.
    pub fn shutdown(&mut self) {
        if !self.is_daemon {
            return;
        }
        if let Some(lock) = &self.lock {
            if lock.i_am_locking() && !lock.release() {
                warn!(path = %lock.path().display(), "could not release lock file");
            }
        }
        self.sys.clear_finalizer();
        self.is_daemon = false;
        info!("daemon context closed");
    }

    fn resolve_uid(&self) -> DaemonResult<u32> {
        match &self.user {
            User::Id(uid) => Ok(*uid),
            User::Name(name) => self
                .sys
                .uid_for_name(name)
                .map_err(DaemonError::stage(Stage::DropPrivileges))?
                .ok_or_else(|| DaemonError::UnknownUser(name.clone())),
        }
    }

    fn resolve_gid(&self) -> DaemonResult<u32> {
        match &self.group {
            Group::Id(gid) => Ok(*gid),
            Group::Name(name) => self
                .sys
                .gid_for_name(name)
                .map_err(DaemonError::stage(Stage::DropPrivileges))?
                .ok_or_else(|| DaemonError::UnknownGroup(name.clone())),
        }
    }

    // The group must change first: after setuid we may no longer be allowed to.
    fn drop_privileges(&self) -> DaemonResult<()> {
        let uid = self.resolve_uid()?;
        let gid = self.resolve_gid()?;
        debug!(uid, gid, init_groups = self.init_groups, "dropping privileges");

        if self.init_groups {
            let name = self
                .sys
                .user_name(uid)
                .map_err(DaemonError::stage(Stage::DropPrivileges))?
                .ok_or_else(|| DaemonError::UnknownUser(User::Id(uid).to_string()))?;
            self.sys
                .init_groups(&name, gid)
                .map_err(DaemonError::stage(Stage::DropPrivileges))?;
        } else {
            self.sys.set_gid(gid).map_err(DaemonError::stage(Stage::DropPrivileges))?;
        }
        self.sys.set_uid(uid).map_err(DaemonError::stage(Stage::DropPrivileges))
    }

    /// Double fork: the grandchild is in a new session but not its leader,
    /// so it can never reacquire a controlling terminal.
    fn detach_from_terminal(&self) -> DaemonResult<()> {
        debug!("detaching from controlling terminal");

        // SAFETY: the parent leaves through `exit_now` right away.
        if let Fork::Parent(_) = unsafe { self.sys.fork() }.map_err(DaemonError::stage(Stage::Detach))? {
            self.sys.exit_now(0);
        }

        self.sys.setsid().map_err(DaemonError::stage(Stage::Detach))?;

        // SAFETY: as above.
        if let Fork::Parent(_) = unsafe { self.sys.fork() }.map_err(DaemonError::stage(Stage::Detach))? {
            self.sys.exit_now(0);
        }
        Ok(())
    }

    fn install_signal_handlers(&self) -> DaemonResult<()> {
        for (&signal, handler) in &self.signals {
            debug!(signal, handler = ?handler, "installing signal disposition");
            self.sys
                .install_signal(signal, handler.as_ref())
                .map_err(DaemonError::stage(Stage::InstallSignals))?;
        }
        Ok(())
    }

    fn redirect_streams(&self) -> DaemonResult<()> {
        let streams = [
            (&self.stdin, libc::STDIN_FILENO),
            (&self.stdout, libc::STDOUT_FILENO),
            (&self.stderr, libc::STDERR_FILENO),
        ];
        for (stdio, slot) in streams {
            self.redirect_stream(stdio, slot)
                .map_err(DaemonError::stage(Stage::RedirectStreams))?;
        }
        Ok(())
    }

    fn redirect_stream(&self, stdio: &Stdio, slot: RawFd) -> io::Result<()> {
        match stdio {
            Stdio::RedirectToFile(f) => self.sys.dup2(f.as_raw_fd(), slot),
            Stdio::Devnull => {
                let null = self.sys.open_null()?;
                if null.as_raw_fd() == slot {
                    // The slot was closed and open() reused it: keep it open.
                    let _ = null.into_raw_fd();
                    return Ok(());
                }
                self.sys.dup2(null.as_raw_fd(), slot)
            }
            Stdio::Keep => Ok(()),
        }
    }
}
