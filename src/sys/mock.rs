use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use libc::c_int;

use super::{Fork, Sys};
use crate::lockfile::PidLockFile;
use crate::signals::SignalHandler;

/// One recorded OS operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Chroot(PathBuf),
    DisableCoreDumps,
    Umask(u32),
    Chdir(PathBuf),
    InitGroups(String, u32),
    SetGid(u32),
    SetUid(u32),
    Fork,
    Setsid,
    Exit(i32),
    IgnoreSignal(c_int),
    HandleSignal(c_int),
    OpenNull,
    Dup2(RawFd),
    RegisterFinalizer(Option<PathBuf>),
    ClearFinalizer,
    NotifyReady,
}

/// Records calls instead of performing them. `fail_on` makes the matching
/// call return `EPERM`.
pub(crate) struct MockSys {
    pub calls: RefCell<Vec<Call>>,
    pub fail_on: Option<Box<dyn Fn(&Call) -> bool>>,
    pub uid: u32,
    pub gid: u32,
    pub ppid: libc::pid_t,
    pub stdin_socket: bool,
    pub fork_result: Fork,
    pub users: HashMap<String, u32>,
    pub groups: HashMap<String, u32>,
}

impl Default for MockSys {
    fn default() -> Self {
        let mut users = HashMap::new();
        users.insert("daemon".to_owned(), 2);
        let mut groups = HashMap::new();
        groups.insert("daemon".to_owned(), 2);
        MockSys {
            calls: RefCell::new(Vec::new()),
            fail_on: None,
            uid: 1000,
            gid: 1000,
            ppid: 4242,
            stdin_socket: false,
            fork_result: Fork::Child,
            users,
            groups,
        }
    }
}

impl MockSys {
    pub fn failing_on<F: Fn(&Call) -> bool + 'static>(f: F) -> Self {
        MockSys { fail_on: Some(Box::new(f)), ..MockSys::default() }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: Call) -> io::Result<()> {
        let fail = self.fail_on.as_ref().is_some_and(|f| f(&call));
        self.calls.borrow_mut().push(call);
        if fail {
            Err(io::Error::from_raw_os_error(libc::EPERM))
        } else {
            Ok(())
        }
    }
}

impl Sys for MockSys {
    fn current_uid(&self) -> u32 {
        self.uid
    }

    fn current_gid(&self) -> u32 {
        self.gid
    }

    fn parent_pid(&self) -> libc::pid_t {
        self.ppid
    }

    fn stdin_is_socket(&self) -> bool {
        self.stdin_socket
    }

    fn user_name(&self, uid: u32) -> io::Result<Option<String>> {
        Ok(self.users.iter().find(|(_, id)| **id == uid).map(|(name, _)| name.clone()))
    }

    fn uid_for_name(&self, name: &str) -> io::Result<Option<u32>> {
        Ok(self.users.get(name).copied())
    }

    fn gid_for_name(&self, name: &str) -> io::Result<Option<u32>> {
        Ok(self.groups.get(name).copied())
    }

    fn chroot(&self, path: &Path) -> io::Result<()> {
        self.record(Call::Chroot(path.to_path_buf()))
    }

    fn disable_core_dumps(&self) -> io::Result<()> {
        self.record(Call::DisableCoreDumps)
    }

    fn set_umask(&self, mask: u32) -> u32 {
        let _ = self.record(Call::Umask(mask));
        0o022
    }

    fn chdir(&self, path: &Path) -> io::Result<()> {
        self.record(Call::Chdir(path.to_path_buf()))
    }

    fn init_groups(&self, user: &str, gid: u32) -> io::Result<()> {
        self.record(Call::InitGroups(user.to_owned(), gid))
    }

    fn set_gid(&self, gid: u32) -> io::Result<()> {
        self.record(Call::SetGid(gid))
    }

    fn set_uid(&self, uid: u32) -> io::Result<()> {
        self.record(Call::SetUid(uid))
    }

    unsafe fn fork(&self) -> io::Result<Fork> {
        self.record(Call::Fork)?;
        Ok(self.fork_result)
    }

    fn setsid(&self) -> io::Result<()> {
        self.record(Call::Setsid)
    }

    fn exit_now(&self, code: i32) -> ! {
        let _ = self.record(Call::Exit(code));
        panic!("exit_now({})", code);
    }

    fn install_signal(&self, signal: c_int, handler: Option<&SignalHandler>) -> io::Result<()> {
        match handler {
            None => self.record(Call::IgnoreSignal(signal)),
            Some(_) => self.record(Call::HandleSignal(signal)),
        }
    }

    fn open_null(&self) -> io::Result<File> {
        self.record(Call::OpenNull)?;
        File::open("/dev/null")
    }

    fn dup2(&self, _source: RawFd, target: RawFd) -> io::Result<()> {
        self.record(Call::Dup2(target))
    }

    fn register_finalizer(&self, lock: Option<&PidLockFile>) -> io::Result<()> {
        self.record(Call::RegisterFinalizer(lock.map(|l| l.path().to_path_buf())))
    }

    fn clear_finalizer(&self) {
        let _ = self.record(Call::ClearFinalizer);
    }

    fn notify_ready(&self) -> io::Result<()> {
        self.record(Call::NotifyReady)
    }
}
