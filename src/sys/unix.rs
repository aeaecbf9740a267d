use std::ffi::{CStr, CString};
use std::fs::{File, OpenOptions};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use libc::c_int;
use sd_notify::NotifyState;

use super::{Fork, Sys};
use crate::finalizer;
use crate::lockfile::PidLockFile;
use crate::signals::SignalHandler;

const DEV_NULL: &str = "/dev/null";

/// The real operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSys;

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains a NUL byte"))
}

fn check(ret: c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl Sys for UnixSys {
    fn current_uid(&self) -> u32 {
        unsafe { libc::getuid() }
    }

    fn current_gid(&self) -> u32 {
        unsafe { libc::getgid() }
    }

    fn parent_pid(&self) -> libc::pid_t {
        unsafe { libc::getppid() }
    }

    fn stdin_is_socket(&self) -> bool {
        let mut st = MaybeUninit::<libc::stat>::uninit();
        if unsafe { libc::fstat(libc::STDIN_FILENO, st.as_mut_ptr()) } < 0 {
            return false;
        }
        let st = unsafe { st.assume_init() };
        (st.st_mode & libc::S_IFMT) == libc::S_IFSOCK
    }

    fn user_name(&self, uid: u32) -> io::Result<Option<String>> {
        let pwd = unsafe { libc::getpwuid(uid) };
        if pwd.is_null() {
            return Ok(None);
        }
        let name = unsafe { CStr::from_ptr((*pwd).pw_name) };
        Ok(Some(name.to_string_lossy().into_owned()))
    }

    fn uid_for_name(&self, name: &str) -> io::Result<Option<u32>> {
        let cname = c_name(name)?;
        let pwd = unsafe { libc::getpwnam(cname.as_ptr()) };
        if pwd.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { (*pwd).pw_uid }))
    }

    fn gid_for_name(&self, name: &str) -> io::Result<Option<u32>> {
        let cname = c_name(name)?;
        let grp = unsafe { libc::getgrnam(cname.as_ptr()) };
        if grp.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { (*grp).gr_gid }))
    }

    fn chroot(&self, path: &Path) -> io::Result<()> {
        let root = c_path(path)?;
        check(unsafe { libc::chroot(root.as_ptr()) })
    }

    fn disable_core_dumps(&self) -> io::Result<()> {
        let limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
        check(unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) })
    }

    fn set_umask(&self, mask: u32) -> u32 {
        unsafe { libc::umask(mask as libc::mode_t) as u32 }
    }

    fn chdir(&self, path: &Path) -> io::Result<()> {
        std::env::set_current_dir(path)
    }

    fn init_groups(&self, user: &str, gid: u32) -> io::Result<()> {
        let cname = c_name(user)?;
        check(unsafe { libc::initgroups(cname.as_ptr(), gid as _) })
    }

    fn set_gid(&self, gid: u32) -> io::Result<()> {
        check(unsafe { libc::setgid(gid) })
    }

    fn set_uid(&self, uid: u32) -> io::Result<()> {
        check(unsafe { libc::setuid(uid) })
    }

    unsafe fn fork(&self) -> io::Result<Fork> {
        match unsafe { libc::fork() } {
            pid if pid < 0 => Err(io::Error::last_os_error()),
            0 => Ok(Fork::Child),
            pid => Ok(Fork::Parent(pid)),
        }
    }

    fn setsid(&self) -> io::Result<()> {
        check(unsafe { libc::setsid() })
    }

    fn exit_now(&self, code: i32) -> ! {
        unsafe { libc::_exit(code) }
    }

    fn install_signal(&self, signal: c_int, handler: Option<&SignalHandler>) -> io::Result<()> {
        // signal-hook panics on these instead of returning an error.
        if handler.is_some() && signal_hook::consts::FORBIDDEN.contains(&signal) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        match handler {
            None => {
                if unsafe { libc::signal(signal, libc::SIG_IGN) } == libc::SIG_ERR {
                    return Err(io::Error::last_os_error());
                }
            }
            Some(SignalHandler::Terminate) => {
                unsafe {
                    signal_hook::low_level::register(signal, move || {
                        finalizer::terminate_from_signal(signal);
                    })?;
                }
            }
            Some(SignalHandler::Custom(callback)) => {
                let callback = callback.clone();
                unsafe {
                    signal_hook::low_level::register(signal, move || callback(signal))?;
                }
            }
        }
        Ok(())
    }

    fn open_null(&self) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(DEV_NULL)
    }

    fn dup2(&self, source: RawFd, target: RawFd) -> io::Result<()> {
        check(unsafe { libc::dup2(source, target) })
    }

    fn register_finalizer(&self, lock: Option<&PidLockFile>) -> io::Result<()> {
        finalizer::arm(lock)
    }

    fn clear_finalizer(&self) {
        finalizer::disarm();
    }

    fn notify_ready(&self) -> io::Result<()> {
        // 'true' unsets NOTIFY_SOCKET so it does not leak into children.
        sd_notify::notify(true, &[NotifyState::Ready])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_signal_handler_is_an_error() {
        let handler = SignalHandler::custom(|_| {});
        for signal in [libc::SIGKILL, libc::SIGSTOP] {
            let err = UnixSys.install_signal(signal, Some(&handler)).unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::EINVAL));

            // Ignoring them is refused by the kernel the same way.
            let err = UnixSys.install_signal(signal, None).unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        }
    }
}
