//! Lock cleanup when the daemon process goes away.
//!
//! Two exit paths exist. A normal exit (return from `main`, `process::exit`)
//! runs the `atexit` hook, which releases the lock through the regular guard
//! API. The default termination signal handler exits with `_exit`, skipping
//! `atexit`, so it removes the file itself using only async-signal-safe calls
//! (`open`, `read`, `unlink`), with the same stored-PID check as
//! [`PidLockFile::release`].

use std::ffi::{CStr, CString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use libc::c_int;

use crate::lockfile::{parse_pid, PidLockFile};
use crate::signals::format_termination_notice;

struct Armed {
    lock: PidLockFile,
    c_path: CString,
    pid: libc::pid_t,
}

// Records are leaked once published: a signal handler on another thread may
// still be reading one after it has been swapped out.
static ARMED: AtomicPtr<Armed> = AtomicPtr::new(ptr::null_mut());
static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Publishes the lock to release at exit and makes sure the `atexit` hook is installed.
pub(crate) fn arm(lock: Option<&PidLockFile>) -> io::Result<()> {
    let record = match lock {
        Some(lock) => {
            let c_path = CString::new(lock.path().as_os_str().as_bytes()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "lock path contains a NUL byte")
            })?;
            let pid = unsafe { libc::getpid() };
            Box::into_raw(Box::new(Armed { lock: lock.clone(), c_path, pid }))
        }
        None => ptr::null_mut(),
    };
    ARMED.store(record, Ordering::Release);
    install_hook()
}

/// Forgets the published lock; exit no longer touches it.
pub(crate) fn disarm() {
    ARMED.store(ptr::null_mut(), Ordering::Release);
}

fn install_hook() -> io::Result<()> {
    if HOOK_INSTALLED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    if unsafe { libc::atexit(release_at_exit) } != 0 {
        HOOK_INSTALLED.store(false, Ordering::Release);
        return Err(io::Error::other("atexit registration failed"));
    }
    Ok(())
}

extern "C" fn release_at_exit() {
    let armed = ARMED.swap(ptr::null_mut(), Ordering::AcqRel);
    // SAFETY: published records are never freed.
    if let Some(armed) = unsafe { armed.as_ref() } {
        let _ = armed.lock.release();
    }
}

/// Body of the default termination handler. Runs in signal context.
pub(crate) fn terminate_from_signal(signal: c_int) -> ! {
    let mut buf = [0u8; 48];
    let len = format_termination_notice(signal, &mut buf);
    unsafe {
        libc::write(libc::STDOUT_FILENO, buf.as_ptr().cast(), len);
    }

    let armed = ARMED.swap(ptr::null_mut(), Ordering::AcqRel);
    // SAFETY: published records are never freed.
    if let Some(armed) = unsafe { armed.as_ref() } {
        // A forked child inherits the handler but not the lock.
        if unsafe { libc::getpid() } == armed.pid && records_pid(&armed.c_path, armed.pid) {
            unsafe {
                libc::unlink(armed.c_path.as_ptr());
            }
        }
    }

    signal_hook::low_level::exit(0)
}

/// Whether the file at `path` stores `pid`. Async-signal-safe.
fn records_pid(path: &CStr, pid: libc::pid_t) -> bool {
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return false;
    }
    let mut buf = [0u8; 64];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    unsafe {
        libc::close(fd);
    }
    if n <= 0 {
        return false;
    }
    let bytes = &buf[..n as usize];
    let text = std::str::from_utf8(bytes)
        .unwrap_or_else(|e| std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default());
    parse_pid(text) == u32::try_from(pid).ok()
}
