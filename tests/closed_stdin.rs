//! Standard streams that are already closed when daemonizing must still end
//! up on `/dev/null`.

use daemon_context::{DaemonContext, Stdio};

#[test]
fn test_closed_stdin_is_reopened_on_dev_null() {
    unsafe {
        libc::close(libc::STDIN_FILENO);
    }

    let mut daemon = DaemonContext::new()
        .detach(false)
        .notify_ready(false)
        .stdout(Stdio::Keep)
        .stderr(Stdio::Keep);
    daemon.daemonize().unwrap();

    assert_ne!(unsafe { libc::fcntl(libc::STDIN_FILENO, libc::F_GETFD) }, -1);

    // The slot must hold /dev/null, not some other file that reused it.
    let mut stdin = std::mem::MaybeUninit::<libc::stat>::uninit();
    let mut null = std::mem::MaybeUninit::<libc::stat>::uninit();
    let path = std::ffi::CString::new("/dev/null").unwrap();
    unsafe {
        assert_eq!(libc::fstat(libc::STDIN_FILENO, stdin.as_mut_ptr()), 0);
        assert_eq!(libc::stat(path.as_ptr(), null.as_mut_ptr()), 0);
        let (stdin, null) = (stdin.assume_init(), null.assume_init());
        assert_eq!((stdin.st_dev, stdin.st_ino), (null.st_dev, null.st_ino));
    }

    daemon.shutdown();
}
