//! The signal disposition table applied when the process becomes a daemon.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use libc::c_int;

/// Signal-handling action installed for one signal.
///
/// A table entry of `None` means the signal is ignored.
#[derive(Clone)]
pub enum SignalHandler {
    /// Print `Terminating on signal <N>` on stdout and exit with status 0,
    /// removing our lock file on the way out.
    Terminate,
    /// Run a callback with the signal number.
    ///
    /// The callback runs inside the signal handler: it must be async-signal-safe
    /// (no allocation, no locks, no `println!`). Setting an atomic flag is fine.
    Custom(Arc<dyn Fn(c_int) + Send + Sync>),
}

impl SignalHandler {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(c_int) + Send + Sync + 'static,
    {
        SignalHandler::Custom(Arc::new(f))
    }
}

impl fmt::Debug for SignalHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalHandler::Terminate => f.write_str("Terminate"),
            SignalHandler::Custom(_) => f.write_str("Custom(Fn)"),
        }
    }
}

/// Signal number to handler; `None` ignores the signal.
pub type SignalTable = BTreeMap<c_int, Option<SignalHandler>>;

/// Job-control stops and background terminal I/O are ignored, `SIGTERM`
/// terminates.
pub fn default_signal_table() -> SignalTable {
    let mut table = SignalTable::new();
    table.insert(libc::SIGTSTP, None);
    table.insert(libc::SIGTTIN, None);
    table.insert(libc::SIGTTOU, None);
    table.insert(libc::SIGTERM, Some(SignalHandler::Terminate));
    table
}

const NOTICE_PREFIX: &[u8] = b"Terminating on signal ";

/// Formats the termination notice into `buf` without allocating, returning
/// the number of bytes written.
pub(crate) fn format_termination_notice(signal: c_int, buf: &mut [u8; 48]) -> usize {
    let mut len = NOTICE_PREFIX.len();
    buf[..len].copy_from_slice(NOTICE_PREFIX);

    let mut digits = [0u8; 12];
    let mut n = signal.unsigned_abs();
    let mut count = 0;
    loop {
        digits[count] = b'0' + (n % 10) as u8;
        count += 1;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if signal < 0 {
        buf[len] = b'-';
        len += 1;
    }
    for d in digits[..count].iter().rev() {
        buf[len] = *d;
        len += 1;
    }
    buf[len] = b'\n';
    len + 1
}
