//! A small ticker daemon. Run it, then `tail -f ticker.log` and stop it with
//! `kill $(cat ticker.pid)`.

use std::env;
use std::fs::OpenOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use daemon_context::{DaemonContext, PidLockFile, SignalHandler, WaitPolicy};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let pwd = env::current_dir()?;
    let log_path = pwd.join("ticker.log");
    let pid_path = pwd.join("ticker.pid");

    let log = OpenOptions::new().create(true).append(true).open(&log_path)?;
    let err = log.try_clone()?;

    println!("Launching ticker daemon, logging to {}", log_path.display());

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);

    let mut daemon = DaemonContext::new()
        .working_directory(&pwd)
        .umask(0o027)
        .stdout(log)
        .stderr(err)
        .lock(PidLockFile::with_policy(&pid_path, WaitPolicy::Immediate))
        // Storing to an atomic is async-signal-safe.
        .signal(signal_hook::consts::SIGTERM, Some(SignalHandler::custom(move |_| {
            flag.store(true, Ordering::Relaxed);
        })));

    daemon.daemonize()?;

    println!("[ticker] started, pid {}", std::process::id());
    let mut tick = 0u64;
    while !stop.load(Ordering::Relaxed) {
        println!("[ticker] tick #{}", tick);
        tick += 1;
        thread::sleep(Duration::from_secs(1));
    }

    println!("[ticker] stop requested, exiting");
    daemon.shutdown();
    Ok(())
}
