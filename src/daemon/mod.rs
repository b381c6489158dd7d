//! Long-lived restart daemon.
//!
//! `start` fork-detaches a child that runs the sweep loop on a timer and
//! records its PID in `<state_dir>/daemon.pid`. Exactly one daemon runs at a
//! time. SIGTERM/SIGINT request a graceful shutdown: the current sweep
//! finishes, the PID file is removed, and the process exits.

pub mod log;
pub mod pid;

use sentinel::{
    error::{Error, Result},
    logs, monitor, process,
    registry::Registry,
};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::unistd::{fork, setsid, ForkResult};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// How long the parent waits for the forked child to come up.
const STARTUP_WAIT: Duration = Duration::from_secs(2);
const STARTUP_POLL: Duration = Duration::from_millis(50);

extern "C" fn handle_termination_signal(_: libc::c_int) {
    // Only async-signal-safe work here: flip the flag, let the loop exit.
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Forks the daemon. Returns the daemon PID on the parent side; the child
/// never returns.
pub fn start(state_dir: &Path, interval: Duration) -> Result<i32> {
    if pid::alive(state_dir).is_some() {
        return Err(Error::AlreadyRunning);
    }
    logs::ensure_layout(state_dir)?;

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            // Wait for the PID file so an immediate `daemon status` does not
            // report a daemon that is still booting as absent.
            let deadline = std::time::Instant::now() + STARTUP_WAIT;
            while std::time::Instant::now() < deadline {
                if let Some(running) = pid::alive(state_dir) {
                    return Ok(running);
                }
                std::thread::sleep(STARTUP_POLL);
            }
            Ok(child.as_raw())
        }
        Ok(ForkResult::Child) => run(state_dir, interval),
        Err(err) => Err(Error::SpawnFailed(format!("fork failed: {err}"))),
    }
}

/// Stops the daemon with the usual SIGTERM → 5 s → SIGKILL escalation and
/// removes the PID file. Returns the PID that was stopped, or None when no
/// daemon was running.
pub fn stop(state_dir: &Path) -> Result<Option<i32>> {
    let Some(running) = pid::alive(state_dir) else {
        return Ok(None);
    };

    process::stop_pid(running as i64, false)?;
    pid::remove(state_dir);
    Ok(Some(running))
}

/// The live daemon PID, if any.
pub fn status(state_dir: &Path) -> Option<i32> {
    pid::alive(state_dir)
}

fn run(state_dir: &Path, interval: Duration) -> ! {
    let _ = setsid();
    detach_stdio(state_dir);

    unsafe {
        libc::signal(libc::SIGTERM, handle_termination_signal as *const () as usize);
        libc::signal(libc::SIGINT, handle_termination_signal as *const () as usize);
        // println! on a closed pipe must not kill the daemon.
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let mut logger = match log::Logger::open(state_dir) {
        Ok(logger) => logger,
        Err(_) => unsafe { libc::_exit(1) },
    };

    if pid::write(state_dir, std::process::id()).is_err() {
        logger.write("cannot write pid file, exiting");
        unsafe { libc::_exit(1) };
    }
    logger.write(format!(
        "daemon started (pid={}, interval={}s)",
        std::process::id(),
        interval.as_secs()
    ));

    let registry = match Registry::open(state_dir) {
        Ok(registry) => registry,
        Err(err) => {
            logger.write(format!("cannot open registry: {err}"));
            pid::remove(state_dir);
            unsafe { libc::_exit(1) };
        }
    };

    while !SHUTDOWN.load(Ordering::SeqCst) {
        match monitor::sweep(&registry) {
            Ok(outcome) => {
                for (old_pid, record) in &outcome.restarted {
                    logger.write(format!(
                        "restarted '{}' (id={}, old_pid={old_pid}, new_pid={})",
                        record.name, record.id, record.pid
                    ));
                }
                for (name, err) in &outcome.failed {
                    logger.write(format!("restart of '{name}' failed: {err}"));
                }
            }
            Err(err) => logger.write(format!("sweep failed: {err}")),
        }

        // Sleep in short slices so a shutdown request is honored promptly.
        let tick_end = std::time::Instant::now() + interval;
        while std::time::Instant::now() < tick_end && !SHUTDOWN.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(250));
        }
    }

    logger.write("daemon stopped");
    pid::remove(state_dir);
    unsafe { libc::_exit(0) }
}

/// Points stdin at the null device and stdout/stderr at the daemon log.
fn detach_stdio(state_dir: &Path) {
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    if let Ok(devnull) = OpenOptions::new().read(true).open("/dev/null") {
        unsafe { libc::dup2(devnull.as_raw_fd(), 0) };
    }
    if let Ok(sink) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(state_dir.join(log::LOG_FILE))
    {
        unsafe {
            libc::dup2(sink.as_raw_fd(), 1);
            libc::dup2(sink.as_raw_fd(), 2);
        }
    }
}
