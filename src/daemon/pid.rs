//! Daemon PID file bookkeeping: `<state_dir>/daemon.pid` holds the decimal
//! PID of the live daemon, or is absent.

use sentinel::error::{Error, Result};
use sentinel::process::unix;

use std::path::{Path, PathBuf};

pub const PID_FILE: &str = "daemon.pid";

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join(PID_FILE)
}

pub fn exists(state_dir: &Path) -> bool {
    path(state_dir).exists()
}

/// The recorded PID, if the file exists and parses.
pub fn read(state_dir: &Path) -> Option<i32> {
    let contents = std::fs::read_to_string(path(state_dir)).ok()?;
    contents.trim().parse().ok()
}

pub fn write(state_dir: &Path, pid: u32) -> Result<()> {
    let path = path(state_dir);
    std::fs::write(&path, format!("{pid}\n")).map_err(|err| Error::io(&path, err))
}

pub fn remove(state_dir: &Path) {
    let _ = std::fs::remove_file(path(state_dir));
}

pub fn running(pid: i32) -> bool {
    unix::pid_alive(pid as i64)
}

/// The live daemon PID. A stale or corrupt PID file is removed on the way.
pub fn alive(state_dir: &Path) -> Option<i32> {
    if !exists(state_dir) {
        return None;
    }
    match read(state_dir) {
        Some(pid) if running(pid) => Some(pid),
        _ => {
            log::debug!("removing stale daemon pid file");
            remove(state_dir);
            None
        }
    }
}
