//! OS-level process probes: liveness, identity, and resource metrics.

use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Liveness test for a PID. Zombies count as dead: the kernel still lists
/// them, but they will never run again and the supervisor should treat the
/// slot as free for restart.
///
/// PID <= 0 is never alive; 0 and negative values address process groups,
/// not individual processes.
pub fn pid_alive(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }

    // kill(pid, 0) probes existence without delivering a signal. EPERM means
    // the process exists but belongs to someone else.
    let result = unsafe { libc::kill(pid as i32, 0) };
    if result != 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        return errno == libc::EPERM;
    }

    !is_zombie(pid)
}

#[cfg(target_os = "linux")]
pub fn is_zombie(pid: i64) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // /proc/<pid>/stat: pid (comm) state ... — comm may contain spaces, so
    // the state flag is the first field after the closing parenthesis.
    let Some(end) = stat.rfind(')') else {
        return false;
    };
    stat[end + 1..]
        .split_whitespace()
        .next()
        .map(|state| state == "Z")
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
pub fn is_zombie(pid: i64) -> bool {
    use sysinfo::ProcessStatus;

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[Pid::from_u32(pid as u32)]),
        true,
        ProcessRefreshKind::everything(),
    );
    system
        .process(Pid::from_u32(pid as u32))
        .map(|process| matches!(process.status(), ProcessStatus::Zombie))
        .unwrap_or(false)
}

/// Start time of the process in seconds since the epoch, if the OS still
/// knows it. The backbone of recycled-PID detection.
pub fn process_start_time(pid: i64) -> Option<u64> {
    if pid <= 0 {
        return None;
    }

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[Pid::from_u32(pid as u32)]),
        true,
        ProcessRefreshKind::everything(),
    );
    system
        .process(Pid::from_u32(pid as u32))
        .map(|process| process.start_time())
}

#[cfg(target_os = "linux")]
pub fn process_cmdline(pid: i64) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    if raw.is_empty() {
        return None;
    }
    let joined = raw
        .split(|byte| *byte == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

#[cfg(not(target_os = "linux"))]
pub fn process_cmdline(pid: i64) -> Option<String> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[Pid::from_u32(pid as u32)]),
        true,
        ProcessRefreshKind::everything(),
    );
    let process = system.process(Pid::from_u32(pid as u32))?;
    let joined = process
        .cmd()
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Metrics {
    pub cpu_percent: f64,
    pub memory: u64,
}

/// One CPU/memory sample for a PID. CPU percent needs two observations, so
/// this blocks for sysinfo's minimum sampling interval (a few hundred
/// milliseconds at most).
pub fn sample_metrics(pid: i64) -> Option<Metrics> {
    if pid <= 0 {
        return None;
    }
    let target = Pid::from_u32(pid as u32);

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::everything(),
    );
    system.process(target)?;

    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::everything(),
    );

    let process = system.process(target)?;
    Some(Metrics {
        cpu_percent: process.cpu_usage() as f64,
        memory: process.memory(),
    })
}

/// Metrics for many PIDs in one pass, paying the CPU sampling interval once
/// instead of once per process. Dead PIDs are absent from the result.
pub fn sample_metrics_many(pids: &[i64]) -> std::collections::HashMap<i64, Metrics> {
    let targets: Vec<Pid> = pids
        .iter()
        .filter(|pid| **pid > 0)
        .map(|pid| Pid::from_u32(*pid as u32))
        .collect();
    if targets.is_empty() {
        return std::collections::HashMap::new();
    }

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&targets),
        true,
        ProcessRefreshKind::everything(),
    );
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&targets),
        true,
        ProcessRefreshKind::everything(),
    );

    targets
        .iter()
        .filter_map(|target| {
            system.process(*target).map(|process| {
                (
                    target.as_u32() as i64,
                    Metrics {
                        cpu_percent: process.cpu_usage() as f64,
                        memory: process.memory(),
                    },
                )
            })
        })
        .collect()
}

/// Reaps any exited direct children without blocking. Long-lived callers
/// (the daemon) respawn children; without this their corpses would sit in
/// the process table as zombies until the daemon exits.
#[cfg(unix)]
pub fn reap_children() {
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid as NixPid;

    loop {
        match waitpid(NixPid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                log::debug!("reaped child {pid} (exit code {code})");
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                log::debug!("reaped child {pid} (signal {signal})");
            }
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

#[cfg(not(unix))]
pub fn reap_children() {}

/// Polls until the PID is gone or the deadline passes. Returns true when the
/// process exited within the window.
pub fn wait_for_exit(pid: i64, timeout: Duration) -> bool {
    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    let deadline = std::time::Instant::now() + timeout;
    loop {
        reap_children();
        if !pid_alive(pid) {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_pid_is_alive() {
        assert!(pid_alive(std::process::id() as i64));
    }

    #[test]
    fn test_invalid_pids_are_dead() {
        assert!(!pid_alive(0));
        assert!(!pid_alive(-1));
        // Far above any default pid_max.
        assert!(!pid_alive(i32::MAX as i64 - 10));
    }

    #[test]
    fn test_own_start_time_is_known() {
        let start = process_start_time(std::process::id() as i64);
        assert!(start.is_some());
        assert!(start.unwrap() > 0);
    }

    #[test]
    fn test_own_cmdline_is_known() {
        let cmdline = process_cmdline(std::process::id() as i64);
        assert!(cmdline.is_some());
        assert!(!cmdline.unwrap().is_empty());
    }

    #[test]
    fn test_metrics_for_dead_pid_are_none() {
        assert!(sample_metrics(i32::MAX as i64 - 10).is_none());
        assert!(sample_metrics(0).is_none());
    }

    #[test]
    fn test_wait_for_exit_on_dead_pid_returns_immediately() {
        let begun = std::time::Instant::now();
        assert!(wait_for_exit(i32::MAX as i64 - 10, Duration::from_secs(5)));
        assert!(begun.elapsed() < Duration::from_secs(1));
    }
}
