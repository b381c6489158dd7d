//! Process lifecycle engine: spawn, stop, restart, status.
//!
//! Children are detached: they run in their own session, read stdin from the
//! null device, and write stdout/stderr to their log sinks, so they survive
//! the exit of the control tool and miss signals delivered to it.

pub mod unix;

use crate::{
    env,
    error::{Error, Result},
    logs,
    registry::{Env, ProcessRecord, Registry, Selector},
};

use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::Utc;
#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// How long each escalation step waits for the target to exit.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Permitted drift between the recorded spawn time and the observed process
/// start time before the PID is presumed recycled.
const START_TIME_TOLERANCE_SECS: i64 = 1;

#[derive(Clone, Debug, Default)]
pub struct SpawnRequest {
    pub command: String,
    pub name: Option<String>,
    pub cwd: Option<PathBuf>,
    pub restart: bool,
    pub group: Option<String>,
    pub env: Env,
    pub env_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyDead,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessStatus {
    pub alive: bool,
    pub cpu_percent: f64,
    pub memory: u64,
    pub uptime_secs: i64,
}

/// Spawns a detached child and records it. The whole operation is one
/// registry transaction: a failed spawn leaves no record behind.
pub fn spawn(registry: &Registry, request: SpawnRequest) -> Result<ProcessRecord> {
    if request.command.trim().is_empty() {
        return Err(Error::InvalidInput("command must not be empty".into()));
    }

    let name = match &request.name {
        Some(name) if name.is_empty() => {
            return Err(Error::InvalidInput("process name must not be empty".into()))
        }
        Some(name) => name.clone(),
        None => derive_name(&request.command)?,
    };

    let cwd = match &request.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir().map_err(|err| Error::io(".", err))?,
    };

    let state_dir = registry.state_dir().to_path_buf();

    registry.transact(|catalog| {
        // Fail before the child exists: a rejected record must not leave an
        // orphan running.
        if catalog.processes.iter().any(|record| record.name == name) {
            return Err(Error::conflict("process", &name));
        }
        let stem = logs::log_stem(&name);
        if let Some(clash) = catalog
            .processes
            .iter()
            .find(|record| logs::log_stem(&record.name) == stem)
        {
            return Err(Error::conflict("log path", &clash.name));
        }

        let group_record = match &request.group {
            Some(group) => Some(
                catalog
                    .group(group)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(group.clone()))?,
            ),
            None => None,
        };

        let overlay = env::build_overlay(
            group_record.as_ref(),
            &request.env,
            request.env_file.as_deref(),
        )?;
        let environment = env::effective_environment(&state_dir, &overlay);

        let (stdout, stderr) = logs::open_sinks(&state_dir, &name)?;
        let (stdout_path, stderr_path) = logs::log_paths(&state_dir, &name);

        let pid = launch(&request.command, &cwd, &environment, stdout, stderr)?;

        let id = catalog.insert_process(ProcessRecord {
            id: 0,
            pid,
            name: name.clone(),
            command: request.command.clone(),
            cwd: cwd.clone(),
            restart: request.restart,
            started_at: Utc::now(),
            stdout_path,
            stderr_path,
            env: request.env.clone(),
            group: None,
            env_file: request.env_file.clone(),
        })?;
        catalog.assign_group(id, request.group.clone())?;

        Ok(catalog.process(id).cloned().expect("record just inserted"))
    })
}

/// Stops a process with signal escalation. The record is left in place with
/// its now-stale PID; removal is `remove`/`clean`'s job.
pub fn stop(registry: &Registry, selector: &Selector, force: bool) -> Result<(ProcessRecord, StopOutcome)> {
    let record = registry.find_process(selector)?;
    let outcome = stop_pid(record.pid, force)?;
    Ok((record, outcome))
}

/// Signal policy: SIGTERM, wait up to 5 s, then SIGKILL and wait again.
/// `force` skips straight to SIGKILL.
pub fn stop_pid(pid: i64, force: bool) -> Result<StopOutcome> {
    if !unix::pid_alive(pid) {
        return Ok(StopOutcome::AlreadyDead);
    }

    if !force {
        send_signal(pid, Signal::SIGTERM)?;
        if unix::wait_for_exit(pid, STOP_TIMEOUT) {
            return Ok(StopOutcome::Stopped);
        }
        log::warn!("pid {pid} ignored SIGTERM for {STOP_TIMEOUT:?}, escalating to SIGKILL");
    }

    send_signal(pid, Signal::SIGKILL)?;
    if unix::wait_for_exit(pid, STOP_TIMEOUT) {
        Ok(StopOutcome::Stopped)
    } else {
        Err(Error::StopFailed(format!(
            "pid {pid} survived SIGKILL for {STOP_TIMEOUT:?}"
        )))
    }
}

/// Stop followed by an in-place respawn: same id and name, new pid and
/// started_at.
pub fn restart(registry: &Registry, selector: &Selector) -> Result<ProcessRecord> {
    let record = registry.find_process(selector)?;
    stop_pid(record.pid, false)?;
    respawn(registry, record.id)
}

/// Respawns a record from its stored command, cwd, env and group, updating
/// `pid` and `started_at` in place. The group overlay is resolved against
/// the group's current env, so group changes take effect at respawn time.
pub fn respawn(registry: &Registry, id: u64) -> Result<ProcessRecord> {
    let state_dir = registry.state_dir().to_path_buf();

    registry.transact(|catalog| {
        let record = catalog
            .process(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let group_record = record
            .group
            .as_deref()
            .and_then(|name| catalog.group(name))
            .cloned();
        let overlay = env::build_overlay(
            group_record.as_ref(),
            &record.env,
            record.env_file.as_deref(),
        )?;

        let environment = env::effective_environment(&state_dir, &overlay);
        let (stdout, stderr) = logs::open_sinks(&state_dir, &record.name)?;
        let pid = launch(&record.command, &record.cwd, &environment, stdout, stderr)?;

        let entry = catalog.process_mut(id).expect("record just read");
        entry.pid = pid;
        entry.started_at = Utc::now();
        Ok(entry.clone())
    })
}

/// Existence check with identity verification. Kernel presence alone is not
/// enough: after the supervisor has been away the OS may have recycled the
/// PID, so the observed start time must sit within a second of the recorded
/// spawn time, or the command line must still match.
pub fn record_alive(record: &ProcessRecord) -> bool {
    if !unix::pid_alive(record.pid) {
        return false;
    }

    match unix::process_start_time(record.pid) {
        Some(observed) => {
            let drift = observed as i64 - record.started_at.timestamp();
            drift.abs() <= START_TIME_TOLERANCE_SECS || cmdline_matches(record)
        }
        None => cmdline_matches(record),
    }
}

fn cmdline_matches(record: &ProcessRecord) -> bool {
    let Some(cmdline) = unix::process_cmdline(record.pid) else {
        return false;
    };
    let program = match shell_words::split(&record.command) {
        Ok(parts) if !parts.is_empty() => parts[0].clone(),
        _ => record.command.clone(),
    };
    !program.is_empty() && cmdline.contains(&program)
}

/// Runtime status for display. Dead PIDs report existence false and zero
/// metrics.
pub fn probe(record: &ProcessRecord) -> ProcessStatus {
    if !record_alive(record) {
        return ProcessStatus::default();
    }

    let metrics = unix::sample_metrics(record.pid).unwrap_or_default();
    ProcessStatus {
        alive: true,
        cpu_percent: metrics.cpu_percent,
        memory: metrics.memory,
        uptime_secs: (Utc::now() - record.started_at).num_seconds().max(0),
    }
}

/// Removes records whose PID is dead and whose restart flag is off. Records
/// with `restart = true` are never cleaned; the supervisor will respawn them.
pub fn clean(registry: &Registry) -> Result<Vec<ProcessRecord>> {
    registry.transact(|catalog| {
        let dead: Vec<ProcessRecord> = catalog
            .processes
            .iter()
            .filter(|record| !record.restart && !record_alive(record))
            .cloned()
            .collect();

        let dead_ids: Vec<u64> = dead.iter().map(|record| record.id).collect();
        for group in &mut catalog.groups {
            group.members.retain(|id| !dead_ids.contains(id));
        }
        catalog.processes.retain(|record| !dead_ids.contains(&record.id));

        Ok(dead)
    })
}

/// Default name: basename of the command's program token.
fn derive_name(command: &str) -> Result<String> {
    let parts = shell_words::split(command)
        .map_err(|err| Error::InvalidInput(format!("malformed command: {err}")))?;
    let program = parts
        .first()
        .ok_or_else(|| Error::InvalidInput("command must not be empty".into()))?;
    let name = program.rsplit('/').next().unwrap_or(program).to_string();
    if name.is_empty() {
        return Err(Error::InvalidInput("cannot derive a name from command".into()));
    }
    Ok(name)
}

/// Commands with shell operators go through `sh -c`; plain commands are
/// split POSIX-style and executed directly.
fn command_needs_shell(command: &str) -> bool {
    command
        .chars()
        .any(|c| matches!(c, '|' | '&' | ';' | '<' | '>' | '(' | ')' | '$' | '`' | '*' | '?' | '~'))
}

fn launch(
    command: &str,
    cwd: &std::path::Path,
    environment: &Env,
    stdout: File,
    stderr: File,
) -> Result<i64> {
    let mut cmd = if command_needs_shell(command) {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    } else {
        match shell_words::split(command) {
            Ok(parts) if !parts.is_empty() => {
                let mut cmd = Command::new(&parts[0]);
                cmd.args(&parts[1..]);
                cmd
            }
            _ => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                cmd
            }
        }
    };

    cmd.current_dir(cwd)
        .env_clear()
        .envs(environment)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    // Detach: the child leads its own session so signals aimed at the
    // control tool never reach it.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let child = cmd.spawn().map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => {
            Error::SpawnFailed(format!("command not found: {command}"))
        }
        std::io::ErrorKind::PermissionDenied => {
            Error::SpawnFailed(format!("permission denied: {command}"))
        }
        _ => Error::SpawnFailed(format!("{command}: {err}")),
    })?;

    Ok(child.id() as i64)
}

#[cfg(unix)]
fn send_signal(pid: i64, signal: Signal) -> Result<()> {
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(err) => Err(Error::StopFailed(format!(
            "cannot deliver {signal} to pid {pid}: {err}"
        ))),
    }
}
