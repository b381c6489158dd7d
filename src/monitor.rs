//! Restart supervisor: finds dead children whose restart flag is set and
//! respawns them in place.
//!
//! The same pass backs two callers: read-heavy CLI commands run it once
//! (lazy, opportunistic restarts), and the daemon runs it on a timer. A
//! respawn failure is recorded and the target keeps its stale PID, so the
//! next sweep retries it.

use crate::{
    error::{Error, Result},
    process,
    registry::{ProcessRecord, Registry, Selector},
};

use std::time::Duration;

/// Default tick of the daemon loop.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// (old pid, refreshed record) per respawned process.
    pub restarted: Vec<(i64, ProcessRecord)>,
    pub failed: Vec<(String, Error)>,
}

impl SweepOutcome {
    pub fn is_quiet(&self) -> bool {
        self.restarted.is_empty() && self.failed.is_empty()
    }
}

/// One pass over every record.
pub fn sweep(registry: &Registry) -> Result<SweepOutcome> {
    process::unix::reap_children();

    let snapshot = registry.snapshot()?;
    let mut outcome = SweepOutcome::default();
    for record in &snapshot.processes {
        visit(registry, record, &mut outcome);
    }
    Ok(outcome)
}

/// Sweeps a single record; used by single-target reads such as `status`.
pub fn sweep_target(registry: &Registry, selector: &Selector) -> Result<SweepOutcome> {
    process::unix::reap_children();

    let record = registry.find_process(selector)?;
    let mut outcome = SweepOutcome::default();
    visit(registry, &record, &mut outcome);
    Ok(outcome)
}

fn visit(registry: &Registry, record: &ProcessRecord, outcome: &mut SweepOutcome) {
    if !record.restart || process::record_alive(record) {
        return;
    }

    match process::respawn(registry, record.id) {
        Ok(refreshed) => {
            log::debug!(
                "respawned '{}' (id={}, old_pid={}, new_pid={})",
                refreshed.name,
                refreshed.id,
                record.pid,
                refreshed.pid
            );
            outcome.restarted.push((record.pid, refreshed));
        }
        Err(err) => {
            log::error!("failed to respawn '{}': {err}", record.name);
            outcome.failed.push((record.name.clone(), err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{self, SpawnRequest};
    use crate::registry::Env;
    use std::time::Instant;
    use tempfile::tempdir;

    fn wait_dead(pid: i64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && process::unix::pid_alive(pid) {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(!process::unix::pid_alive(pid));
    }

    #[test]
    fn test_sweep_respawns_dead_restartable_process() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        let record = process::spawn(
            &registry,
            SpawnRequest {
                command: "sh -c 'exit 0'".into(),
                name: Some("r1".into()),
                restart: true,
                ..Default::default()
            },
        )
        .unwrap();

        // Respawn it three times; identity must be stable throughout.
        let mut previous = record.clone();
        for _ in 0..3 {
            wait_dead(previous.pid);

            let outcome = sweep(&registry).unwrap();
            assert_eq!(outcome.restarted.len(), 1);
            assert!(outcome.failed.is_empty());

            let (old_pid, refreshed) = &outcome.restarted[0];
            assert_eq!(*old_pid, previous.pid);
            assert_eq!(refreshed.id, record.id);
            assert_eq!(refreshed.name, "r1");
            assert!(refreshed.pid != previous.pid || refreshed.started_at > previous.started_at);
            assert!(refreshed.started_at >= previous.started_at);
            previous = refreshed.clone();
        }
    }

    #[test]
    fn test_sweep_ignores_live_and_non_restart_records() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        let live = process::spawn(
            &registry,
            SpawnRequest {
                command: "sleep 60".into(),
                name: Some("live".into()),
                restart: true,
                ..Default::default()
            },
        )
        .unwrap();
        let plain = process::spawn(
            &registry,
            SpawnRequest {
                command: "true".into(),
                name: Some("plain".into()),
                ..Default::default()
            },
        )
        .unwrap();
        wait_dead(plain.pid);

        let outcome = sweep(&registry).unwrap();
        assert!(outcome.is_quiet());

        // The dead non-restart record is sweep-invisible but still present.
        let catalog = registry.snapshot().unwrap();
        assert!(catalog.process(plain.id).is_some());
        assert_eq!(catalog.process(live.id).unwrap().pid, live.pid);

        process::stop_pid(live.pid, true).unwrap();
    }

    #[test]
    fn test_sweep_failure_keeps_stale_pid_for_retry() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        let record = process::spawn(
            &registry,
            SpawnRequest {
                command: "true".into(),
                name: Some("wedged".into()),
                restart: true,
                ..Default::default()
            },
        )
        .unwrap();
        wait_dead(record.pid);

        registry
            .transact(|catalog| {
                catalog.process_mut(record.id).unwrap().command = "no-such-binary-beef".into();
                Ok(())
            })
            .unwrap();

        let outcome = sweep(&registry).unwrap();
        assert!(outcome.restarted.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "wedged");

        // Stale pid retained; the next sweep sees the same target again.
        assert_eq!(registry.snapshot().unwrap().process(record.id).unwrap().pid, record.pid);
        let retry = sweep(&registry).unwrap();
        assert_eq!(retry.failed.len(), 1);
    }

    #[test]
    fn test_sweep_target_only_touches_the_selected_record() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        let target = process::spawn(
            &registry,
            SpawnRequest {
                command: "true".into(),
                name: Some("target".into()),
                restart: true,
                ..Default::default()
            },
        )
        .unwrap();
        let bystander = process::spawn(
            &registry,
            SpawnRequest {
                command: "true".into(),
                name: Some("bystander".into()),
                restart: true,
                ..Default::default()
            },
        )
        .unwrap();
        wait_dead(target.pid);
        wait_dead(bystander.pid);

        let outcome = sweep_target(&registry, &Selector::Name("target".into())).unwrap();
        assert_eq!(outcome.restarted.len(), 1);
        assert_eq!(outcome.restarted[0].1.name, "target");

        // The bystander was not respawned by the targeted sweep.
        let catalog = registry.snapshot().unwrap();
        assert_eq!(catalog.process(bystander.id).unwrap().pid, bystander.pid);

        process::stop_pid(catalog.process(target.id).unwrap().pid, true).unwrap();

        assert!(matches!(
            sweep_target(&registry, &Selector::Name("ghost".into())),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_respawned_process_reuses_stored_env() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        let record = process::spawn(
            &registry,
            SpawnRequest {
                command: "printenv SENTINEL_SWEEP_PROBE".into(),
                name: Some("envy".into()),
                restart: true,
                env: Env::from([("SENTINEL_SWEEP_PROBE".to_string(), "ok".to_string())]),
                ..Default::default()
            },
        )
        .unwrap();
        wait_dead(record.pid);

        let before = crate::logs::tail(&record.stdout_path, 100).len();
        let outcome = sweep(&registry).unwrap();
        assert_eq!(outcome.restarted.len(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut lines = Vec::new();
        while Instant::now() < deadline {
            lines = crate::logs::tail(&record.stdout_path, 100);
            if lines.len() > before {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(lines.len() > before);
        assert!(lines.iter().all(|line| line == "ok"));
    }
}
