//! Named process groups: membership plus bulk lifecycle.
//!
//! Bulk operations iterate a snapshot and keep going past per-member
//! failures; the caller gets every outcome in one report.

use crate::{
    error::{BatchReport, Error, Result},
    process,
    registry::{Env, GroupRecord, ProcessRecord, Registry, Selector},
};

use std::path::PathBuf;

pub fn create(
    registry: &Registry,
    name: &str,
    env: Env,
    env_file: Option<PathBuf>,
) -> Result<GroupRecord> {
    if let Some(path) = &env_file {
        if !path.is_file() {
            return Err(Error::InvalidInput(format!(
                "environment file not found: {}",
                path.display()
            )));
        }
    }
    registry.create_group(name, env, env_file)
}

/// Deletes the group. With `stop_members` the members are stopped first;
/// either way their records survive with `group` set back to null.
pub fn delete(
    registry: &Registry,
    name: &str,
    stop_members: bool,
    force: bool,
) -> Result<(GroupRecord, BatchReport)> {
    // Resolve before stopping so an unknown group fails fast.
    let targets = members(registry, name)?;

    let mut report = BatchReport::default();
    if stop_members {
        for (index, record) in targets.iter().enumerate() {
            match process::stop_pid(record.pid, force) {
                Ok(_) => report.push_ok(&record.name),
                Err(err) => report.push_err(index, &record.name, err),
            }
        }
    }

    let group = registry.delete_group(name)?;
    Ok((group, report))
}

pub fn add(registry: &Registry, name: &str, selector: &Selector) -> Result<ProcessRecord> {
    registry.transact(|catalog| {
        if catalog.group(name).is_none() {
            return Err(Error::NotFound(name.to_string()));
        }
        let id = catalog
            .find(selector)
            .map(|record| record.id)
            .ok_or_else(|| Error::NotFound(selector.to_string()))?;

        catalog.assign_group(id, Some(name.to_string()))?;
        Ok(catalog.process(id).cloned().expect("record just updated"))
    })
}

/// Detaches a process from whatever group it is in.
pub fn remove(registry: &Registry, selector: &Selector) -> Result<ProcessRecord> {
    registry.transact(|catalog| {
        let id = catalog
            .find(selector)
            .map(|record| record.id)
            .ok_or_else(|| Error::NotFound(selector.to_string()))?;

        catalog.assign_group(id, None)?;
        Ok(catalog.process(id).cloned().expect("record just updated"))
    })
}

pub fn list(registry: &Registry) -> Result<Vec<GroupRecord>> {
    Ok(registry.snapshot()?.groups)
}

pub fn members(registry: &Registry, name: &str) -> Result<Vec<ProcessRecord>> {
    let catalog = registry.snapshot()?;
    if catalog.group(name).is_none() {
        return Err(Error::NotFound(name.to_string()));
    }
    Ok(catalog
        .processes
        .into_iter()
        .filter(|record| record.group.as_deref() == Some(name))
        .collect())
}

/// Respawns every dead member; live members are left alone.
pub fn start_all(registry: &Registry, name: &str) -> Result<BatchReport> {
    let targets = members(registry, name)?;

    let mut report = BatchReport::default();
    for (index, record) in targets.iter().enumerate() {
        if process::record_alive(record) {
            continue;
        }
        match process::respawn(registry, record.id) {
            Ok(_) => report.push_ok(&record.name),
            Err(err) => report.push_err(index, &record.name, err),
        }
    }
    Ok(report)
}

pub fn stop_all(registry: &Registry, name: &str, force: bool) -> Result<BatchReport> {
    let targets = members(registry, name)?;

    let mut report = BatchReport::default();
    for (index, record) in targets.iter().enumerate() {
        match process::stop_pid(record.pid, force) {
            Ok(_) => report.push_ok(&record.name),
            Err(err) => report.push_err(index, &record.name, err),
        }
    }
    Ok(report)
}

pub fn restart_all(registry: &Registry, name: &str) -> Result<BatchReport> {
    let targets = members(registry, name)?;

    let mut report = BatchReport::default();
    for (index, record) in targets.iter().enumerate() {
        let restarted = process::stop_pid(record.pid, false)
            .and_then(|_| process::respawn(registry, record.id));
        match restarted {
            Ok(_) => report.push_ok(&record.name),
            Err(err) => report.push_err(index, &record.name, err),
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{self, SpawnRequest};
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> Env {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn spawn_member(registry: &Registry, name: &str, group: &str, command: &str) -> ProcessRecord {
        process::spawn(
            registry,
            SpawnRequest {
                command: command.into(),
                name: Some(name.into()),
                group: Some(group.into()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_spawn_into_missing_group_fails() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        let result = process::spawn(
            &registry,
            SpawnRequest {
                command: "sleep 60".into(),
                name: Some("w".into()),
                group: Some("ghost".into()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_group_env_reaches_member_stdout() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        create(&registry, "w", env(&[("SENTINEL_GROUP_PROBE", "1")]), None).unwrap();
        let record = spawn_member(&registry, "w1", "w", "printenv SENTINEL_GROUP_PROBE");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut seen = false;
        while std::time::Instant::now() < deadline && !seen {
            seen = crate::logs::tail(&record.stdout_path, 5)
                .iter()
                .any(|line| line == "1");
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(seen, "group env var never appeared in member stdout");
    }

    #[test]
    fn test_stop_all_and_delete_detaches_members() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        create(&registry, "w", Env::new(), None).unwrap();
        let a = spawn_member(&registry, "w1", "w", "sleep 60");
        let b = spawn_member(&registry, "w2", "w", "sleep 60");

        let report = stop_all(&registry, "w", true).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.succeeded.len(), 2);
        assert!(!process::unix::pid_alive(a.pid));
        assert!(!process::unix::pid_alive(b.pid));

        let (_, stop_report) = delete(&registry, "w", false, false).unwrap();
        assert!(stop_report.succeeded.is_empty());

        let catalog = registry.snapshot().unwrap();
        assert!(catalog.group("w").is_none());
        assert_eq!(catalog.process(a.id).unwrap().group, None);
        assert_eq!(catalog.process(b.id).unwrap().group, None);
    }

    #[test]
    fn test_delete_with_stop_tolerates_dead_members() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        create(&registry, "w", Env::new(), None).unwrap();
        let record = spawn_member(&registry, "w1", "w", "true");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while std::time::Instant::now() < deadline && process::unix::pid_alive(record.pid) {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        let (_, report) = delete(&registry, "w", true, false).unwrap();
        assert!(report.is_clean());
        assert_eq!(registry.snapshot().unwrap().process(record.id).unwrap().group, None);
    }

    #[test]
    fn test_start_all_respawns_only_dead_members() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        create(&registry, "w", Env::new(), None).unwrap();
        let dead = spawn_member(&registry, "dead", "w", "true");
        let live = spawn_member(&registry, "live", "w", "sleep 60");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while std::time::Instant::now() < deadline && process::unix::pid_alive(dead.pid) {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        let report = start_all(&registry, "w").unwrap();
        assert!(report.is_clean());
        assert_eq!(report.succeeded, vec!["dead"]);

        let catalog = registry.snapshot().unwrap();
        let respawned = catalog.process(dead.id).unwrap();
        assert!(process::record_alive(respawned));
        // The live member kept its pid.
        assert_eq!(catalog.process(live.id).unwrap().pid, live.pid);

        process::stop_pid(respawned.pid, true).unwrap();
        process::stop_pid(live.pid, true).unwrap();
    }

    #[test]
    fn test_bulk_failures_are_collected_not_short_circuited() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        create(&registry, "w", Env::new(), None).unwrap();
        let broken = spawn_member(&registry, "broken", "w", "true");
        let fine = spawn_member(&registry, "fine", "w", "true");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while std::time::Instant::now() < deadline
            && (process::unix::pid_alive(broken.pid) || process::unix::pid_alive(fine.pid))
        {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        // Point the first member at a binary that cannot spawn; the second
        // must still be respawned.
        registry
            .transact(|catalog| {
                let record = catalog.process_mut(broken.id).unwrap();
                record.command = "no-such-binary-cafe".into();
                Ok(())
            })
            .unwrap();

        let report = start_all(&registry, "w").unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].target, "broken");
        assert!(matches!(report.failed[0].error, Error::SpawnFailed(_)));
        assert_eq!(report.succeeded, vec!["fine"]);

        let catalog = registry.snapshot().unwrap();
        process::stop_pid(catalog.process(fine.id).unwrap().pid, true).unwrap();
    }

    #[test]
    fn test_add_and_remove_membership() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();

        create(&registry, "w", Env::new(), None).unwrap();
        let record = process::spawn(
            &registry,
            SpawnRequest {
                command: "true".into(),
                name: Some("solo".into()),
                ..Default::default()
            },
        )
        .unwrap();

        add(&registry, "w", &Selector::Id(record.id)).unwrap();
        assert!(registry
            .snapshot()
            .unwrap()
            .group("w")
            .unwrap()
            .members
            .contains(&record.id));

        remove(&registry, &Selector::Name("solo".into())).unwrap();
        let catalog = registry.snapshot().unwrap();
        assert!(catalog.group("w").unwrap().members.is_empty());
        assert_eq!(catalog.process(record.id).unwrap().group, None);

        assert!(matches!(
            add(&registry, "ghost", &Selector::Id(record.id)),
            Err(Error::NotFound(_))
        ));
    }
}
