//! In-memory catalog model and the single mutation entry point.
//!
//! Every mutating operation runs as a transaction: take the in-process lock,
//! take the cross-process file lock, reload the catalog from disk, apply the
//! change, validate the invariants, and flush through the store. A failed
//! flush discards the change, so observers never see a half-applied mutation.

use crate::{
    error::{Error, Result},
    logs,
    store::Store,
};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Env = BTreeMap<String, String>;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: u64,
    pub pid: i64,
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    pub restart: bool,
    pub started_at: DateTime<Utc>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    #[serde(default)]
    pub env: Env,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub env_file: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub env: Env,
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    #[serde(default)]
    pub members: BTreeSet<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    pub port: u16,
    pub name: String,
    pub allocated_at: DateTime<Utc>,
}

/// The full persisted document. Unknown top-level fields written by newer
/// versions are carried through `extra` so a round-trip does not drop them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub version: u32,
    pub next_id: u64,
    #[serde(default)]
    pub processes: Vec<ProcessRecord>,
    #[serde(default)]
    pub groups: Vec<GroupRecord>,
    #[serde(default)]
    pub ports: Vec<PortRecord>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog {
            version: SCHEMA_VERSION,
            next_id: 1,
            processes: Vec::new(),
            groups: Vec::new(),
            ports: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A record address: a decimal ID or an exact name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    Id(u64),
    Name(String),
}

impl FromStr for Selector {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.parse::<u64>() {
            Ok(id) => Ok(Selector::Id(id)),
            Err(_) => Ok(Selector::Name(raw.to_string())),
        }
    }
}

impl From<&str> for Selector {
    fn from(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| Selector::Name(raw.into()))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Id(id) => write!(f, "{id}"),
            Selector::Name(name) => write!(f, "{name}"),
        }
    }
}

impl Catalog {
    pub fn process(&self, id: u64) -> Option<&ProcessRecord> {
        self.processes.iter().find(|record| record.id == id)
    }

    pub fn process_mut(&mut self, id: u64) -> Option<&mut ProcessRecord> {
        self.processes.iter_mut().find(|record| record.id == id)
    }

    pub fn find(&self, selector: &Selector) -> Option<&ProcessRecord> {
        match selector {
            Selector::Id(id) => self.process(*id),
            Selector::Name(name) => self.processes.iter().find(|record| &record.name == name),
        }
    }

    pub fn group(&self, name: &str) -> Option<&GroupRecord> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut GroupRecord> {
        self.groups.iter_mut().find(|group| group.name == name)
    }

    pub fn port(&self, port: u16) -> Option<&PortRecord> {
        self.ports.iter().find(|record| record.port == port)
    }

    pub fn assign_next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Inserts a new process record: rejects name clashes, assigns the next
    /// ID, and defaults `group` to null (membership is a separate step).
    pub fn insert_process(&mut self, mut record: ProcessRecord) -> Result<u64> {
        if record.name.is_empty() {
            return Err(Error::InvalidInput("process name must not be empty".into()));
        }
        if let Some(existing) = self.processes.iter().find(|entry| entry.name == record.name) {
            return Err(Error::conflict("process", &existing.name));
        }
        let stem = logs::log_stem(&record.name);
        if let Some(clash) = self
            .processes
            .iter()
            .find(|entry| logs::log_stem(&entry.name) == stem)
        {
            return Err(Error::conflict("log path", &clash.name));
        }

        record.id = self.assign_next_id();
        record.group = None;
        let id = record.id;
        self.processes.push(record);
        Ok(id)
    }

    /// Move a process in or out of a group, keeping both sides of the
    /// membership relation in step.
    pub fn assign_group(&mut self, id: u64, group: Option<String>) -> Result<()> {
        if self.process(id).is_none() {
            return Err(Error::NotFound(id.to_string()));
        }
        if let Some(name) = &group {
            if self.group(name).is_none() {
                return Err(Error::NotFound(name.clone()));
            }
        }

        for entry in &mut self.groups {
            entry.members.remove(&id);
        }
        if let Some(name) = &group {
            if let Some(entry) = self.group_mut(name) {
                entry.members.insert(id);
            }
        }
        if let Some(record) = self.process_mut(id) {
            record.group = group;
        }
        Ok(())
    }

    /// Checks the structural invariants that must hold after every commit.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut stems = HashSet::new();
        let mut ids = HashSet::new();

        for record in &self.processes {
            if record.name.is_empty() {
                return Err(Error::InvalidInput("process name must not be empty".into()));
            }
            if !names.insert(record.name.as_str()) {
                return Err(Error::conflict("process", &record.name));
            }
            // Distinct names can sanitize to the same log stem.
            if !stems.insert(logs::log_stem(&record.name)) {
                return Err(Error::conflict("log path", &record.name));
            }
            if !ids.insert(record.id) {
                return Err(Error::conflict("process id", record.id.to_string()));
            }
            if record.id >= self.next_id {
                return Err(Error::InvalidInput(format!(
                    "process id {} is not below the next-id counter {}",
                    record.id, self.next_id
                )));
            }
            if let Some(group) = &record.group {
                if self.group(group).is_none() {
                    return Err(Error::InvalidInput(format!(
                        "process '{}' references missing group '{}'",
                        record.name, group
                    )));
                }
            }
        }

        let mut group_names = HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(Error::InvalidInput("group name must not be empty".into()));
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(Error::conflict("group", &group.name));
            }
            let assigned: BTreeSet<u64> = self
                .processes
                .iter()
                .filter(|record| record.group.as_deref() == Some(group.name.as_str()))
                .map(|record| record.id)
                .collect();
            if assigned != group.members {
                return Err(Error::InvalidInput(format!(
                    "group '{}' membership is out of sync",
                    group.name
                )));
            }
        }

        let mut ports = HashSet::new();
        for record in &self.ports {
            if record.port == 0 {
                return Err(Error::InvalidInput("port must be in 1..=65535".into()));
            }
            if !ports.insert(record.port) {
                return Err(Error::conflict("port", record.port.to_string()));
            }
        }

        Ok(())
    }
}

/// Fields of a process record that `update_process` may change.
#[derive(Clone, Debug, Default)]
pub struct ProcessPatch {
    pub pid: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart: Option<bool>,
    pub group: Option<Option<String>>,
    pub env: Option<Env>,
    pub cwd: Option<PathBuf>,
}

pub struct Registry {
    state_dir: PathBuf,
    store: Store,
    serial: Mutex<()>,
}

impl Registry {
    /// Opens the registry rooted at `state_dir`, creating the directory
    /// layout on first use.
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        logs::ensure_layout(&state_dir)?;

        Ok(Registry {
            store: Store::new(&state_dir),
            state_dir,
            serial: Mutex::new(()),
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// A deep copy of the current committed catalog, safe to iterate without
    /// holding any lock.
    pub fn snapshot(&self) -> Result<Catalog> {
        self.store.load()
    }

    /// Runs `apply` as one atomic load → mutate → validate → save cycle.
    /// Other writers (in this process or another) are held out for the whole
    /// cycle; on any error the on-disk catalog is left untouched.
    pub fn transact<T>(&self, apply: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        let _serial = self.serial.lock().unwrap_or_else(|err| err.into_inner());
        let _flock = self.store.lock_exclusive()?;

        let mut catalog = self.store.load()?;
        let output = apply(&mut catalog)?;
        catalog.validate()?;
        self.store.save(&catalog)?;

        Ok(output)
    }

    /// Inserts a record built by the caller, assigning its ID. The process
    /// engine's spawn does this inline so the child and its record commit in
    /// one transaction.
    pub fn add_process(&self, record: ProcessRecord) -> Result<ProcessRecord> {
        self.transact(|catalog| {
            let id = catalog.insert_process(record.clone())?;
            Ok(catalog.process(id).cloned().expect("record just inserted"))
        })
    }

    pub fn find_process(&self, selector: &Selector) -> Result<ProcessRecord> {
        self.snapshot()?
            .find(selector)
            .cloned()
            .ok_or_else(|| Error::NotFound(selector.to_string()))
    }

    pub fn update_process(&self, id: u64, patch: ProcessPatch) -> Result<ProcessRecord> {
        self.transact(|catalog| {
            if let Some(group) = patch.group.clone() {
                catalog.assign_group(id, group)?;
            }

            let record = catalog
                .process_mut(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;

            if let Some(pid) = patch.pid {
                record.pid = pid;
            }
            if let Some(started_at) = patch.started_at {
                record.started_at = started_at;
            }
            if let Some(restart) = patch.restart {
                record.restart = restart;
            }
            if let Some(env) = patch.env.clone() {
                record.env = env;
            }
            if let Some(cwd) = patch.cwd.clone() {
                record.cwd = cwd;
            }

            Ok(record.clone())
        })
    }

    pub fn remove_process(&self, selector: &Selector) -> Result<ProcessRecord> {
        self.transact(|catalog| {
            let record = catalog
                .find(selector)
                .cloned()
                .ok_or_else(|| Error::NotFound(selector.to_string()))?;

            for group in &mut catalog.groups {
                group.members.remove(&record.id);
            }
            catalog.processes.retain(|entry| entry.id != record.id);
            Ok(record)
        })
    }

    pub fn create_group(&self, name: &str, env: Env, env_file: Option<PathBuf>) -> Result<GroupRecord> {
        if name.is_empty() {
            return Err(Error::InvalidInput("group name must not be empty".into()));
        }

        self.transact(|catalog| {
            if catalog.group(name).is_some() {
                return Err(Error::conflict("group", name));
            }

            let group = GroupRecord {
                name: name.to_string(),
                created_at: Utc::now(),
                env,
                env_file,
                members: BTreeSet::new(),
            };
            catalog.groups.push(group.clone());
            Ok(group)
        })
    }

    /// Deletes the group and detaches its members. Stopping members first is
    /// the group manager's concern, not the registry's.
    pub fn delete_group(&self, name: &str) -> Result<GroupRecord> {
        self.transact(|catalog| {
            let group = catalog
                .group(name)
                .cloned()
                .ok_or_else(|| Error::NotFound(name.to_string()))?;

            for record in &mut catalog.processes {
                if record.group.as_deref() == Some(name) {
                    record.group = None;
                }
            }
            catalog.groups.retain(|entry| entry.name != name);
            Ok(group)
        })
    }
}
