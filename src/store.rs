//! Crash-safe persistence for the catalog.
//!
//! The catalog is one JSON document at `<state_dir>/state.json`. Saves write
//! the serialized form to a sibling `state.json.tmp`, fsync it, then rename
//! over the canonical path, so a reader always observes either the previous
//! or the new committed image. Writers across processes serialize on an
//! advisory lock held for the whole load → mutate → save cycle; the lock
//! lives in a sibling file because the rename replaces the store's inode.

use crate::error::{Error, Result};
use crate::registry::{Catalog, SCHEMA_VERSION};

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

pub const STATE_FILE: &str = "state.json";
pub const LOCK_FILE: &str = "state.lock";

pub struct Store {
    path: PathBuf,
    temp_path: PathBuf,
    lock_path: PathBuf,
}

/// Held for the duration of a write cycle; unlocks on drop.
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl Store {
    pub fn new(state_dir: &Path) -> Self {
        Store {
            path: state_dir.join(STATE_FILE),
            temp_path: state_dir.join(format!("{STATE_FILE}.tmp")),
            lock_path: state_dir.join(LOCK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the cross-process writer lock.
    pub fn lock_exclusive(&self) -> Result<StoreLock> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|err| Error::io(&self.lock_path, err))?;
        file.lock_exclusive()
            .map_err(|err| Error::io(&self.lock_path, err))?;
        Ok(StoreLock { file })
    }

    /// Loads the committed catalog. A missing file is an empty catalog; a
    /// file that does not parse is fatal and reports path and position.
    pub fn load(&self) -> Result<Catalog> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Catalog::default());
            }
            Err(err) => return Err(Error::io(&self.path, err)),
        };

        serde_json::from_str(&contents).map_err(|err| Error::CorruptState {
            path: self.path.clone(),
            detail: format!("{} at line {} column {}", err, err.line(), err.column()),
        })
    }

    /// Commits the catalog atomically. Refuses to overwrite a document
    /// written by a newer schema than this build understands.
    pub fn save(&self, catalog: &Catalog) -> Result<()> {
        if catalog.version > SCHEMA_VERSION {
            return Err(Error::InvalidInput(format!(
                "state file uses schema version {} but this build understands {}; refusing to save",
                catalog.version, SCHEMA_VERSION
            )));
        }

        let encoded = serde_json::to_string_pretty(catalog).map_err(|err| Error::CorruptState {
            path: self.path.clone(),
            detail: format!("cannot encode catalog: {err}"),
        })?;

        let mut temp = File::create(&self.temp_path).map_err(|err| Error::io(&self.temp_path, err))?;
        temp.write_all(encoded.as_bytes())
            .map_err(|err| Error::io(&self.temp_path, err))?;
        temp.sync_all().map_err(|err| Error::io(&self.temp_path, err))?;
        drop(temp);

        fs::rename(&self.temp_path, &self.path).map_err(|err| Error::io(&self.path, err))?;
        Ok(())
    }
}
