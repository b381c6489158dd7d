//! Environment layering for spawns.
//!
//! Merge order, lowest to highest precedence: ambient environment, global
//! env files (`<state_dir>/.env`, then `./.env`), then the stored overlay.
//! The overlay itself is built at spawn time from the group's env, the
//! group's env file, the per-process env, and the per-process env file.

use crate::error::{Error, Result};
use crate::registry::{Env, GroupRecord};

use std::path::{Path, PathBuf};

/// Reads `KEY=VALUE` lines from a dotenv-style file. `#` comments and blank
/// lines are ignored by the parser.
pub fn load_env_file(path: &Path) -> Result<Env> {
    if !path.is_file() {
        return Err(Error::InvalidInput(format!(
            "environment file not found: {}",
            path.display()
        )));
    }

    let iter = dotenvy::from_path_iter(path)
        .map_err(|err| Error::InvalidInput(format!("cannot read {}: {err}", path.display())))?;

    let mut env = Env::new();
    for item in iter {
        let (key, value) = item
            .map_err(|err| Error::InvalidInput(format!("cannot parse {}: {err}", path.display())))?;
        env.insert(key, value);
    }
    Ok(env)
}

/// Global env files consulted for every spawn, in precedence order.
pub fn global_env_files(state_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let sentinel_env = state_dir.join(".env");
    if sentinel_env.is_file() {
        files.push(sentinel_env);
    }
    if let Ok(cwd) = std::env::current_dir() {
        let cwd_env = cwd.join(".env");
        if cwd_env.is_file() {
            files.push(cwd_env);
        }
    }

    files
}

/// Later maps win on key collisions.
pub fn merge<'a>(layers: impl IntoIterator<Item = &'a Env>) -> Env {
    let mut merged = Env::new();
    for layer in layers {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Builds the overlay stored on a `ProcessRecord`: group layers below
/// process layers, files above their inline maps. An unreadable group env
/// file is skipped (the group may have been created on another checkout); an
/// unreadable per-process file is an error because the caller named it.
pub fn build_overlay(
    group: Option<&GroupRecord>,
    process_env: &Env,
    process_env_file: Option<&Path>,
) -> Result<Env> {
    let mut layers: Vec<Env> = Vec::new();

    if let Some(group) = group {
        layers.push(group.env.clone());
        if let Some(path) = &group.env_file {
            match load_env_file(path) {
                Ok(env) => layers.push(env),
                Err(err) => log::warn!("skipping group env file: {err}"),
            }
        }
    }

    layers.push(process_env.clone());
    if let Some(path) = process_env_file {
        layers.push(load_env_file(path)?);
    }

    Ok(merge(layers.iter()))
}

/// The complete environment handed to a child: ambient, then global env
/// files, then the overlay.
pub fn effective_environment(state_dir: &Path, overlay: &Env) -> Env {
    let mut env: Env = std::env::vars().collect();

    for path in global_env_files(state_dir) {
        match load_env_file(&path) {
            Ok(layer) => env.extend(layer),
            Err(err) => log::warn!("skipping global env file: {err}"),
        }
    }

    env.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> Env {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn group(envmap: Env, env_file: Option<PathBuf>) -> GroupRecord {
        GroupRecord {
            name: "g".into(),
            created_at: Utc::now(),
            env: envmap,
            env_file,
            members: BTreeSet::new(),
        }
    }

    #[test]
    fn test_merge_later_layers_win() {
        let low = env(&[("A", "1"), ("B", "1")]);
        let high = env(&[("B", "2"), ("C", "2")]);
        assert_eq!(merge([&low, &high]), env(&[("A", "1"), ("B", "2"), ("C", "2")]));
    }

    #[test]
    fn test_load_env_file_skips_comments_and_blanks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vars.env");
        std::fs::write(&path, "# comment\nFOO=bar\n\nBAZ=qux quux\n").unwrap();

        let loaded = load_env_file(&path).unwrap();
        assert_eq!(loaded, env(&[("FOO", "bar"), ("BAZ", "qux quux")]));
    }

    #[test]
    fn test_load_env_file_missing_is_invalid_input() {
        assert!(matches!(
            load_env_file(Path::new("/nonexistent/.env")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_overlay_process_env_beats_group_env() {
        let g = group(env(&[("X", "group"), ("ONLY_GROUP", "1")]), None);
        let overlay = build_overlay(Some(&g), &env(&[("X", "process")]), None).unwrap();

        assert_eq!(overlay.get("X").map(String::as_str), Some("process"));
        assert_eq!(overlay.get("ONLY_GROUP").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_overlay_env_file_beats_inline_env() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proc.env");
        std::fs::write(&path, "X=file\n").unwrap();

        let overlay = build_overlay(None, &env(&[("X", "inline")]), Some(&path)).unwrap();
        assert_eq!(overlay.get("X").map(String::as_str), Some("file"));
    }

    #[test]
    fn test_overlay_missing_process_file_errors() {
        let result = build_overlay(None, &Env::new(), Some(Path::new("/nope/.env")));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_effective_environment_layers_over_ambient() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "SENTINEL_TEST_GLOBAL=yes\n").unwrap();

        let merged = effective_environment(dir.path(), &env(&[("SENTINEL_TEST_OVERLAY", "1")]));
        assert_eq!(
            merged.get("SENTINEL_TEST_GLOBAL").map(String::as_str),
            Some("yes")
        );
        assert_eq!(
            merged.get("SENTINEL_TEST_OVERLAY").map(String::as_str),
            Some("1")
        );
        // Ambient variables survive underneath.
        assert!(merged.contains_key("PATH"));
    }
}
