//! Per-process stdout/stderr sinks under `<state_dir>/logs/`.
//!
//! Sinks are opened in append mode on every spawn so history survives
//! restarts. Paths are a deterministic function of the process name.

use crate::error::{Error, Result};

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const LOGS_DIR: &str = "logs";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
    Both,
}

impl FromStr for Stream {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "stdout" => Ok(Stream::Stdout),
            "stderr" => Ok(Stream::Stderr),
            "both" => Ok(Stream::Both),
            other => Err(Error::InvalidInput(format!(
                "unknown stream '{other}' (expected stdout, stderr or both)"
            ))),
        }
    }
}

impl Stream {
    pub fn wants_stdout(self) -> bool {
        matches!(self, Stream::Stdout | Stream::Both)
    }

    pub fn wants_stderr(self) -> bool {
        matches!(self, Stream::Stderr | Stream::Both)
    }
}

/// Creates the state directory and `logs/` subdirectory with private-user
/// permissions if absent.
pub fn ensure_layout(state_dir: &Path) -> Result<()> {
    let logs_dir = state_dir.join(LOGS_DIR);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        for dir in [state_dir, logs_dir.as_path()] {
            if !dir.exists() {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(dir)
                    .map_err(|err| Error::io(dir, err))?;
            }
        }
    }

    #[cfg(not(unix))]
    std::fs::create_dir_all(&logs_dir).map_err(|err| Error::io(&logs_dir, err))?;

    Ok(())
}

/// Filesystem-safe stem derived from a process name.
pub fn log_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn log_paths(state_dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    let stem = log_stem(name);
    let dir = state_dir.join(LOGS_DIR);
    (
        dir.join(format!("{stem}.stdout.log")),
        dir.join(format!("{stem}.stderr.log")),
    )
}

/// Opens fresh append-mode sinks for a spawn.
pub fn open_sinks(state_dir: &Path, name: &str) -> Result<(File, File)> {
    ensure_layout(state_dir)?;
    let (stdout_path, stderr_path) = log_paths(state_dir, name);

    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&stdout_path)
        .map_err(|err| Error::io(&stdout_path, err))?;
    let stderr = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&stderr_path)
        .map_err(|err| Error::io(&stderr_path, err))?;

    Ok((stdout, stderr))
}

/// Truncates both sinks in place.
pub fn clear(stdout_path: &Path, stderr_path: &Path) -> Result<()> {
    for path in [stdout_path, stderr_path] {
        if path.exists() {
            File::create(path).map_err(|err| Error::io(path, err))?;
        }
    }
    Ok(())
}

/// Last `lines` lines of a file; missing files read as empty.
pub fn tail(path: &Path, lines: usize) -> Vec<String> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };

    let all: Vec<String> = BufReader::new(file)
        .lines()
        .map_while(|line| line.ok())
        .collect();
    let skip = all.len().saturating_sub(lines);
    all.into_iter().skip(skip).collect()
}

/// Incremental reader used by `logs --follow`: remembers the read offset and
/// returns whatever was appended since the previous poll.
pub struct FollowCursor {
    path: PathBuf,
    position: u64,
}

impl FollowCursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let position = std::fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        FollowCursor { path, position }
    }

    pub fn poll(&mut self) -> Vec<String> {
        let Ok(mut file) = File::open(&self.path) else {
            return Vec::new();
        };
        let len = file.metadata().map(|meta| meta.len()).unwrap_or(0);
        if len <= self.position {
            // A truncated sink starts over from the beginning.
            if len < self.position {
                self.position = 0;
            } else {
                return Vec::new();
            }
        }

        if file.seek(SeekFrom::Start(self.position)).is_err() {
            return Vec::new();
        }
        let mut fresh = String::new();
        if file.read_to_string(&mut fresh).is_err() {
            return Vec::new();
        }
        self.position = len;
        fresh.lines().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_log_stem_sanitizes() {
        assert_eq!(log_stem("web"), "web");
        assert_eq!(log_stem("my-app_2"), "my-app_2");
        assert_eq!(log_stem("a b/c.d"), "a_b_c_d");
    }

    #[test]
    fn test_log_paths_are_deterministic() {
        let dir = PathBuf::from("/state");
        let (out, err) = log_paths(&dir, "web");
        assert_eq!(out, dir.join("logs/web.stdout.log"));
        assert_eq!(err, dir.join("logs/web.stderr.log"));
        assert_eq!(log_paths(&dir, "web"), log_paths(&dir, "web"));
    }

    #[test]
    fn test_sinks_append_across_reopen() {
        let dir = tempdir().unwrap();

        {
            let (mut out, _) = open_sinks(dir.path(), "svc").unwrap();
            writeln!(out, "first").unwrap();
        }
        {
            let (mut out, _) = open_sinks(dir.path(), "svc").unwrap();
            writeln!(out, "second").unwrap();
        }

        let (stdout_path, _) = log_paths(dir.path(), "svc");
        assert_eq!(tail(&stdout_path, 10), vec!["first", "second"]);
    }

    #[test]
    fn test_tail_returns_last_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.log");
        std::fs::write(&path, "1\n2\n3\n4\n5\n").unwrap();

        assert_eq!(tail(&path, 2), vec!["4", "5"]);
        assert_eq!(tail(&path, 10).len(), 5);
        assert!(tail(&dir.path().join("missing.log"), 3).is_empty());
    }

    #[test]
    fn test_clear_truncates_in_place() {
        let dir = tempdir().unwrap();
        let (stdout_path, stderr_path) = log_paths(dir.path(), "svc");

        {
            let (mut out, mut err) = open_sinks(dir.path(), "svc").unwrap();
            writeln!(out, "noise").unwrap();
            writeln!(err, "noise").unwrap();
        }

        clear(&stdout_path, &stderr_path).unwrap();
        assert!(tail(&stdout_path, 10).is_empty());
        assert!(tail(&stderr_path, 10).is_empty());
    }

    #[test]
    fn test_follow_cursor_sees_only_appended_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.log");
        std::fs::write(&path, "old\n").unwrap();

        let mut cursor = FollowCursor::new(&path);
        assert!(cursor.poll().is_empty());

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "new1").unwrap();
        writeln!(file, "new2").unwrap();

        assert_eq!(cursor.poll(), vec!["new1", "new2"]);
        assert!(cursor.poll().is_empty());
    }

    #[test]
    fn test_stream_parsing() {
        assert_eq!("stdout".parse::<Stream>().unwrap(), Stream::Stdout);
        assert_eq!("both".parse::<Stream>().unwrap(), Stream::Both);
        assert!("all".parse::<Stream>().is_err());
        assert!(Stream::Stderr.wants_stderr());
        assert!(!Stream::Stderr.wants_stdout());
    }
}
