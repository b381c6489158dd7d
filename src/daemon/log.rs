//! Append-only activity log for the daemon at `<state_dir>/daemon.log`.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub const LOG_FILE: &str = "daemon.log";

pub struct Logger {
    file: File,
}

impl Logger {
    pub fn open(state_dir: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(state_dir.join(LOG_FILE))?;
        Ok(Logger { file })
    }

    pub fn write(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::info!("{message}");
        // Write errors must not take the daemon down.
        let _ = writeln!(
            &mut self.file,
            "[{}] {message}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_logger_appends_timestamped_lines() {
        let dir = tempdir().unwrap();

        {
            let mut logger = Logger::open(dir.path()).unwrap();
            logger.write("first");
        }
        {
            let mut logger = Logger::open(dir.path()).unwrap();
            logger.write("second");
        }

        let contents = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
        assert!(lines[0].starts_with('['));
    }
}
