use chrono::{DateTime, Utc};
use colored::Colorize;
use core::fmt;
use once_cell::sync::Lazy;

pub static SUCCESS: Lazy<colored::ColoredString> = Lazy::new(|| "[SENTINEL]".green());
pub static FAIL: Lazy<colored::ColoredString> = Lazy::new(|| "[SENTINEL]".red());
pub static WARN: Lazy<colored::ColoredString> = Lazy::new(|| "[SENTINEL]".yellow());
pub static INFO: Lazy<colored::ColoredString> = Lazy::new(|| "[SENTINEL]".cyan());

const SECONDS_IN_DAY: i64 = 24 * 60 * 60;
const SECONDS_IN_HOUR: i64 = 60 * 60;
const SECONDS_IN_MINUTE: i64 = 60;

#[derive(Clone, Debug)]
pub struct ColoredString(pub colored::ColoredString);

impl From<colored::ColoredString> for ColoredString {
    fn from(cs: colored::ColoredString) -> Self {
        ColoredString(cs)
    }
}

impl fmt::Display for ColoredString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn format_duration(datetime: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(datetime);

    match duration.num_seconds().max(0) {
        s if s >= SECONDS_IN_DAY => format!(
            "{}d {}h",
            s / SECONDS_IN_DAY,
            (s % SECONDS_IN_DAY) / SECONDS_IN_HOUR
        ),
        s if s >= SECONDS_IN_HOUR => format!(
            "{}h {}m",
            s / SECONDS_IN_HOUR,
            (s % SECONDS_IN_HOUR) / SECONDS_IN_MINUTE
        ),
        s if s >= SECONDS_IN_MINUTE => format!("{}m {}s", s / SECONDS_IN_MINUTE, s % SECONDS_IN_MINUTE),
        s => format!("{}s", s),
    }
}

pub fn format_memory(bytes: u64) -> String {
    const UNIT: f64 = 1024.0;
    const SUFFIX: [&str; 4] = ["b", "kb", "mb", "gb"];

    let size = bytes as f64;
    if size <= 0.0 {
        return "0b".to_string();
    }

    let base = size.log10() / UNIT.log10();
    let index = (base.floor() as usize).min(SUFFIX.len() - 1);

    let mut buffer = ryu::Buffer::new();
    let result = buffer
        .format((UNIT.powf(base - index as f64) * 10.0).round() / 10.0)
        .trim_end_matches(".0");

    [result, SUFFIX[index]].join("")
}

/// Parse a `KEY=VALUE` CLI argument into its parts.
pub fn parse_env_pair(raw: &str) -> Option<(String, String)> {
    let (key, value) = raw.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_duration_seconds() {
        let datetime = Utc::now() - Duration::seconds(30);
        assert_eq!(format_duration(datetime), "30s");
    }

    #[test]
    fn test_format_duration_minutes() {
        let datetime = Utc::now() - Duration::seconds(5 * 60 + 12);
        assert_eq!(format_duration(datetime), "5m 12s");
    }

    #[test]
    fn test_format_duration_hours() {
        let datetime = Utc::now() - Duration::hours(3);
        assert_eq!(format_duration(datetime), "3h 0m");
    }

    #[test]
    fn test_format_duration_days() {
        let datetime = Utc::now() - Duration::days(10) - Duration::hours(4);
        assert_eq!(format_duration(datetime), "10d 4h");
    }

    #[test]
    fn test_format_duration_future_clamps_to_zero() {
        let datetime = Utc::now() + Duration::seconds(90);
        assert_eq!(format_duration(datetime), "0s");
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(0), "0b");
        assert_eq!(format_memory(500), "500b");
        assert_eq!(format_memory(1024), "1kb");
        assert_eq!(format_memory(1024 * 1024), "1mb");
        assert_eq!(format_memory(5 * 1024 * 1024), "5mb");
        assert_eq!(format_memory(2 * 1024 * 1024 * 1024), "2gb");
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("KEY=value"),
            Some(("KEY".into(), "value".into()))
        );
        assert_eq!(
            parse_env_pair("KEY=a=b"),
            Some(("KEY".into(), "a=b".into()))
        );
        assert_eq!(parse_env_pair("KEY="), Some(("KEY".into(), String::new())));
        assert_eq!(parse_env_pair("novalue"), None);
        assert_eq!(parse_env_pair("=x"), None);
    }
}
