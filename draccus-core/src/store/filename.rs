use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Unix seconds, one file per second at most.
pub const DEFAULT_FILENAME_PATTERN: &str = "%s";

/// strftime pattern the store expands into a fresh file name on every flush.
///
/// The literal `PID` is replaced by the process id once, when the pattern is built, so several
/// draccus processes writing into the same place do not collide. Everything else is expanded
/// against the current UTC time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    pattern: String,
}

impl FilenamePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Self::with_pid(pattern, std::process::id())
    }

    fn with_pid(pattern: &str, pid: u32) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::Config("filename pattern must not be empty".to_string()));
        }
        let pattern = pattern.replacen("PID", &pid.to_string(), 1);
        if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(Error::Config(format!(
                "invalid filename pattern {pattern:?}"
            )));
        }
        Ok(Self { pattern })
    }

    pub fn expand(&self) -> String {
        self.expand_at(Utc::now())
    }

    pub fn expand_at(&self, at: DateTime<Utc>) -> String {
        at.format(&self.pattern).to_string()
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl Default for FilenamePattern {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_FILENAME_PATTERN.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_default_is_unix_seconds() {
        let pattern = FilenamePattern::default();
        assert_eq!(pattern.expand_at(at()), "1704164645");
    }

    #[test]
    fn test_pid_replaced_once() {
        let pattern = FilenamePattern::with_pid("events-PID-%Y%m%d-%H%M%S-PID.log", 4242).unwrap();
        assert_eq!(pattern.as_str(), "events-4242-%Y%m%d-%H%M%S-PID.log");
        assert_eq!(
            pattern.expand_at(at()),
            "events-4242-20240102-030405-PID.log"
        );
    }

    #[test]
    fn test_uses_current_pid() {
        let pattern = FilenamePattern::new("PID").unwrap();
        assert_eq!(pattern.expand(), std::process::id().to_string());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(FilenamePattern::new(""), Err(Error::Config(_))));
        assert!(matches!(FilenamePattern::new("%Q-%"), Err(Error::Config(_))));
    }
}
