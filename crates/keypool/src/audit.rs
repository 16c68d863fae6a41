//! Append-only audit log for deprecated credentials
//!
//! One line per deprecation event, full secret plus timestamp, so operators
//! can inspect or re-activate keys after a billing fix. Writes are
//! synchronous and fsynced: deprecation is rare and off the hot path, and
//! the record must survive an immediate crash.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Durable append-only deprecation log.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one deprecation record and flush it to disk before returning.
    pub fn append(&self, secret: &str, timestamp: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{secret} # Deprecated at {timestamp}")?;
        file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("deprecated_keys.txt"));

        log.append("sk-first", "2025-01-01T00:00:00.000Z").unwrap();
        log.append("sk-second", "2025-01-02T00:00:00.000Z").unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "sk-first # Deprecated at 2025-01-01T00:00:00.000Z");
        assert_eq!(lines[1], "sk-second # Deprecated at 2025-01-02T00:00:00.000Z");
    }

    #[test]
    fn append_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deprecated_keys.txt");
        assert!(!path.exists());

        AuditLog::new(&path).append("sk-x", "2025-01-01T00:00:00.000Z").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn append_to_missing_directory_errors() {
        let log = AuditLog::new("/nonexistent-dir-for-audit/deprecated_keys.txt");
        assert!(log.append("sk-x", "2025-01-01T00:00:00.000Z").is_err());
    }
}
