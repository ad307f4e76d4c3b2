// Scrape log: persisted error trail of a run, mirrored to tracing

use crate::data::{Database, LogLevel};
use tracing::{error, info, warn};

/// Writes `scrape_log` rows for one run (or none). A failed write is reported
/// through tracing and otherwise ignored.
#[derive(Debug, Clone, Default)]
pub struct ScrapeLogger {
    run_id: Option<String>,
}

impl ScrapeLogger {
    pub fn for_run(run_id: &str) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
        }
    }

    pub fn detached() -> Self {
        Self { run_id: None }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn log(&self, db: &Database, scrape_id: Option<i64>, level: LogLevel, message: &str) {
        let run = self.run_id.as_deref().unwrap_or("-");
        match level {
            LogLevel::Info => info!(run_id = run, "{}", message),
            LogLevel::Warning => warn!(run_id = run, "{}", message),
            LogLevel::Error => error!(run_id = run, "{}", message),
        }

        if let Err(e) = db.insert_log(self.run_id.as_deref(), scrape_id, level, message) {
            warn!(run_id = run, "Could not persist scrape log entry: {}", e);
        }
    }

    pub fn info(&self, db: &Database, message: &str) {
        self.log(db, None, LogLevel::Info, message);
    }

    pub fn warning(&self, db: &Database, message: &str) {
        self.log(db, None, LogLevel::Warning, message);
    }

    pub fn error(&self, db: &Database, message: &str) {
        self.log(db, None, LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_entries_are_persisted_for_run() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("log.db")).unwrap();
        let run_id = db.create_run().unwrap();

        let logger = ScrapeLogger::for_run(&run_id);
        logger.error(&db, "Failed to fetch https://shop.example/x: HTTP status 500");
        logger.info(&db, "Store finished");

        let entries = db.logs_for_run(&run_id, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[1].level, LogLevel::Error);
        assert!(entries[1].message.contains("HTTP status 500"));
    }

    #[test]
    fn test_failed_write_does_not_panic() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("log.db")).unwrap();

        // Unknown run id violates the foreign key; the logger swallows it
        let logger = ScrapeLogger::for_run("no-such-run");
        logger.error(&db, "lost");

        assert!(db.logs_for_run("no-such-run", 10).unwrap().is_empty());
    }
}
