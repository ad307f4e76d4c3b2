// Run reports from database

use crate::data::{Database, LogEntry, LogLevel, RunStatus, ScrapeRun};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreLinks {
    pub store_id: i64,
    pub name: String,
    pub base_url: String,
    pub links: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub run: ScrapeRun,
    pub stores: Vec<StoreLinks>,
    pub total_links: i64,
    pub error_count: i64,
    pub warning_count: i64,
    /// Newest first.
    pub recent_logs: Vec<LogEntry>,
}

pub fn gather_report_data(db: &Database, run_id: &str, log_limit: usize) -> Result<ReportData> {
    let run = db
        .get_run(run_id)?
        .ok_or_else(|| CoreError::Other(format!("No scrape run with id {}", run_id)))?;

    let conn = db.get_connection();

    // Every store on file, so stores that yielded nothing still show up
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.base_url, COUNT(sc.id)
         FROM store s
         LEFT JOIN scrape sc ON sc.store_id = s.id AND sc.scrape_run_id = ?1
         GROUP BY s.id
         ORDER BY s.id",
    )?;
    let stores = stmt
        .query_map([run_id], |row| {
            Ok(StoreLinks {
                store_id: row.get(0)?,
                name: row.get(1)?,
                base_url: row.get(2)?,
                links: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let count_level = |level: LogLevel| -> rusqlite::Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM scrape_log WHERE scrape_run_id = ?1 AND log_level = ?2",
            rusqlite::params![run_id, level],
            |row| row.get(0),
        )
    };
    let error_count = count_level(LogLevel::Error)?;
    let warning_count = count_level(LogLevel::Warning)?;

    Ok(ReportData {
        total_links: stores.iter().map(|s| s.links).sum(),
        run,
        stores,
        error_count,
        warning_count,
        recent_logs: db.logs_for_run(run_id, log_limit)?,
    })
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    report.push_str(RULE);
    report.push_str("                          TRAWLER SCRAPE RUN REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Run ID:       {}\n", data.run.id));
    report.push_str(&format!("Status:       {}\n", data.status_to_string()));
    report.push_str(&format!("Started:      {}\n", format_timestamp(data.run.started_at)));
    if let Some(finished_at) = data.run.finished_at {
        report.push_str(&format!("Finished:     {}\n", format_timestamp(finished_at)));
        report.push_str(&format!(
            "Duration:     {} seconds\n",
            finished_at - data.run.started_at
        ));
    }
    report.push_str(&format!("Links Found:  {}\n", data.total_links));
    report.push_str(&format!(
        "Log Trail:    {} errors, {} warnings\n",
        data.error_count, data.warning_count
    ));
    report.push('\n');

    report.push_str(RULE);
    report.push_str("STORES\n");
    report.push_str(RULE);
    report.push('\n');

    if data.stores.is_empty() {
        report.push_str("No stores on file.\n");
    }
    for store in &data.stores {
        report.push_str(&format!(
            "  [{:>4}] {:<24} {:>6} links  {}\n",
            store.store_id, store.name, store.links, store.base_url
        ));
    }
    report.push('\n');

    if !data.recent_logs.is_empty() {
        report.push_str(RULE);
        report.push_str("RECENT LOG ENTRIES\n");
        report.push_str(RULE);
        report.push('\n');

        for entry in &data.recent_logs {
            report.push_str(&format!(
                "  {} [{:<7}] {}\n",
                format_timestamp(entry.created_at),
                entry.level.as_str().to_uppercase(),
                entry.message
            ));
        }
        report.push('\n');
    }

    report
}

pub fn generate_json_report(data: &ReportData) -> std::result::Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Trawler",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": Utc::now().to_rfc3339(),
                "format": "json"
            },
            "run": {
                "id": data.run.id,
                "status": data.run.status.as_str(),
                "started_at": format_iso8601_timestamp(data.run.started_at),
                "finished_at": data.run.finished_at.map(format_iso8601_timestamp),
                "duration_seconds": data.run.finished_at.map(|end| end - data.run.started_at)
            },
            "summary": {
                "total_links": data.total_links,
                "errors": data.error_count,
                "warnings": data.warning_count
            },
            "stores": data.stores,
            "recent_logs": data.recent_logs
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn render_report(data: &ReportData, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(data)),
        ReportFormat::Json => generate_json_report(data)
            .map_err(|e| CoreError::Other(format!("Failed to serialize report: {}", e))),
    }
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

impl ReportData {
    fn status_to_string(&self) -> &str {
        match self.run.status {
            RunStatus::Running => "Running",
            RunStatus::Finished => "Finished",
        }
    }
}

pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn format_iso8601_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}
