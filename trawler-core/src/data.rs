use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Result, Row, ToSql, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Finished,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "finished" => Some(RunStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Queued,
    Success,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Queued => "queued",
            LinkStatus::Success => "success",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(LinkStatus::Queued),
            "success" => Some(LinkStatus::Success),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" => Some(LogLevel::Info),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()
                    .and_then(|s| <$ty>::from_db(s).ok_or(FromSqlError::InvalidType))
            }
        }
    };
}

text_enum_sql!(RunStatus);
text_enum_sql!(LinkStatus);
text_enum_sql!(LogLevel);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i64,
    pub ip: String,
    pub port: u16,
    pub kind: String,
    pub country: Option<String>,
    pub last_used: Option<i64>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Proxy {
    /// `http://[user:pass@]ip:port`, with IPv6 addresses in brackets.
    pub fn connection_string(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() => format!("{}:{}@", user, pass),
            (Some(user), None) if !user.is_empty() => format!("{}@", user),
            _ => String::new(),
        };
        match self.ip.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("http://{}[{}]:{}", auth, ip, self.port),
            _ => format!("http://{}{}:{}", auth, self.ip, self.port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub id: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeLink {
    pub id: i64,
    pub scrape_run_id: String,
    pub store_id: i64,
    pub kind: String,
    pub source_url: String,
    pub status: LinkStatus,
    pub started_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub scrape_run_id: Option<String>,
    pub scrape_id: Option<i64>,
    pub level: LogLevel,
    pub message: String,
    pub created_at: i64,
}

pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Database {
    pub fn remove(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Several crawls may write through their own connections at once
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS store (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    base_url TEXT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS proxy (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip TEXT NOT NULL,
    port INTEGER NOT NULL CHECK(port BETWEEN 1 AND 65535),
    type TEXT NOT NULL DEFAULT 'anonymous',
    country TEXT CHECK(country IS NULL OR length(country) = 2),
    last_used INTEGER,
    username TEXT,
    pass TEXT,
    UNIQUE(ip, port)
);

CREATE TABLE IF NOT EXISTS scrape_run (
    id TEXT PRIMARY KEY,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'finished'))
);

-- One row per URL discovered for a store within a run
CREATE TABLE IF NOT EXISTS scrape (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scrape_run_id TEXT NOT NULL,
    store_id INTEGER NOT NULL,
    type TEXT NOT NULL DEFAULT 'frontpage',
    source_url TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('queued', 'success')),
    started_at INTEGER NOT NULL,

    FOREIGN KEY(scrape_run_id) REFERENCES scrape_run(id) ON DELETE CASCADE,
    FOREIGN KEY(store_id) REFERENCES store(id) ON DELETE CASCADE,
    UNIQUE(scrape_run_id, store_id, source_url)
);

CREATE INDEX IF NOT EXISTS idx_scrape_run ON scrape(scrape_run_id);
CREATE INDEX IF NOT EXISTS idx_scrape_store ON scrape(scrape_run_id, store_id);

CREATE TABLE IF NOT EXISTS scrape_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scrape_run_id TEXT,
    scrape_id INTEGER,
    log_level TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at INTEGER NOT NULL,

    FOREIGN KEY(scrape_run_id) REFERENCES scrape_run(id) ON DELETE CASCADE,
    FOREIGN KEY(scrape_id) REFERENCES scrape(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_scrape_log_run ON scrape_log(scrape_run_id);
            ",
        )?;
        Ok(())
    }

    // Stores
    pub fn add_store(&self, name: &str, base_url: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO store (name, base_url, active, created_at) VALUES (?1, ?2, 1, ?3)",
            params![name, base_url, current_timestamp()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_stores(&self) -> Result<Vec<Store>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, base_url, active FROM store ORDER BY id")?;
        let stores = stmt
            .query_map([], store_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(stores)
    }

    pub fn active_stores(&self) -> Result<Vec<Store>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, base_url, active FROM store WHERE active = 1 ORDER BY id")?;
        let stores = stmt
            .query_map([], store_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(stores)
    }

    /// Returns false when no store has that id.
    pub fn set_store_active(&self, store_id: i64, active: bool) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE store SET active = ?1 WHERE id = ?2",
            params![active, store_id],
        )?;
        Ok(changed > 0)
    }

    // Proxies

    /// Insert a proxy seen on a feed, or refresh the one already on file:
    /// `last_used` is bumped and `country` replaced only by a known value.
    pub fn upsert_proxy(&self, ip: &str, port: u16, kind: &str, country: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO proxy (ip, port, type, country, last_used) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(ip, port) DO UPDATE SET
                country = COALESCE(excluded.country, proxy.country),
                last_used = excluded.last_used",
            params![ip, port, kind, country, current_timestamp()],
        )?;
        Ok(())
    }

    /// Seed an authenticated proxy; credentials on an existing row are replaced.
    pub fn add_proxy(
        &self,
        ip: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO proxy (ip, port, type, username, pass) VALUES (?1, ?2, 'private', ?3, ?4)
             ON CONFLICT(ip, port) DO UPDATE SET username = excluded.username, pass = excluded.pass",
            params![ip, port, username, password],
        )?;
        self.conn.query_row(
            "SELECT id FROM proxy WHERE ip = ?1 AND port = ?2",
            params![ip, port],
            |row| row.get(0),
        )
    }

    pub fn list_proxies(&self) -> Result<Vec<Proxy>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ip, port, type, country, last_used, username, pass FROM proxy ORDER BY id",
        )?;
        let proxies = stmt
            .query_map([], |row| {
                Ok(Proxy {
                    id: row.get(0)?,
                    ip: row.get(1)?,
                    port: row.get(2)?,
                    kind: row.get(3)?,
                    country: row.get(4)?,
                    last_used: row.get(5)?,
                    username: row.get(6)?,
                    password: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(proxies)
    }

    /// Connection strings for every proxy on file, in id order. Empty means
    /// crawl directly.
    pub fn proxy_connection_strings(&self) -> Result<Vec<String>> {
        Ok(self
            .list_proxies()?
            .iter()
            .map(Proxy::connection_string)
            .collect())
    }

    pub fn proxy_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM proxy", [], |row| row.get(0))
    }

    // Runs
    pub fn create_run(&self) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO scrape_run (id, started_at, status) VALUES (?1, ?2, ?3)",
            params![&run_id, current_timestamp(), RunStatus::Running],
        )?;
        Ok(run_id)
    }

    pub fn finish_run(&self, run_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE scrape_run SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![RunStatus::Finished, current_timestamp(), run_id],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<ScrapeRun>> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, status FROM scrape_run WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()
    }

    /// Most recent first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<ScrapeRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, status FROM scrape_run
             ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(runs)
    }

    // Links

    /// Idempotent on `(run, store, url)`. Returns whether a new row was written.
    pub fn insert_scrape_link(
        &self,
        run_id: &str,
        store_id: i64,
        source_url: &str,
        status: LinkStatus,
    ) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO scrape (scrape_run_id, store_id, type, source_url, status, started_at)
             VALUES (?1, ?2, 'frontpage', ?3, ?4, ?5)
             ON CONFLICT(scrape_run_id, store_id, source_url) DO NOTHING",
            params![run_id, store_id, source_url, status, current_timestamp()],
        )?;
        Ok(inserted > 0)
    }

    pub fn count_links(&self, run_id: &str, store_id: i64) -> Result<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM scrape WHERE scrape_run_id = ?1 AND store_id = ?2",
            params![run_id, store_id],
            |row| row.get(0),
        )
    }

    pub fn links_for_run(&self, run_id: &str) -> Result<Vec<ScrapeLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, scrape_run_id, store_id, type, source_url, status, started_at
             FROM scrape WHERE scrape_run_id = ?1 ORDER BY store_id, source_url",
        )?;
        let links = stmt
            .query_map(params![run_id], |row| {
                Ok(ScrapeLink {
                    id: row.get(0)?,
                    scrape_run_id: row.get(1)?,
                    store_id: row.get(2)?,
                    kind: row.get(3)?,
                    source_url: row.get(4)?,
                    status: row.get(5)?,
                    started_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(links)
    }

    /// `(store_id, link count)` for every store with at least one link in the run.
    pub fn link_counts_by_store(&self, run_id: &str) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT store_id, COUNT(*) FROM scrape WHERE scrape_run_id = ?1
             GROUP BY store_id ORDER BY store_id",
        )?;
        let counts = stmt
            .query_map(params![run_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>>>()?;
        Ok(counts)
    }

    // Scrape log
    pub fn insert_log(
        &self,
        run_id: Option<&str>,
        scrape_id: Option<i64>,
        level: LogLevel,
        message: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO scrape_log (scrape_run_id, scrape_id, log_level, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, scrape_id, level, message, current_timestamp()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Newest first.
    pub fn logs_for_run(&self, run_id: &str, limit: usize) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, scrape_run_id, scrape_id, log_level, message, created_at
             FROM scrape_log WHERE scrape_run_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![run_id, limit as i64], |row| {
                Ok(LogEntry {
                    id: row.get(0)?,
                    scrape_run_id: row.get(1)?,
                    scrape_id: row.get(2)?,
                    level: row.get(3)?,
                    message: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}

fn store_from_row(row: &Row<'_>) -> Result<Store> {
    Ok(Store {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url: row.get(2)?,
        active: row.get(3)?,
    })
}

fn run_from_row(row: &Row<'_>) -> Result<ScrapeRun> {
    Ok(ScrapeRun {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        status: row.get(3)?,
    })
}
