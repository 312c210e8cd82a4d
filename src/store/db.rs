use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;

/// Async-safe handle to the progress store.
///
/// Wraps `ProgressStore` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so SQLite I/O never ties up
/// the async worker driving a tunnel attempt.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<std::sync::Mutex<ProgressStore>>,
}

impl StoreHandle {
    pub fn new(store: ProgressStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ProgressStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }
}

pub struct ProgressStore {
    conn: Connection,
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

const SERVER_COLUMNS: &str =
    "id, name, country, city, health, skip, skip_reason, last_status_check";

fn server_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EgressServer> {
    Ok(EgressServer {
        id: row.get(0)?,
        name: row.get(1)?,
        country: row.get(2)?,
        city: row.get(3)?,
        health: row.get(4)?,
        skip: row.get(5)?,
        skip_reason: row.get(6)?,
        last_status_check: row.get(7)?,
    })
}

impl ProgressStore {
    /// Open (or create) a SQLite database at the given path and create the schema.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS servers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT UNIQUE NOT NULL,
                    country TEXT,
                    city TEXT,
                    skip BOOLEAN NOT NULL DEFAULT 0,
                    skip_reason TEXT,
                    last_status_check TEXT,
                    health TEXT
                );

                CREATE TABLE IF NOT EXISTS click_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    target_link TEXT NOT NULL,
                    server_name TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    success BOOLEAN NOT NULL
                );

                CREATE TABLE IF NOT EXISTS targets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    link TEXT UNIQUE NOT NULL,
                    personality_goal TEXT,
                    target_views INTEGER
                );

                CREATE INDEX IF NOT EXISTS idx_click_logs_target
                    ON click_logs(target_link, success);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Servers ───────────────────────────────────────────────────────

    /// Insert a server discovered by pool sync, or refresh its location.
    /// Health and skip state of an existing row are left untouched.
    pub fn upsert_server_location(
        &self,
        name: &str,
        country: Option<&str>,
        city: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO servers (name, country, city) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                    country = COALESCE(excluded.country, servers.country),
                    city = COALESCE(excluded.city, servers.city)",
                params![name, country, city],
            )
            .with_context(|| format!("Failed to upsert server {}", name))?;
        Ok(())
    }

    /// Persist a health observation and stamp `last_status_check`.
    pub fn record_health(&self, name: &str, record: &HealthRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO servers (name, health, skip, skip_reason, last_status_check)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    health = excluded.health,
                    skip = excluded.skip,
                    skip_reason = excluded.skip_reason,
                    last_status_check = excluded.last_status_check",
                params![
                    name,
                    record.health,
                    record.skip,
                    record.skip_reason,
                    now_timestamp()
                ],
            )
            .with_context(|| format!("Failed to record health for {}", name))?;
        Ok(())
    }

    /// Mark a server as skipped without touching its health string.
    pub fn mark_skipped(&self, name: &str, reason: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO servers (name, skip, skip_reason, last_status_check)
                 VALUES (?1, 1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                    skip = 1,
                    skip_reason = excluded.skip_reason,
                    last_status_check = excluded.last_status_check",
                params![name, reason, now_timestamp()],
            )
            .with_context(|| format!("Failed to mark {} skipped", name))?;
        Ok(())
    }

    /// Clear the skip flag on one server. Returns `false` if it is unknown.
    pub fn clear_skip(&self, name: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE servers SET skip = 0, skip_reason = NULL WHERE name = ?1",
                params![name],
            )
            .with_context(|| format!("Failed to clear skip for {}", name))?;
        Ok(changed > 0)
    }

    /// Clear every skip flag. Returns the number of servers re-enabled.
    pub fn clear_all_skips(&self) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE servers SET skip = 0, skip_reason = NULL WHERE skip = 1",
                [],
            )
            .context("Failed to clear skips")
    }

    pub fn get_server(&self, name: &str) -> Result<Option<EgressServer>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM servers WHERE name = ?1", SERVER_COLUMNS),
                params![name],
                server_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to query server {}", name))
    }

    /// All servers ordered by name, optionally only the skipped ones.
    pub fn list_servers(&self, skipped_only: bool) -> Result<Vec<EgressServer>> {
        let sql = if skipped_only {
            format!(
                "SELECT {} FROM servers WHERE skip = 1 ORDER BY name",
                SERVER_COLUMNS
            )
        } else {
            format!("SELECT {} FROM servers ORDER BY name", SERVER_COLUMNS)
        };
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_servers")?;
        let rows = stmt
            .query_map([], server_from_row)
            .context("Failed to query servers")?;
        let mut servers = Vec::new();
        for row in rows {
            servers.push(row.context("Failed to read server row")?);
        }
        Ok(servers)
    }

    /// Names of servers not currently skipped.
    pub fn usable_servers(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM servers WHERE skip = 0")
            .context("Failed to prepare usable_servers")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query usable servers")?;
        let mut names = HashSet::new();
        for row in rows {
            names.insert(row.context("Failed to read server name")?);
        }
        Ok(names)
    }

    // ── Click logs ────────────────────────────────────────────────────

    /// Append one click attempt. Duplicates are not rejected here; the
    /// scheduler filters used servers before an attempt is made.
    pub fn log_click(&self, target_link: &str, server_name: &str, success: bool) -> Result<ClickAttempt> {
        let timestamp = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO click_logs (target_link, server_name, timestamp, success)
                 VALUES (?1, ?2, ?3, ?4)",
                params![target_link, server_name, timestamp, success],
            )
            .context("Failed to insert click log")?;
        Ok(ClickAttempt {
            id: self.conn.last_insert_rowid(),
            target_link: target_link.to_string(),
            server_name: server_name.to_string(),
            timestamp,
            success,
        })
    }

    /// Servers that already produced a successful click for `target_link`.
    pub fn used_servers_for_link(&self, target_link: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT server_name FROM click_logs
                 WHERE target_link = ?1 AND success = 1",
            )
            .context("Failed to prepare used_servers_for_link")?;
        let rows = stmt
            .query_map(params![target_link], |row| row.get::<_, String>(0))
            .context("Failed to query used servers")?;
        let mut names = HashSet::new();
        for row in rows {
            names.insert(row.context("Failed to read server name")?);
        }
        Ok(names)
    }

    /// Successful clicks recorded for `target_link`. Always computed.
    pub fn view_count_for_link(&self, target_link: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM click_logs WHERE target_link = ?1 AND success = 1",
                params![target_link],
                |row| row.get(0),
            )
            .context("Failed to count views for link")
    }

    pub fn click_attempts_for_link(&self, target_link: &str) -> Result<Vec<ClickAttempt>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, target_link, server_name, timestamp, success FROM click_logs
                 WHERE target_link = ?1 ORDER BY id",
            )
            .context("Failed to prepare click_attempts_for_link")?;
        let rows = stmt
            .query_map(params![target_link], |row| {
                Ok(ClickAttempt {
                    id: row.get(0)?,
                    target_link: row.get(1)?,
                    server_name: row.get(2)?,
                    timestamp: row.get(3)?,
                    success: row.get(4)?,
                })
            })
            .context("Failed to query click attempts")?;
        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(row.context("Failed to read click attempt row")?);
        }
        Ok(attempts)
    }

    // ── Targets ───────────────────────────────────────────────────────

    pub fn get_target(&self, link: &str) -> Result<Option<Target>> {
        self.conn
            .query_row(
                "SELECT link, personality_goal, target_views FROM targets WHERE link = ?1",
                params![link],
                |row| {
                    Ok(Target {
                        link: row.get(0)?,
                        personality_goal: row.get(1)?,
                        target_views: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query target")
    }

    pub fn upsert_target(
        &self,
        link: &str,
        personality_goal: Option<&str>,
        target_views: i64,
    ) -> Result<Target> {
        self.conn
            .execute(
                "INSERT INTO targets (link, personality_goal, target_views) VALUES (?1, ?2, ?3)
                 ON CONFLICT(link) DO UPDATE SET
                    personality_goal = excluded.personality_goal,
                    target_views = excluded.target_views",
                params![link, personality_goal, target_views],
            )
            .context("Failed to upsert target")?;
        self.get_target(link)?
            .context("Target not found after upsert")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
