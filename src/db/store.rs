//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Url;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::traits::{EndpointRegistry, StateStore, SubscriberDirectory};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";
const MAX_URL_LEN: usize = 2048;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("Not found")]
    NotFound,
    #[error("database connection lock poisoned")]
    Poisoned,
}

impl ToSql for CheckStatus {
    fn to_sql(&self) -> SqlResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CheckStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        // Late writes for a deleted endpoint fail instead of leaving orphan rows
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Endpoint registry ---

    /// Register an endpoint. Adding a URL that already exists returns the
    /// existing endpoint unchanged.
    pub fn add_endpoint(&self, name: &str, url: &str) -> Result<Endpoint, DbError> {
        let name = name.trim();
        let url = url.trim();

        if name.is_empty() {
            return Err(DbError::Invalid("endpoint name cannot be empty".to_string()));
        }
        if !is_valid_url(url) {
            return Err(DbError::Invalid(format!("invalid URL: {}", url)));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO endpoints (name, url, created_at) VALUES (?1, ?2, ?3)",
            params![name, url, format_db_time(Utc::now())],
        )?;
        let endpoint = conn.query_row(
            "SELECT id, name, url, created_at FROM endpoints WHERE url = ?1",
            params![url],
            endpoint_from_row,
        )?;
        Ok(endpoint)
    }

    /// Get all endpoints ordered by id.
    pub fn get_endpoints(&self) -> Result<Vec<Endpoint>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, url, created_at FROM endpoints ORDER BY id ASC")?;
        let endpoints = stmt
            .query_map([], endpoint_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(endpoints)
    }

    /// Get an endpoint by ID.
    pub fn get_endpoint(&self, id: i64) -> Result<Endpoint, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, url, created_at FROM endpoints WHERE id = ?1",
            params![id],
            endpoint_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Delete an endpoint together with its logs and state.
    ///
    /// Follow entries are kept: ids are never reused, and dropping them could
    /// leave a subscriber with an empty follow set, which means every endpoint.
    pub fn delete_endpoint(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM check_logs WHERE endpoint_id = ?1", params![id])?;
        tx.execute("DELETE FROM endpoint_state WHERE endpoint_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM endpoints WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    // --- Check logs ---

    /// Append a probe outcome to the check log.
    pub fn add_log(&self, result: &CheckResult) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO check_logs (endpoint_id, status, status_code, latency, response, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.endpoint_id,
                result.status,
                result.status_code,
                result.latency,
                result.response,
                format_db_time(result.checked_at),
            ],
        )?;
        Ok(())
    }

    /// Get logs for an endpoint, newest first.
    pub fn get_logs(
        &self,
        endpoint_id: i64,
        limit: u32,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogEntry>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, endpoint_id, status, status_code, latency, response, checked_at
             FROM check_logs
             WHERE endpoint_id = ?1
               AND (?2 IS NULL OR checked_at >= ?2)
               AND (?3 IS NULL OR checked_at <= ?3)
             ORDER BY checked_at DESC, id DESC
             LIMIT ?4",
        )?;

        let logs = stmt
            .query_map(
                params![
                    endpoint_id,
                    since.map(format_db_time),
                    until.map(format_db_time),
                    limit,
                ],
                |row| {
                    Ok(LogEntry {
                        id: row.get(0)?,
                        endpoint_id: row.get(1)?,
                        status: row.get(2)?,
                        status_code: row.get(3)?,
                        latency: row.get(4)?,
                        response: row.get(5)?,
                        checked_at: time_column(row, 6)?,
                    })
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(logs)
    }

    // --- Endpoint state ---

    /// Get the snapshot for an endpoint, if it has ever been probed or alerted.
    pub fn get_state(&self, endpoint_id: i64) -> Result<Option<StateSnapshot>, DbError> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT endpoint_id, last_status, last_status_code, last_latency, last_checked_at, last_alert_at
                 FROM endpoint_state WHERE endpoint_id = ?1",
                params![endpoint_id],
                |row| {
                    Ok(StateSnapshot {
                        endpoint_id: row.get(0)?,
                        last_status: row.get(1)?,
                        last_status_code: row.get(2)?,
                        last_latency: row.get(3)?,
                        last_checked_at: optional_time_column(row, 4)?,
                        last_alert_at: optional_time_column(row, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Overwrite the status fields of an endpoint's snapshot.
    pub fn upsert_state(&self, result: &CheckResult) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO endpoint_state (endpoint_id, last_status, last_status_code, last_latency, last_checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(endpoint_id) DO UPDATE SET
             last_status=excluded.last_status,
             last_status_code=excluded.last_status_code,
             last_latency=excluded.last_latency,
             last_checked_at=excluded.last_checked_at",
            params![
                result.endpoint_id,
                result.status,
                result.status_code,
                result.latency,
                format_db_time(result.checked_at),
            ],
        )?;
        Ok(())
    }

    /// Record that an alert was sent for an endpoint at `now`.
    pub fn set_last_alert(&self, endpoint_id: i64, now: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO endpoint_state (endpoint_id, last_alert_at) VALUES (?1, ?2)
             ON CONFLICT(endpoint_id) DO UPDATE SET last_alert_at=excluded.last_alert_at",
            params![endpoint_id, format_db_time(now)],
        )?;
        Ok(())
    }

    /// Get every endpoint joined with its snapshot.
    pub fn get_endpoints_with_state(&self) -> Result<Vec<EndpointWithState>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.url, e.created_at,
                    s.last_status, s.last_status_code, s.last_latency, s.last_checked_at, s.last_alert_at
             FROM endpoints e
             LEFT JOIN endpoint_state s ON s.endpoint_id = e.id
             ORDER BY e.id ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(EndpointWithState {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                    created_at: time_column(row, 3)?,
                    last_status: row.get(4)?,
                    last_status_code: row.get(5)?,
                    last_latency: row.get(6)?,
                    last_checked_at: optional_time_column(row, 7)?,
                    last_alert_at: optional_time_column(row, 8)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rows)
    }

    /// Count endpoints and their current statuses.
    pub fn get_overview_stats(&self) -> Result<OverviewStats, DbError> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM endpoints", [], |r| r.get(0))?;
        let (up, down): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(s.last_status = 'UP'), 0), COALESCE(SUM(s.last_status = 'DOWN'), 0)
             FROM endpoint_state s
             JOIN endpoints e ON e.id = s.endpoint_id",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(OverviewStats { total, up, down })
    }

    // --- Subscribers ---

    /// Insert or update a subscriber, replacing its followed endpoints.
    /// Returns the subscriber as stored.
    pub fn add_subscriber(&self, subscriber: &Subscriber) -> Result<Subscriber, DbError> {
        let chat_id = subscriber.chat_id.trim();
        if chat_id.is_empty() {
            return Err(DbError::Invalid("chat_id cannot be empty".to_string()));
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO subscribers (chat_id, username, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET username=excluded.username",
            params![chat_id, subscriber.username, format_db_time(Utc::now())],
        )?;
        tx.execute("DELETE FROM subscriber_follows WHERE chat_id = ?1", params![chat_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO subscriber_follows (chat_id, endpoint_id) VALUES (?1, ?2)",
            )?;
            for endpoint_id in &subscriber.follows {
                stmt.execute(params![chat_id, endpoint_id])?;
            }
        }
        tx.commit()?;

        let mut follows = subscriber.follows.clone();
        follows.sort_unstable();
        follows.dedup();
        Ok(Subscriber {
            chat_id: chat_id.to_string(),
            username: subscriber.username.clone(),
            follows,
        })
    }

    /// Remove a subscriber and its follow entries.
    pub fn remove_subscriber(&self, chat_id: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM subscriber_follows WHERE chat_id = ?1", params![chat_id])?;
        let removed = tx.execute("DELETE FROM subscribers WHERE chat_id = ?1", params![chat_id])?;
        if removed == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    /// Get all subscribers with their followed endpoints.
    pub fn get_subscribers(&self) -> Result<Vec<Subscriber>, DbError> {
        let conn = self.conn()?;

        let mut follows: HashMap<String, Vec<i64>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT chat_id, endpoint_id FROM subscriber_follows ORDER BY chat_id, endpoint_id",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (chat_id, endpoint_id) = row?;
                follows.entry(chat_id).or_default().push(endpoint_id);
            }
        }

        let mut stmt = conn.prepare("SELECT chat_id, username FROM subscribers ORDER BY created_at, chat_id")?;
        let subscribers = stmt
            .query_map([], |row| {
                let chat_id: String = row.get(0)?;
                Ok(Subscriber {
                    follows: follows.remove(&chat_id).unwrap_or_default(),
                    chat_id,
                    username: row.get(1)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(subscribers)
    }
}

impl EndpointRegistry for Store {
    fn list_endpoints(&self) -> Result<Vec<Endpoint>, DbError> {
        self.get_endpoints()
    }
}

impl SubscriberDirectory for Store {
    fn list_subscribers(&self) -> Result<Vec<Subscriber>, DbError> {
        self.get_subscribers()
    }
}

impl StateStore for Store {
    fn read_previous_status(&self, endpoint_id: i64) -> Result<Option<CheckStatus>, DbError> {
        Ok(self.get_state(endpoint_id)?.and_then(|s| s.last_status))
    }

    fn read_last_alert_at(&self, endpoint_id: i64) -> Result<Option<DateTime<Utc>>, DbError> {
        Ok(self.get_state(endpoint_id)?.and_then(|s| s.last_alert_at))
    }

    fn append_log(&self, result: &CheckResult) -> Result<(), DbError> {
        self.add_log(result)
    }

    fn upsert_snapshot(&self, result: &CheckResult) -> Result<(), DbError> {
        self.upsert_state(result)
    }

    fn touch_alert(&self, endpoint_id: i64, now: DateTime<Utc>) -> Result<(), DbError> {
        self.set_last_alert(endpoint_id, now)
    }
}

/// Check that `url` is an absolute http(s) URL with a host.
pub fn is_valid_url(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() || url.len() > MAX_URL_LEN {
        return false;
    }
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

fn endpoint_from_row(row: &Row<'_>) -> SqlResult<Endpoint> {
    Ok(Endpoint {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        created_at: time_column(row, 3)?,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unparsable timestamp: {}", raw).into(),
        )
    })
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> SqlResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(_) => time_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
