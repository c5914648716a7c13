use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use crate::sink::{EventSink, NoopSink};
use crate::EngineEvent;

pub const LEDGER_FILENAME: &str = "gekko.sqlite";

/// STRICT tables need SQLite 3.37.0.
const STRICT_TABLES_MIN_VERSION: i32 = 3_037_000;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger directory unavailable: {0}")]
    Io(#[from] io::Error),
    #[error("ledger storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

/// Persistent URL -> last fetch time store backed by SQLite.
///
/// One handle per database file; concurrent writers from other processes are
/// not supported.
pub struct FetchLedger {
    conn: Connection,
    path: PathBuf,
    strict_schema: bool,
    clock: Clock,
    sink: Arc<dyn EventSink>,
}

impl FetchLedger {
    /// Opens `dir/gekko.sqlite`, creating the directory if needed.
    pub fn open_in(dir: &Path) -> Result<Self, LedgerError> {
        fs::create_dir_all(dir)?;
        Self::open(&dir.join(LEDGER_FILENAME))
    }

    /// Opens or creates the database file and makes sure the schema exists.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let strict_schema = rusqlite::version_number() >= STRICT_TABLES_MIN_VERSION;
        conn.execute_batch(&schema_sql(strict_schema))?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            strict_schema,
            clock: Arc::new(Utc::now),
            sink: Arc::new(NoopSink),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self.sink.emit(EngineEvent::LedgerOpened {
            path: self.path.clone(),
            strict_schema: self.strict_schema,
        });
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_strict(&self) -> bool {
        self.strict_schema
    }

    /// Records "now" as the last fetch of `url` and returns the previous value.
    ///
    /// Read and write share one immediate transaction. The stored time never
    /// moves backwards, even if the clock does.
    pub fn update_last_fetch(&mut self, url: &str) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let now_secs = (self.clock)().timestamp();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous: Option<i64> = tx
            .query_row(
                "SELECT last_timestamp FROM fetch_times WHERE page_url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        let stored: i64 = tx.query_row(
            "INSERT INTO fetch_times (page_url, last_timestamp) VALUES (?1, ?2)
             ON CONFLICT(page_url) DO UPDATE
                SET last_timestamp = MAX(last_timestamp, excluded.last_timestamp)
             RETURNING last_timestamp",
            params![url, now_secs],
            |row| row.get(0),
        )?;
        tx.commit()?;

        let previous = previous.map(to_datetime).transpose()?;
        self.sink.emit(EngineEvent::LastFetchUpdated {
            url: url.to_string(),
            previous,
            current: to_datetime(stored)?,
        });
        Ok(previous)
    }

    /// Stored last fetch of `url`, without updating it.
    pub fn last_fetch(&self, url: &str) -> Result<Option<DateTime<Utc>>, LedgerError> {
        self.conn
            .query_row(
                "SELECT last_timestamp FROM fetch_times WHERE page_url = ?1",
                params![url],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(to_datetime)
            .transpose()
    }

    pub fn close(self) -> Result<(), LedgerError> {
        let Self {
            conn, path, sink, ..
        } = self;
        conn.close().map_err(|(_, err)| LedgerError::Sqlite(err))?;
        sink.emit(EngineEvent::LedgerClosed { path });
        Ok(())
    }
}

fn schema_sql(strict: bool) -> String {
    let mut sql = String::from(
        "CREATE TABLE IF NOT EXISTS fetch_times (
            page_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            page_url TEXT UNIQUE NOT NULL,
            last_timestamp INTEGER NOT NULL
        )",
    );
    if strict {
        sql.push_str(" STRICT");
    }
    sql.push(';');
    sql
}

fn to_datetime(secs: i64) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::from_timestamp(secs, 0).ok_or(LedgerError::InvalidTimestamp(secs))
}

#[cfg(test)]
mod tests {
    use super::schema_sql;

    #[test]
    fn strict_keyword_only_when_supported() {
        assert!(schema_sql(true).ends_with(") STRICT;"));
        assert!(schema_sql(false).ends_with(");"));
    }
}
