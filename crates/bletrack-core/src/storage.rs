//! Durable sighting storage backed by SQLite.
//!
//! One connection is opened at startup and guarded by a mutex, so writes are
//! serialized. Every [`Storage::append`] is a single auto-committed INSERT:
//! when it returns `Ok` the row is on disk.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use thiserror::Error;

use crate::record::{DeviceId, Sighting};

/// How long a write waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sightings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id TEXT NOT NULL,
        rssi INTEGER NOT NULL,
        observed_at TEXT NOT NULL,
        tag TEXT,
        tag_kind TEXT,
        raw_payload TEXT,
        gateway TEXT,
        ingested_at TEXT NOT NULL,
        UNIQUE (device_id, observed_at)
    );
    CREATE INDEX IF NOT EXISTS idx_sightings_observed_at ON sightings(observed_at);
";

/// The datastore could not be opened or prepared. Fatal at startup.
#[derive(Debug, Error)]
pub enum StorageInitError {
    /// The directory holding the database file could not be created.
    #[error("Cannot create datastore directory {}: {source}", path.display())]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// SQLite refused to open the file (permissions, corruption, not a database).
    #[error("Cannot open datastore {}: {source}", path.display())]
    Open {
        /// Database path.
        path: PathBuf,
        /// Underlying SQLite error.
        source: rusqlite::Error,
    },

    /// The file opened but the schema could not be created or verified.
    #[error("Cannot prepare datastore schema in {}: {source}", path.display())]
    Schema {
        /// Database path.
        path: PathBuf,
        /// Underlying SQLite error.
        source: rusqlite::Error,
    },
}

/// A single append failed. The process keeps running.
#[derive(Debug, Error)]
pub enum StorageWriteError {
    /// A row for this device and timestamp already exists.
    #[error("Sighting of {device_id} at {observed_at} is already stored")]
    Duplicate {
        /// Device of the rejected row.
        device_id: String,
        /// Timestamp of the rejected row.
        observed_at: String,
    },

    /// SQLite reported an error (I/O, disk full, locked past the busy timeout).
    #[error("Datastore write failed: {0}")]
    Database(#[from] rusqlite::Error),

    /// The datastore was closed during shutdown.
    #[error("Datastore is closed")]
    Closed,

    /// The blocking write task did not complete.
    #[error("Datastore write task failed: {0}")]
    TaskFailed(String),
}

/// A stored sighting with its row identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSighting {
    /// Auto-assigned row id; only meaningful for ordering.
    pub id: i64,
    /// The persisted record.
    pub sighting: Sighting,
}

/// Handle to the sightings database. Cheap to clone; clones share one connection.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Storage {
    /// Open (creating if needed) the database at `path` and ensure the schema exists.
    ///
    /// Safe to call on every startup: existing rows are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StorageInitError`] if the file cannot be created, opened or prepared.
    pub fn initialize(path: impl AsRef<Path>) -> Result<Self, StorageInitError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageInitError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&path, flags).map_err(|source| {
            StorageInitError::Open {
                path: path.clone(),
                source,
            }
        })?;

        let schema_error = |source| StorageInitError::Schema {
            path: path.clone(),
            source,
        };
        apply_pragmas(&conn).map_err(schema_error)?;
        conn.execute_batch(SCHEMA).map_err(schema_error)?;

        tracing::info!(path = %path.display(), "Datastore initialized");

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Insert one sighting and return its row id. Committed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`StorageWriteError::Duplicate`] when the device/timestamp pair
    /// is already stored, [`StorageWriteError::Closed`] after shutdown, and
    /// [`StorageWriteError::Database`] for any other SQLite failure.
    pub fn append(&self, sighting: &Sighting) -> Result<i64, StorageWriteError> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StorageWriteError::Closed)?;

        let observed_at = format_timestamp(sighting.observed_at);
        let result = conn.execute(
            "INSERT INTO sightings
                (device_id, rssi, observed_at, tag, tag_kind, raw_payload, gateway, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sighting.device_id.as_str(),
                sighting.rssi,
                observed_at,
                sighting.tag,
                sighting.tag_kind,
                sighting.raw_payload,
                sighting.gateway.map(|ip| ip.to_string()),
                format_timestamp(Utc::now()),
            ],
        );

        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StorageWriteError::Duplicate {
                    device_id: sighting.device_id.to_string(),
                    observed_at,
                })
            }
            Err(err) => Err(StorageWriteError::Database(err)),
        }
    }

    /// [`Storage::append`] on the blocking thread pool, for async callers.
    ///
    /// # Errors
    ///
    /// See [`Storage::append`]; also fails if the blocking task panics.
    pub async fn append_blocking(&self, sighting: Sighting) -> Result<i64, StorageWriteError> {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || storage.append(&sighting))
            .await
            .map_err(|e| StorageWriteError::TaskFailed(e.to_string()))?
    }

    /// Total stored sightings.
    ///
    /// # Errors
    ///
    /// Returns an error if the datastore is closed or the query fails.
    pub fn count(&self) -> Result<u64, StorageWriteError> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StorageWriteError::Closed)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sightings", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// All stored sightings of one device, oldest row first.
    ///
    /// # Errors
    ///
    /// Returns an error if the datastore is closed or the query fails.
    pub fn sightings_for(&self, device_id: &DeviceId) -> Result<Vec<StoredSighting>, StorageWriteError> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StorageWriteError::Closed)?;

        let mut stmt = conn.prepare(
            "SELECT id, device_id, rssi, observed_at, tag, tag_kind, raw_payload, gateway
             FROM sightings WHERE device_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![device_id.as_str()], read_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageWriteError::from)
    }

    /// Release the connection. Later calls fail with [`StorageWriteError::Closed`].
    pub fn close(&self) {
        let Some(conn) = self.lock().take() else {
            return;
        };
        match conn.close() {
            Ok(()) => tracing::info!(path = %self.path.display(), "Datastore closed"),
            Err((_, err)) => {
                tracing::error!(path = %self.path.display(), error = %err, "Datastore close failed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A panic mid-statement leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA synchronous = FULL;")?;
    conn.busy_timeout(BUSY_TIMEOUT)
}

/// Fixed-width RFC 3339 so text order matches time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredSighting> {
    let text_error = |idx: usize, err: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            err.into(),
        )
    };

    let device_id: String = row.get(1)?;
    let observed_at: String = row.get(3)?;
    let gateway: Option<String> = row.get(7)?;

    Ok(StoredSighting {
        id: row.get(0)?,
        sighting: Sighting {
            device_id: DeviceId::parse(&device_id).map_err(|e| text_error(1, e.to_string()))?,
            rssi: row.get(2)?,
            observed_at: DateTime::parse_from_rfc3339(&observed_at)
                .map_err(|e| text_error(3, e.to_string()))?
                .with_timezone(&Utc),
            tag: row.get(4)?,
            tag_kind: row.get(5)?,
            raw_payload: row.get(6)?,
            gateway: gateway
                .map(|g| g.parse::<IpAddr>())
                .transpose()
                .map_err(|e| text_error(7, e.to_string()))?,
        },
    })
}
