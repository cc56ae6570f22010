// crates/uplink-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Lease Store
// Description: Durable LeaseStore backed by SQLite WAL with TTL columns.
// Purpose: Persist leases, records, hashes, and lists across restarts.
// Dependencies: rusqlite, serde, thiserror, uplink-gate-core
// ============================================================================

//! ## Overview
//! Every operation runs in one transaction on a mutex-guarded connection, so
//! the single-key atomicity the [`LeaseStore`] contract demands holds even
//! across processes sharing the database file. Expiry is lazy: each operation
//! sweeps the touched key before acting, which makes expired state
//! unobservable without a background vacuum. Hash keys expire as a whole; a
//! field write refreshes the containing key's TTL.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use uplink_gate_core::LeaseStore;
use uplink_gate_core::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` lease store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteLeaseStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding stored values.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite lease store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite lease store db error: {0}")]
    Db(String),
    /// Invalid store data or configuration.
    #[error("sqlite lease store invalid data: {0}")]
    Invalid(String),
    /// Store schema version mismatch.
    #[error("sqlite lease store version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Backend(message)
            }
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Maps a `rusqlite` error into a store error.
fn db_err(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed lease store with WAL support.
///
/// # Invariants
/// - Connection access is serialized through a mutex; every public operation
///   is one transaction.
#[derive(Debug, Clone)]
pub struct SqliteLeaseStore {
    /// Guarded database connection.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteLeaseStore {
    /// Opens an `SQLite`-backed lease store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteLeaseStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Runs one operation inside a transaction on the guarded connection.
    fn with_tx<T>(
        &self,
        operation: impl FnOnce(&Transaction<'_>, i64) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(db_err)?;
        let result = operation(&tx, unix_millis())?;
        tx.commit().map_err(db_err)?;
        Ok(result)
    }
}

/// Converts a TTL into an absolute expiry timestamp.
fn expiry(ttl: Option<Duration>, now: i64) -> Option<i64> {
    ttl.map(|ttl| now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
}

/// Deletes the value row for `key` when it expired.
fn sweep_value(tx: &Transaction<'_>, key: &str, now: i64) -> Result<(), SqliteStoreError> {
    tx.execute(
        "DELETE FROM kv WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
        params![key, now],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Deletes the hash rows for `key` when the hash expired.
fn sweep_hash(tx: &Transaction<'_>, key: &str, now: i64) -> Result<(), SqliteStoreError> {
    let expired: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM hash_meta WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at \
             <= ?2",
            params![key, now],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if expired.is_some() {
        tx.execute("DELETE FROM hashes WHERE key = ?1", params![key]).map_err(db_err)?;
        tx.execute("DELETE FROM hash_meta WHERE key = ?1", params![key]).map_err(db_err)?;
    }
    Ok(())
}

/// Deletes the list rows for `key` when the list expired.
fn sweep_list(tx: &Transaction<'_>, key: &str, now: i64) -> Result<(), SqliteStoreError> {
    let expired: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM list_meta WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at \
             <= ?2",
            params![key, now],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if expired.is_some() {
        tx.execute("DELETE FROM lists WHERE key = ?1", params![key]).map_err(db_err)?;
        tx.execute("DELETE FROM list_meta WHERE key = ?1", params![key]).map_err(db_err)?;
    }
    Ok(())
}

/// Deletes the lease row for `key` when it expired.
fn sweep_lease(tx: &Transaction<'_>, key: &str, now: i64) -> Result<(), SqliteStoreError> {
    tx.execute("DELETE FROM leases WHERE key = ?1 AND expires_at <= ?2", params![key, now])
        .map_err(db_err)?;
    Ok(())
}

impl LeaseStore for SqliteLeaseStore {
    fn acquire_once(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_tx(|tx, now| {
            sweep_lease(tx, key, now)?;
            let deadline = now
                .saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
            let holder: Option<String> = tx
                .query_row("SELECT owner FROM leases WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(db_err)?;
            match holder {
                Some(current) if current == owner => {
                    tx.execute(
                        "UPDATE leases SET expires_at = ?2 WHERE key = ?1",
                        params![key, deadline],
                    )
                    .map_err(db_err)?;
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => {
                    tx.execute(
                        "INSERT INTO leases (key, owner, expires_at) VALUES (?1, ?2, ?3)",
                        params![key, owner, deadline],
                    )
                    .map_err(db_err)?;
                    Ok(true)
                }
            }
        })
        .map_err(StoreError::from)
    }

    fn release(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        self.with_tx(|tx, now| {
            sweep_lease(tx, key, now)?;
            let released = tx
                .execute("DELETE FROM leases WHERE key = ?1 AND owner = ?2", params![key, owner])
                .map_err(db_err)?;
            Ok(released > 0)
        })
        .map_err(StoreError::from)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_tx(|tx, now| {
            sweep_value(tx, key, now)?;
            tx.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
                .optional()
                .map_err(db_err)
        })
        .map_err(StoreError::from)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.with_tx(|tx, now| {
            tx.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
                params![key, value, expiry(ttl, now)],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.with_tx(|tx, now| {
            sweep_value(tx, key, now)?;
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
                    params![key, value, expiry(ttl, now)],
                )
                .map_err(db_err)?;
            Ok(inserted > 0)
        })
        .map_err(StoreError::from)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.with_tx(|tx, now| {
            sweep_value(tx, key, now)?;
            sweep_hash(tx, key, now)?;
            sweep_list(tx, key, now)?;
            let mut existed = tx
                .execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(db_err)?
                > 0;
            existed |= tx
                .execute("DELETE FROM hashes WHERE key = ?1", params![key])
                .map_err(db_err)?
                > 0;
            tx.execute("DELETE FROM hash_meta WHERE key = ?1", params![key]).map_err(db_err)?;
            existed |= tx
                .execute("DELETE FROM lists WHERE key = ?1", params![key])
                .map_err(db_err)?
                > 0;
            tx.execute("DELETE FROM list_meta WHERE key = ?1", params![key]).map_err(db_err)?;
            Ok(existed)
        })
        .map_err(StoreError::from)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.with_tx(|tx, now| {
            sweep_value(tx, key, now)?;
            sweep_hash(tx, key, now)?;
            sweep_list(tx, key, now)?;
            let in_kv: Option<i64> = tx
                .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |row| row.get(0))
                .optional()
                .map_err(db_err)?;
            if in_kv.is_some() {
                return Ok(true);
            }
            let in_hash: Option<i64> = tx
                .query_row("SELECT 1 FROM hashes WHERE key = ?1 LIMIT 1", params![key], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(db_err)?;
            if in_hash.is_some() {
                return Ok(true);
            }
            let in_list: Option<i64> = tx
                .query_row("SELECT 1 FROM lists WHERE key = ?1 LIMIT 1", params![key], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(db_err)?;
            Ok(in_list.is_some())
        })
        .map_err(StoreError::from)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_tx(|tx, now| {
            sweep_value(tx, key, now)?;
            sweep_hash(tx, key, now)?;
            sweep_list(tx, key, now)?;
            let deadline = expiry(Some(ttl), now);
            let mut updated = tx
                .execute("UPDATE kv SET expires_at = ?2 WHERE key = ?1", params![key, deadline])
                .map_err(db_err)?
                > 0;
            updated |= tx
                .execute(
                    "UPDATE hash_meta SET expires_at = ?2 WHERE key = ?1",
                    params![key, deadline],
                )
                .map_err(db_err)?
                > 0;
            updated |= tx
                .execute(
                    "UPDATE list_meta SET expires_at = ?2 WHERE key = ?1",
                    params![key, deadline],
                )
                .map_err(db_err)?
                > 0;
            Ok(updated)
        })
        .map_err(StoreError::from)
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.with_tx(|tx, now| {
            sweep_hash(tx, key, now)?;
            tx.query_row(
                "SELECT value FROM hashes WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })
        .map_err(StoreError::from)
    }

    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        self.with_tx(|tx, now| {
            sweep_hash(tx, key, now)?;
            let mut stmt = tx
                .prepare("SELECT field, value FROM hashes WHERE key = ?1 ORDER BY field")
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![key], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(db_err)?;
            let mut entries = BTreeMap::new();
            for row in rows {
                let (field, value) = row.map_err(db_err)?;
                entries.insert(field, value);
            }
            Ok(entries)
        })
        .map_err(StoreError::from)
    }

    fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.with_tx(|tx, now| {
            sweep_hash(tx, key, now)?;
            tx.execute(
                "INSERT INTO hashes (key, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, field) DO UPDATE SET value = ?3",
                params![key, field, value],
            )
            .map_err(db_err)?;
            match expiry(ttl, now) {
                Some(deadline) => {
                    tx.execute(
                        "INSERT INTO hash_meta (key, expires_at) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET expires_at = ?2",
                        params![key, deadline],
                    )
                    .map_err(db_err)?;
                }
                None => {
                    tx.execute(
                        "INSERT OR IGNORE INTO hash_meta (key, expires_at) VALUES (?1, NULL)",
                        params![key],
                    )
                    .map_err(db_err)?;
                }
            }
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn hash_replace_all(
        &self,
        key: &str,
        entries: &BTreeMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.with_tx(|tx, now| {
            tx.execute("DELETE FROM hashes WHERE key = ?1", params![key]).map_err(db_err)?;
            for (field, value) in entries {
                tx.execute(
                    "INSERT INTO hashes (key, field, value) VALUES (?1, ?2, ?3)",
                    params![key, field, value],
                )
                .map_err(db_err)?;
            }
            tx.execute(
                "INSERT INTO hash_meta (key, expires_at) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET expires_at = ?2",
                params![key, expiry(ttl, now)],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        self.with_tx(|tx, now| {
            sweep_hash(tx, key, now)?;
            let deleted = tx
                .execute(
                    "DELETE FROM hashes WHERE key = ?1 AND field = ?2",
                    params![key, field],
                )
                .map_err(db_err)?;
            Ok(deleted > 0)
        })
        .map_err(StoreError::from)
    }

    fn list_append(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<usize, StoreError> {
        self.with_tx(|tx, now| {
            sweep_list(tx, key, now)?;
            let next_seq: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq) + 1, 0) FROM lists WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            tx.execute(
                "INSERT INTO lists (key, seq, value) VALUES (?1, ?2, ?3)",
                params![key, next_seq, value],
            )
            .map_err(db_err)?;
            match expiry(ttl, now) {
                Some(deadline) => {
                    tx.execute(
                        "INSERT INTO list_meta (key, expires_at) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET expires_at = ?2",
                        params![key, deadline],
                    )
                    .map_err(db_err)?;
                }
                None => {
                    tx.execute(
                        "INSERT OR IGNORE INTO list_meta (key, expires_at) VALUES (?1, NULL)",
                        params![key],
                    )
                    .map_err(db_err)?;
                }
            }
            let count: i64 = tx
                .query_row("SELECT COUNT(1) FROM lists WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .map_err(db_err)?;
            usize::try_from(count)
                .map_err(|_| SqliteStoreError::Invalid("list length overflow".to_string()))
        })
        .map_err(StoreError::from)
    }

    fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.with_tx(|tx, now| {
            sweep_list(tx, key, now)?;
            let mut stmt = tx
                .prepare("SELECT value FROM lists WHERE key = ?1 ORDER BY seq ASC")
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![key], |row| row.get::<_, String>(0))
                .map_err(db_err)?;
            let mut values = Vec::new();
            for row in rows {
                values.push(row.map_err(db_err)?);
            }
            Ok(values)
        })
        .map_err(StoreError::from)
    }

    fn list_trim(&self, key: &str, max_len: usize) -> Result<(), StoreError> {
        self.with_tx(|tx, now| {
            sweep_list(tx, key, now)?;
            let count: i64 = tx
                .query_row("SELECT COUNT(1) FROM lists WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .map_err(db_err)?;
            let max_len = i64::try_from(max_len)
                .map_err(|_| SqliteStoreError::Invalid("trim length overflow".to_string()))?;
            if count > max_len {
                let surplus = count - max_len;
                tx.execute(
                    "DELETE FROM lists WHERE key = ?1 AND seq IN (
                         SELECT seq FROM lists WHERE key = ?1 ORDER BY seq ASC LIMIT ?2
                     )",
                    params![key, surplus],
                )
                .map_err(db_err)?;
            }
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.with_tx(|tx, _now| {
            tx.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).map_err(db_err)?;
            Ok(())
        })
        .map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Creates the parent directory of the store file when missing.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteLeaseStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_err)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_err)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_err)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_err)?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_err)?;
    Ok(connection)
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_err)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_err)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_err)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_err)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    expires_at INTEGER
                );
                CREATE TABLE IF NOT EXISTS hashes (
                    key TEXT NOT NULL,
                    field TEXT NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (key, field)
                );
                CREATE TABLE IF NOT EXISTS hash_meta (
                    key TEXT PRIMARY KEY,
                    expires_at INTEGER
                );
                CREATE TABLE IF NOT EXISTS lists (
                    key TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (key, seq)
                );
                CREATE TABLE IF NOT EXISTS list_meta (
                    key TEXT PRIMARY KEY,
                    expires_at INTEGER
                );
                CREATE TABLE IF NOT EXISTS leases (
                    key TEXT PRIMARY KEY,
                    owner TEXT NOT NULL,
                    expires_at INTEGER NOT NULL
                );",
            )
            .map_err(db_err)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_err)?;
    Ok(())
}

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
