//! Durable paste storage backed by a RocksDB transaction database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use rocksdb::{DBCompressionType, IteratorMode, Options, TransactionDB, TransactionDBOptions};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::paste::Paste;

/// Key read by the health check. It can never collide with a short code.
const HEALTH_CHECK_KEY: &[u8] = b"\0healthz";

/// How long a transaction waits for a row lock before giving up with a
/// store error. Each holder keeps the lock for one read and one write, so
/// this only runs out when the backend itself is stuck.
const LOCK_TIMEOUT_MS: i64 = 10_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a paste with id {0:?} already exists")]
    DuplicateKey(String),
    #[error("constraint violated: {0}")]
    ConstraintViolation(&'static str),
    #[error("store unavailable: {0}")]
    Unavailable(#[from] rocksdb::Error),
    #[error("stored paste could not be decoded: {0}")]
    Codec(#[from] bincode::Error),
}

/// Everything the consumption policy needs from persistence.
pub trait PasteStore {
    /// Inserts a new paste with `remaining_views` set to `max_views`.
    fn create(
        &self,
        id: &str,
        content: String,
        expires_at: Option<DateTime<Utc>>,
        max_views: Option<u32>,
    ) -> Result<Paste, StoreError>;

    /// Plain point read; applies no expiry or view rules.
    fn lookup(&self, id: &str) -> Result<Option<Paste>, StoreError>;

    /// Atomically takes one view off a view-limited paste. Returns the
    /// updated paste, or `None` if the paste is missing, unlimited, or
    /// already exhausted.
    fn conditional_decrement(&self, id: &str) -> Result<Option<Paste>, StoreError>;

    /// Reports whether the backing store answers; never fails.
    fn health_check(&self) -> bool;
}

/// Process-wide database handle, opened lazily on first use.
///
/// A failed open is not cached, so the next call tries again.
pub struct Connection {
    path: PathBuf,
    db: OnceCell<TransactionDB>,
}

impl Connection {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Result<&TransactionDB, StoreError> {
        self.db
            .get_or_try_init(|| {
                info!(path = ?self.path, "Opening paste database");
                let mut opts = Options::default();
                opts.create_if_missing(true);
                opts.set_compression_type(DBCompressionType::Zstd);
                let mut txn_opts = TransactionDBOptions::default();
                txn_opts.set_txn_lock_timeout(LOCK_TIMEOUT_MS);
                txn_opts.set_default_lock_timeout(LOCK_TIMEOUT_MS);
                TransactionDB::open(&opts, &txn_opts, &self.path)
            })
            .map_err(StoreError::from)
    }
}

pub struct RocksStore {
    conn: Arc<Connection>,
}

impl RocksStore {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// Deletes every paste that can no longer be read: expired at `now`, or
    /// out of views. Both states are final, so removing them is invisible to
    /// readers. Returns how many pastes were removed.
    #[instrument(skip(self), err)]
    pub fn purge_unreadable(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let db = self.conn.get()?;

        let mut doomed = Vec::new();
        for item in db.iterator(IteratorMode::Start) {
            let (key, value) = item?;
            match bincode::deserialize::<Paste>(&value) {
                Ok(paste) if paste.expired(now) || paste.exhausted() => doomed.push(key),
                Ok(_) => (),
                Err(e) => warn!("Skipping undecodable paste during cleanup: {}", e),
            }
        }

        if doomed.is_empty() {
            return Ok(0);
        }

        let txn = db.transaction();
        for key in &doomed {
            txn.delete(key)?;
        }
        txn.commit()?;

        Ok(doomed.len())
    }
}

impl PasteStore for RocksStore {
    #[instrument(skip(self, content), err)]
    fn create(
        &self,
        id: &str,
        content: String,
        expires_at: Option<DateTime<Utc>>,
        max_views: Option<u32>,
    ) -> Result<Paste, StoreError> {
        if max_views == Some(0) {
            return Err(StoreError::ConstraintViolation("max_views must be at least 1"));
        }

        let db = self.conn.get()?;
        let paste = Paste::new(id, content, Utc::now(), expires_at, max_views);
        let value = bincode::serialize(&paste)?;

        // Holding the key lock makes the existence check and the insert one
        // unit, the same as a primary key constraint.
        let txn = db.transaction();
        if txn.get_for_update(id, true)?.is_some() {
            return Err(StoreError::DuplicateKey(id.to_string()));
        }
        txn.put(id, value)?;
        txn.commit()?;

        Ok(paste)
    }

    #[instrument(skip(self), err)]
    fn lookup(&self, id: &str) -> Result<Option<Paste>, StoreError> {
        let db = self.conn.get()?;
        match db.get(id)? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    fn conditional_decrement(&self, id: &str) -> Result<Option<Paste>, StoreError> {
        let db = self.conn.get()?;

        // The row lock is held from the read until commit or drop, so
        // concurrent decrements of the same paste run one after another and
        // each sees the count the previous one left behind.
        let txn = db.transaction();
        let data = match txn.get_for_update(id, true)? {
            Some(data) => data,
            None => return Ok(None),
        };

        let mut paste: Paste = bincode::deserialize(&data)?;
        let remaining = match paste.remaining_views.and_then(|n| n.checked_sub(1)) {
            Some(remaining) => remaining,
            None => return Ok(None),
        };

        paste.remaining_views = Some(remaining);
        txn.put(id, bincode::serialize(&paste)?)?;
        txn.commit()?;

        Ok(Some(paste))
    }

    fn health_check(&self) -> bool {
        match self
            .conn
            .get()
            .and_then(|db| db.get(HEALTH_CHECK_KEY).map_err(StoreError::from))
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn temp_store() -> (RocksStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let conn = Arc::new(Connection::new(dir.path().join("db")));
    (RocksStore::new(conn), dir)
}

/// A store whose database can never open: its path sits under a regular
/// file.
#[cfg(test)]
pub(crate) fn unopenable_store() -> (RocksStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").expect("create blocking file");
    let conn = Arc::new(Connection::new(blocker.join("db")));
    (RocksStore::new(conn), dir)
}
