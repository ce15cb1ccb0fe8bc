//! Seen-store: the set of CIDs already enriched, with the content type
//! recorded for each.
//!
//! `MemorySeenStore` lives for the process lifetime. `SqliteSeenStore`
//! persists across restarts so a CID is only ever enriched once per
//! database.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};

use cidwatch_core::config::SeenStoreKind;
use cidwatch_core::Cid;

pub trait SeenStore: Send + Sync {
    /// Content type recorded for `cid`, if it has been enriched.
    fn content_type(&self, cid: &Cid) -> Result<Option<String>, SeenStoreError>;

    fn contains(&self, cid: &Cid) -> Result<bool, SeenStoreError> {
        Ok(self.content_type(cid)?.is_some())
    }

    /// Record `cid` as enriched. A later insert for the same CID replaces
    /// the content type.
    fn insert(&self, cid: &Cid, content_type: &str) -> Result<(), SeenStoreError>;

    fn len(&self) -> Result<usize, SeenStoreError>;

    fn is_empty(&self) -> Result<bool, SeenStoreError> {
        Ok(self.len()? == 0)
    }
}

/// Build the configured store. `path` is only used by the SQLite backend.
pub fn open_seen_store(
    kind: SeenStoreKind,
    path: &Path,
) -> Result<Arc<dyn SeenStore>, SeenStoreError> {
    match kind {
        SeenStoreKind::Memory => Ok(Arc::new(MemorySeenStore::new())),
        SeenStoreKind::Sqlite => {
            let store = SqliteSeenStore::open(path)?;
            tracing::info!(
                path = %path.display(),
                entries = store.len()?,
                "opened persistent seen-store"
            );
            Ok(Arc::new(store))
        }
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemorySeenStore {
    entries: Arc<DashMap<Cid, String>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeenStore for MemorySeenStore {
    fn content_type(&self, cid: &Cid) -> Result<Option<String>, SeenStoreError> {
        Ok(self.entries.get(cid).map(|e| e.value().clone()))
    }

    fn insert(&self, cid: &Cid, content_type: &str) -> Result<(), SeenStoreError> {
        self.entries.insert(cid.clone(), content_type.to_string());
        Ok(())
    }

    fn len(&self) -> Result<usize, SeenStoreError> {
        Ok(self.entries.len())
    }
}

// ── SQLite ────────────────────────────────────────────────────────────────────

pub struct SqliteSeenStore {
    conn: Mutex<Connection>,
}

impl SqliteSeenStore {
    pub fn open(path: &Path) -> Result<Self, SeenStoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, SeenStoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SeenStoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS seen (
                cid TEXT PRIMARY KEY,
                content_type TEXT NOT NULL,
                seen_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SeenStoreError> {
        self.conn.lock().map_err(|_| SeenStoreError::Poisoned)
    }
}

impl SeenStore for SqliteSeenStore {
    fn content_type(&self, cid: &Cid) -> Result<Option<String>, SeenStoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT content_type FROM seen WHERE cid = ?1",
                params![cid.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(found)
    }

    fn insert(&self, cid: &Cid, content_type: &str) -> Result<(), SeenStoreError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO seen (cid, content_type, seen_at) VALUES (?1, ?2, ?3)",
            params![cid.as_str(), content_type, now],
        )?;
        Ok(())
    }

    fn len(&self) -> Result<usize, SeenStoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM seen", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SeenStoreError {
    #[error("seen-store database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("seen-store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("seen-store lock poisoned")]
    Poisoned,
}
