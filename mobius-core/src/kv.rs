//! Ordered key-value engines
//!
//! The object store only needs point reads, point writes and ascending
//! prefix scans. Per-key atomicity and durability are the engine's business.

use crate::error::{PoolError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

/// Key/value pair returned by scans
pub type Entry = (Vec<u8>, Vec<u8>);

/// Ordered key-value store
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// All entries whose key starts with `prefix`, in ascending key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Entry>>;

    /// Push buffered writes to stable storage
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Smallest byte string greater than every key starting with `prefix`
///
/// `None` when no such bound exists (empty or all-`0xFF` prefix).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// In-memory engine
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> PoolError {
    PoolError::Database("store lock poisoned".to_string())
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Entry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// SQLite engine, a single `kv` table keyed by blob
pub struct SqliteKv {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Open or create the database file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| PoolError::Database(format!("Failed to open {:?}: {}", path, e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn, path.to_path_buf())
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID;",
        )?;
        tracing::debug!("Opened SQLite store at {:?}", path);
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(poisoned)
    }
}

impl KvStore for SqliteKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Fold the write-ahead log back into the database file
    fn flush(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Entry>> {
        let conn = self.conn()?;
        let rows = match prefix_successor(prefix) {
            Some(end) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key",
                )?;
                let rows = stmt
                    .query_map(params![prefix, end], entry_from_row)?
                    .collect::<rusqlite::Result<Vec<Entry>>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare_cached("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
                let rows = stmt
                    .query_map(params![prefix], entry_from_row)?
                    .collect::<rusqlite::Result<Vec<Entry>>>()?;
                rows
            }
        };
        Ok(rows)
    }
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    Ok((row.get(0)?, row.get(1)?))
}

/// sled engine
pub struct SledKv {
    db: sled::Db,
}

impl SledKv {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| PoolError::Database(format!("Failed to open sled at {:?}: {}", path, e)))?;
        Ok(Self { db })
    }
}

impl KvStore for SledKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Entry>> {
        self.db
            .scan_prefix(prefix)
            .map(|item| {
                let (k, v) = item?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn KvStore) {
        store.put(b"a\x01", b"1").unwrap();
        store.put(b"a\x02", b"2").unwrap();
        store.put(b"a", b"0").unwrap();
        store.put(b"b", b"3").unwrap();
        store.put(b"a\xff\xff", b"4").unwrap();

        assert_eq!(store.get(b"a\x01").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"zz").unwrap(), None);

        let keys: Vec<Vec<u8>> = store
            .scan_prefix(b"a")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![b"a".to_vec(), b"a\x01".to_vec(), b"a\x02".to_vec(), b"a\xff\xff".to_vec()]
        );
        assert_eq!(store.scan_prefix(b"a\xff").unwrap().len(), 1);
        assert_eq!(store.scan_prefix(b"").unwrap().len(), 5);
        assert!(store.scan_prefix(b"c").unwrap().is_empty());

        store.put(b"b", b"33").unwrap();
        assert_eq!(store.get(b"b").unwrap(), Some(b"33".to_vec()));
        store.flush().unwrap();
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_successor(b"\xff\xff"), None);
        assert_eq!(prefix_successor(b""), None);
    }

    #[test]
    fn test_memory_kv() {
        let store = MemoryKv::new();
        exercise(&store);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_memory_len_after_poisoned_lock() {
        let store = std::sync::Arc::new(MemoryKv::new());
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();

        let writer = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = writer.entries.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(store.entries.is_poisoned());
        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
        assert!(matches!(store.get(b"a"), Err(PoolError::Database(_))));
    }

    #[test]
    fn test_sqlite_kv() {
        let temp = TempDir::new().unwrap();
        let store = SqliteKv::open(&temp.path().join("pool.db")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_sqlite_kv_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("pool.db");
        {
            let store = SqliteKv::open(&path).unwrap();
            store.put(b"k", b"v").unwrap();
        }
        let store = SqliteKv::open(&path).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_sled_kv() {
        let temp = TempDir::new().unwrap();
        let store = SledKv::open(&temp.path().join("pool.sled")).unwrap();
        exercise(&store);
    }
}
