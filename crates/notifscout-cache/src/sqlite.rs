use crate::cache::Cache;
use crate::envelope::{now_millis, Envelope};
use crate::error::Result;
use crate::metrics::{CacheMetrics, CacheStats};
use crate::prefetch::PrefetchQueue;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DB_FILE: &str = "cache.db";

/// Persistent cache on SQLite
///
/// SQLite was chosen because:
/// - Zero-config embedded database
/// - B-tree storage with a single writer, so no torn entries
/// - Doesn't require a separate process
///
/// Each cache instance owns one table (its "bucket"); rows hold the encoded
/// envelope plus a copy of the expiry so stale rows can be swept in bulk.
pub struct SqliteCache {
    conn: Mutex<Connection>,
    table: String,
    metrics: Arc<CacheMetrics>,
    prefetch: PrefetchQueue,
}

impl SqliteCache {
    /// Open (or create) `dir/cache.db` and make sure the bucket table exists
    pub fn open(dir: &Path, bucket: &str, prefetch_queue_size: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;

        let table = format!("\"{}\"", bucket);
        Self::init_schema(&conn, &table)?;
        info!("Opened SQLite cache at {:?} (bucket {})", db_path, bucket);

        let metrics = Arc::new(CacheMetrics::new());
        let prefetch = PrefetchQueue::spawn("sqlite", prefetch_queue_size, Arc::clone(&metrics))?;

        Ok(Self {
            conn: Mutex::new(conn),
            table,
            metrics,
            prefetch,
        })
    }

    fn init_schema(conn: &Connection, table: &str) -> rusqlite::Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    key        TEXT PRIMARY KEY,
                    envelope   BLOB NOT NULL,
                    expires_at INTEGER
                )",
                table
            ),
            [],
        )?;
        Ok(())
    }

    /// Remove every expired row in one statement. Returns how many went away.
    pub fn purge_expired(&self) -> usize {
        let conn = self.conn.lock();
        let sql = format!(
            "DELETE FROM {} WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            self.table
        );
        match conn.execute(&sql, params![now_millis()]) {
            Ok(removed) => {
                debug!("Purged {} expired cache rows", removed);
                removed
            }
            Err(e) => {
                warn!("Failed to purge expired cache rows: {}", e);
                self.metrics.record_error();
                0
            }
        }
    }

    fn delete_row(&self, conn: &Connection, key: &str) {
        let sql = format!("DELETE FROM {} WHERE key = ?1", self.table);
        if let Err(e) = conn.execute(&sql, params![key]) {
            warn!("Failed to delete cache key {}: {}", key, e);
            self.metrics.record_error();
        }
    }
}

impl Cache for SqliteCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.metrics.record_get();
        let conn = self.conn.lock();

        let sql = format!("SELECT envelope FROM {} WHERE key = ?1", self.table);
        let blob: Option<Vec<u8>> = match conn
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()
        {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                self.metrics.record_error();
                None
            }
        };

        let Some(blob) = blob else {
            self.metrics.record_miss();
            return None;
        };

        match Envelope::decode(&blob) {
            Ok(envelope) if !envelope.is_expired() => {
                self.metrics.record_hit();
                Some(envelope.value)
            }
            Ok(_) => {
                self.delete_row(&conn, key);
                self.metrics.record_miss();
                None
            }
            Err(e) => {
                warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.metrics.record_error();
                self.delete_row(&conn, key);
                self.metrics.record_miss();
                None
            }
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) {
        self.metrics.record_set();

        let envelope = Envelope::new(value, ttl);
        let encoded = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode cache entry {}: {}", key, e);
                self.metrics.record_error();
                return;
            }
        };

        let sql = format!(
            "INSERT OR REPLACE INTO {} (key, envelope, expires_at) VALUES (?1, ?2, ?3)",
            self.table
        );
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(&sql, params![key, encoded, envelope.expires_at]) {
            warn!("Cache write failed for {}: {}", key, e);
            self.metrics.record_error();
        }
    }

    fn delete(&self, key: &str) {
        self.metrics.record_delete();
        let conn = self.conn.lock();
        self.delete_row(&conn, key);
    }

    fn clear(&self) {
        self.metrics.record_clear();
        let conn = self.conn.lock();

        let result = conn
            .execute(&format!("DROP TABLE IF EXISTS {}", self.table), [])
            .and_then(|_| Self::init_schema(&conn, &self.table));
        if let Err(e) = result {
            warn!("Failed to clear SQLite cache: {}", e);
            self.metrics.record_error();
        }
    }

    fn prefetch(&self, key: &str) {
        self.prefetch.enqueue(key);
    }

    fn close(&self) {
        self.prefetch.shutdown();
        if let Err(e) = self.conn.lock().execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
            debug!("WAL checkpoint on close failed: {}", e);
        }
    }

    fn metrics(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = SqliteCache::open(dir.path(), "notifications", 8).unwrap();
            cache.set("k", b"persisted", None);
            assert_eq!(cache.get("k"), Some(b"persisted".to_vec()));
            cache.close();
        }

        let cache = SqliteCache::open(dir.path(), "notifications", 8).unwrap();
        assert_eq!(cache.get("k"), Some(b"persisted".to_vec()));
    }

    #[test]
    fn test_buckets_are_isolated() {
        let dir = TempDir::new().unwrap();
        let a = SqliteCache::open(dir.path(), "alpha", 8).unwrap();
        let b = SqliteCache::open(dir.path(), "beta", 8).unwrap();

        a.set("shared", b"from-a", None);
        assert_eq!(b.get("shared"), None);

        a.clear();
        assert_eq!(a.get("shared"), None);
    }

    #[test]
    fn test_expired_rows_are_deleted() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(dir.path(), "notifications", 8).unwrap();

        cache.set("gone", b"x", Some(Duration::from_millis(10)));
        cache.set("stays", b"y", None);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("gone"), None);
        assert_eq!(cache.get("stays"), Some(b"y".to_vec()));
    }

    #[test]
    fn test_corrupt_row_counts_as_error() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(dir.path(), "notifications", 8).unwrap();
        cache
            .conn
            .lock()
            .execute(
                "INSERT INTO \"notifications\" (key, envelope) VALUES ('bad', x'c1')",
                [],
            )
            .unwrap();

        assert_eq!(cache.get("bad"), None);
        assert_eq!(cache.metrics().errors, 1);
    }
}
