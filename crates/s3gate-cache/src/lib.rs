//! MD5 side-cache for the remote storage provider.
//!
//! Backed by `rusqlite`: the cache needs secondary indexes, aggregate queries, and
//! `VACUUM`, none of which a pure key-value store provides. See DESIGN.md for the
//! full justification.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use s3gate_common::Error;
use tokio::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub workspace_id: String,
    pub bucket: String,
    pub key: String,
    pub md5_hex: String,
    pub size: u64,
    pub remote_id: String,
    pub updated_at_millis: u64,
}

#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub count: u64,
    pub total_size: u64,
    pub oldest_updated_at_millis: Option<u64>,
    pub newest_updated_at_millis: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct VacuumReport {
    pub size_before_bytes: u64,
    pub size_after_bytes: u64,
}

pub struct Md5Cache {
    conn: Mutex<Connection>,
}

impl Md5Cache {
    /// Opens (creating if absent) the cache database at `path`, creating it with mode
    /// `0600` per §4.8.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let existed = path.exists();
        let conn = Connection::open(path).map_err(|err| Error::internal(err.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS md5_cache (
                workspace_id TEXT NOT NULL,
                bucket       TEXT NOT NULL,
                key          TEXT NOT NULL,
                md5_hex      TEXT NOT NULL,
                size         INTEGER NOT NULL,
                remote_id    TEXT NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (workspace_id, bucket, key)
            );
            CREATE INDEX IF NOT EXISTS idx_md5_cache_workspace_bucket
                ON md5_cache (workspace_id, bucket);
            CREATE INDEX IF NOT EXISTS idx_md5_cache_updated_at
                ON md5_cache (updated_at);",
        )
        .map_err(|err| Error::internal(err.to_string()))?;

        #[cfg(unix)]
        if !existed {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path).map_err(|err| Error::internal(err.to_string()))?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms).map_err(|err| Error::internal(err.to_string()))?;
        }

        Ok(Self { conn: Mutex::new(conn) })
    }

    pub async fn get(&self, workspace_id: &str, bucket: &str, key: &str) -> Result<Option<CacheEntry>, Error> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT workspace_id, bucket, key, md5_hex, size, remote_id, updated_at
             FROM md5_cache WHERE workspace_id = ?1 AND bucket = ?2 AND key = ?3",
            params![workspace_id, bucket, key],
            row_to_entry,
        )
        .optional()
        .map_err(|err| Error::internal(err.to_string()))
    }

    /// Synchronous, committed-before-return write, per §4.8 and §4.7's cache-write
    /// requirement after a successful upload.
    pub async fn put(&self, entry: &CacheEntry) -> Result<(), Error> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO md5_cache (workspace_id, bucket, key, md5_hex, size, remote_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(workspace_id, bucket, key) DO UPDATE SET
                md5_hex = excluded.md5_hex,
                size = excluded.size,
                remote_id = excluded.remote_id,
                updated_at = excluded.updated_at",
            params![
                entry.workspace_id,
                entry.bucket,
                entry.key,
                entry.md5_hex,
                entry.size,
                entry.remote_id,
                entry.updated_at_millis,
            ],
        )
        .map_err(|err| Error::internal(err.to_string()))?;
        Ok(())
    }

    pub async fn delete(&self, workspace_id: &str, bucket: &str, key: &str) -> Result<(), Error> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM md5_cache WHERE workspace_id = ?1 AND bucket = ?2 AND key = ?3",
            params![workspace_id, bucket, key],
        )
        .map_err(|err| Error::internal(err.to_string()))?;
        Ok(())
    }

    pub async fn stats(&self, workspace_id: Option<&str>) -> Result<CacheStats, Error> {
        let conn = self.conn.lock().await;
        let (count, total_size, oldest, newest): (u64, i64, Option<i64>, Option<i64>) = match workspace_id {
            Some(ws) => conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size), 0), MIN(updated_at), MAX(updated_at)
                     FROM md5_cache WHERE workspace_id = ?1",
                    params![ws],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .map_err(|err| Error::internal(err.to_string()))?,
            None => conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size), 0), MIN(updated_at), MAX(updated_at) FROM md5_cache",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .map_err(|err| Error::internal(err.to_string()))?,
        };

        Ok(CacheStats {
            count,
            total_size: total_size as u64,
            oldest_updated_at_millis: oldest.map(|v| v as u64),
            newest_updated_at_millis: newest.map(|v| v as u64),
        })
    }

    /// Range-deletes cache entries for `workspace`, optionally scoped to `bucket`.
    /// Returns the number of rows removed.
    pub async fn cleanup(&self, workspace_id: &str, bucket: Option<&str>) -> Result<u64, Error> {
        let conn = self.conn.lock().await;
        let removed = match bucket {
            Some(bucket) => conn
                .execute(
                    "DELETE FROM md5_cache WHERE workspace_id = ?1 AND bucket = ?2",
                    params![workspace_id, bucket],
                )
                .map_err(|err| Error::internal(err.to_string()))?,
            None => conn
                .execute("DELETE FROM md5_cache WHERE workspace_id = ?1", params![workspace_id])
                .map_err(|err| Error::internal(err.to_string()))?,
        };
        Ok(removed as u64)
    }

    /// Reclaims free pages, reporting the file size before and after.
    pub async fn vacuum(&self, db_path: impl AsRef<Path>) -> Result<VacuumReport, Error> {
        let db_path = db_path.as_ref();
        let size_before_bytes = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

        let conn = self.conn.lock().await;
        conn.execute_batch("VACUUM;").map_err(|err| Error::internal(err.to_string()))?;
        drop(conn);

        let size_after_bytes = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);
        Ok(VacuumReport { size_before_bytes, size_after_bytes })
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        workspace_id: row.get(0)?,
        bucket: row.get(1)?,
        key: row.get(2)?,
        md5_hex: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        remote_id: row.get(5)?,
        updated_at_millis: row.get::<_, i64>(6)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry {
            workspace_id: "ws1".to_string(),
            bucket: "photos".to_string(),
            key: key.to_string(),
            md5_hex: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            size: 0,
            remote_id: "file-1".to_string(),
            updated_at_millis: now_millis(),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Md5Cache::open(dir.path().join("cache.sqlite")).unwrap();

        cache.put(&entry("a.txt")).await.unwrap();
        let fetched = cache.get("ws1", "photos", "a.txt").await.unwrap().unwrap();
        assert_eq!(fetched.md5_hex, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Md5Cache::open(dir.path().join("cache.sqlite")).unwrap();
        assert!(cache.get("ws1", "photos", "missing.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_upserts_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Md5Cache::open(dir.path().join("cache.sqlite")).unwrap();

        cache.put(&entry("a.txt")).await.unwrap();
        let mut updated = entry("a.txt");
        updated.size = 42;
        cache.put(&updated).await.unwrap();

        let fetched = cache.get("ws1", "photos", "a.txt").await.unwrap().unwrap();
        assert_eq!(fetched.size, 42);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Md5Cache::open(dir.path().join("cache.sqlite")).unwrap();
        cache.put(&entry("a.txt")).await.unwrap();
        cache.delete("ws1", "photos", "a.txt").await.unwrap();
        assert!(cache.get("ws1", "photos", "a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_aggregates_across_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Md5Cache::open(dir.path().join("cache.sqlite")).unwrap();
        let mut e1 = entry("a.txt");
        e1.size = 10;
        let mut e2 = entry("b.txt");
        e2.size = 20;
        cache.put(&e1).await.unwrap();
        cache.put(&e2).await.unwrap();

        let stats = cache.stats(Some("ws1")).await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 30);
    }

    #[tokio::test]
    async fn cleanup_scoped_to_bucket_leaves_other_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Md5Cache::open(dir.path().join("cache.sqlite")).unwrap();
        cache.put(&entry("a.txt")).await.unwrap();
        let mut other_bucket = entry("b.txt");
        other_bucket.bucket = "videos".to_string();
        cache.put(&other_bucket).await.unwrap();

        let removed = cache.cleanup("ws1", Some("photos")).await.unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get("ws1", "videos", "b.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn vacuum_reports_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cache.sqlite");
        let cache = Md5Cache::open(&db_path).unwrap();
        cache.put(&entry("a.txt")).await.unwrap();

        let report = cache.vacuum(&db_path).await.unwrap();
        assert!(report.size_after_bytes > 0);
    }
}
