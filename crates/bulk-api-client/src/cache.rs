//! Two-level query page cache with TTL-based expiration.
//!
//! Pages are keyed by the fingerprint of their request parameters:
//! - an LRU in memory answers repeated queries within one process
//! - a directory on disk (`<fingerprint>.body` + `<fingerprint>.json`)
//!   survives restarts and is shared by every client pointed at it
//!
//! # Staleness Behavior
//!
//! An entry older than the TTL is reported as absent; the next store for the
//! same fingerprint overwrites it in place. Entries that fail to parse are
//! discarded the same way. Concurrent writers to one fingerprint race
//! harmlessly since they write the same logical content.
//!
//! The metadata file is written after the body, so a reader that finds the
//! metadata also finds a complete body.

use crate::error::{ClientError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One cached query page.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPage {
    /// Raw page body as received
    pub body: Bytes,
    /// Total page count reported alongside the body
    pub page_count: i64,
    /// When the page was fetched
    pub stored_at: DateTime<Utc>,
}

impl CachedPage {
    /// Wrap a freshly fetched page.
    pub fn new(body: Bytes, page_count: i64) -> Self {
        Self {
            body,
            page_count,
            stored_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        let age = Utc::now()
            .signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or_default();
        age >= ttl
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PageMeta {
    page_count: i64,
    stored_at: DateTime<Utc>,
}

/// Query page cache shared by every model of a client.
pub struct ResponseCache {
    memory: Arc<Mutex<LruCache<String, Arc<CachedPage>>>>,
    dir: PathBuf,
    ttl: Duration,
}

impl ResponseCache {
    /// Create a cache rooted at `dir`.
    ///
    /// Set `ttl` to `Duration::ZERO` to disable caching; the directory is
    /// then never touched.
    pub fn new(dir: impl Into<PathBuf>, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            memory: Arc::new(Mutex::new(LruCache::new(capacity))),
            dir: dir.into(),
            ttl,
        }
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn body_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.body", fingerprint))
    }

    fn meta_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint))
    }

    /// Get a page if present and not expired.
    pub async fn get(&self, fingerprint: &str) -> Option<Arc<CachedPage>> {
        if self.ttl.is_zero() {
            return None;
        }

        {
            let mut memory = self.memory.lock().await;
            if let Some(entry) = memory.get(fingerprint) {
                if !entry.is_expired(self.ttl) {
                    tracing::debug!(fingerprint = %fingerprint, "Memory cache hit");
                    return Some(entry.clone());
                }
                tracing::debug!(fingerprint = %fingerprint, "Memory cache entry expired");
                memory.pop(fingerprint);
            }
        }

        let page = match self.read_disk(fingerprint).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                tracing::debug!(fingerprint = %fingerprint, "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Discarding unreadable cache entry");
                return None;
            }
        };

        if page.is_expired(self.ttl) {
            tracing::debug!(fingerprint = %fingerprint, "Disk cache entry expired");
            return None;
        }

        tracing::debug!(fingerprint = %fingerprint, "Disk cache hit");
        let page = Arc::new(page);
        self.memory
            .lock()
            .await
            .put(fingerprint.to_string(), page.clone());
        Some(page)
    }

    async fn read_disk(&self, fingerprint: &str) -> Result<Option<CachedPage>> {
        let meta = match tokio::fs::read(self.meta_path(fingerprint)).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: PageMeta = serde_json::from_slice(&meta)
            .map_err(|e| ClientError::Cache(format!("corrupt metadata: {}", e)))?;
        let body = tokio::fs::read(self.body_path(fingerprint)).await?;

        Ok(Some(CachedPage {
            body: Bytes::from(body),
            page_count: meta.page_count,
            stored_at: meta.stored_at,
        }))
    }

    /// Store a page, overwriting any previous entry for the fingerprint.
    pub async fn put(&self, fingerprint: &str, page: CachedPage) -> Result<()> {
        if self.ttl.is_zero() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let meta = serde_json::to_vec(&PageMeta {
            page_count: page.page_count,
            stored_at: page.stored_at,
        })?;
        write_replace(&self.body_path(fingerprint), &page.body).await?;
        write_replace(&self.meta_path(fingerprint), &meta).await?;

        self.memory
            .lock()
            .await
            .put(fingerprint.to_string(), Arc::new(page));
        tracing::debug!(fingerprint = %fingerprint, "Cached query page");
        Ok(())
    }

    /// Drop one entry from both levels.
    pub async fn remove(&self, fingerprint: &str) -> Result<()> {
        self.memory.lock().await.pop(fingerprint);
        for path in [self.meta_path(fingerprint), self.body_path(fingerprint)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(fingerprint = %fingerprint, "Removed cache entry");
        Ok(())
    }

    /// Remove every entry from both levels.
    ///
    /// Only files named after a fingerprint are deleted; anything else in
    /// the directory is left alone.
    pub async fn clear(&self) -> Result<()> {
        self.memory.lock().await.clear();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry_file(&path).is_some() {
                tokio::fs::remove_file(&path).await?;
            }
        }
        tracing::debug!(dir = %self.dir.display(), "Response cache cleared");
        Ok(())
    }

    /// Returns cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let memory = self.memory.lock().await;
        let memory_entries = memory.len();
        let memory_expired = memory
            .iter()
            .filter(|(_, page)| page.is_expired(self.ttl))
            .count();
        drop(memory);

        let mut disk_entries = 0;
        if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry_file(&entry.path()) == Some("json") {
                    disk_entries += 1;
                }
            }
        }

        CacheStats {
            memory_entries,
            memory_expired,
            disk_entries,
            ttl: self.ttl,
        }
    }
}

/// Suffix of a cache file (`json`, `body`, or either with `.tmp`), if the
/// file name is `<64 hex digits>.<suffix>`.
fn entry_file(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    let (stem, suffix) = name.split_once('.')?;
    let is_fingerprint = stem.len() == 64 && stem.bytes().all(|b| b.is_ascii_hexdigit());
    let known = matches!(suffix, "json" | "body" | "json.tmp" | "body.tmp");
    (is_fingerprint && known).then_some(suffix)
}

async fn write_replace(path: &Path, contents: &[u8]) -> Result<()> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let tmp = path.with_extension(format!("{}.tmp", ext));
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Pages held in memory
    pub memory_entries: usize,
    /// Expired pages still held in memory (not yet evicted)
    pub memory_expired: usize,
    /// Pages on disk, including expired ones
    pub disk_entries: usize,
    /// Current TTL setting
    pub ttl: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn page(body: &'static [u8], page_count: i64) -> CachedPage {
        CachedPage::new(Bytes::from_static(body), page_count)
    }

    fn fp(c: char) -> String {
        c.to_string().repeat(64)
    }

    #[tokio::test]
    async fn test_cache_put_get() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 10, Duration::from_secs(60));

        cache.put("abc", page(b"col1\n1", 3)).await.unwrap();

        let cached = cache.get("abc").await.unwrap();
        assert_eq!(cached.body.as_ref(), b"col1\n1");
        assert_eq!(cached.page_count, 3);
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 10, Duration::from_secs(60));

        assert!(cache.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_disk_level_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        {
            let cache = ResponseCache::new(dir.path(), 10, Duration::from_secs(60));
            cache.put("abc", page(b"a,b\n1,2", 1)).await.unwrap();
        }

        let cache = ResponseCache::new(dir.path(), 10, Duration::from_secs(60));
        let cached = cache.get("abc").await.unwrap();
        assert_eq!(cached.body.as_ref(), b"a,b\n1,2");
        assert_eq!(cache.stats().await.memory_entries, 1);
    }

    #[tokio::test]
    async fn test_cache_expiration() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 10, Duration::from_millis(50));

        cache.put("abc", page(b"x", 1)).await.unwrap();
        assert!(cache.get("abc").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get("abc").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 10, Duration::from_millis(50));

        cache.put(&fp('a'), page(b"old", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.put(&fp('a'), page(b"new", 2)).await.unwrap();

        let cached = cache.get(&fp('a')).await.unwrap();
        assert_eq!(cached.body.as_ref(), b"new");
        assert_eq!(cache.stats().await.disk_entries, 1);
    }

    #[tokio::test]
    async fn test_cache_disabled() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("never-created");
        let cache = ResponseCache::new(&root, 10, Duration::ZERO);

        cache.put("abc", page(b"x", 1)).await.unwrap();

        assert!(cache.get("abc").await.is_none());
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 10, Duration::from_secs(60));
        std::fs::write(dir.path().join("abc.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("abc.body"), b"x").unwrap();

        assert!(cache.get("abc").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 10, Duration::from_secs(60));

        cache.put(&fp('1'), page(b"1", 1)).await.unwrap();
        cache.put(&fp('2'), page(b"2", 1)).await.unwrap();

        cache.clear().await.unwrap();

        assert!(cache.get(&fp('1')).await.is_none());
        assert!(cache.get(&fp('2')).await.is_none());
        assert_eq!(cache.stats().await.disk_entries, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cache_clear_keeps_foreign_files() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 10, Duration::from_secs(60));
        let not_hex = format!("{}.json", "z".repeat(64));
        let other_suffix = format!("{}.csv", fp('c'));
        let foreign: [&str; 6] = [
            "unrelated.txt",
            "settings.json",
            "report.body",
            "notes.json.tmp",
            &not_hex,
            &other_suffix,
        ];
        for name in foreign {
            std::fs::write(dir.path().join(name), b"keep").unwrap();
        }
        cache.put(&fp('c'), page(b"x", 1)).await.unwrap();
        assert_eq!(cache.stats().await.disk_entries, 1);

        cache.clear().await.unwrap();

        for name in foreign {
            assert!(dir.path().join(name).exists(), "{} was deleted", name);
        }
        assert!(!dir.path().join(format!("{}.json", fp('c'))).exists());
        assert!(!dir.path().join(format!("{}.body", fp('c'))).exists());
    }

    #[tokio::test]
    async fn test_remove_drops_both_levels() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 10, Duration::from_secs(60));

        cache.put(&fp('d'), page(b"x", 1)).await.unwrap();
        cache.remove(&fp('d')).await.unwrap();

        assert!(cache.get(&fp('d')).await.is_none());
        assert_eq!(cache.stats().await.memory_entries, 0);
        assert_eq!(cache.stats().await.disk_entries, 0);

        // Removing a missing entry is fine
        cache.remove(&fp('d')).await.unwrap();
    }

    #[tokio::test]
    async fn test_lru_eviction_falls_back_to_disk() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 1, Duration::from_secs(60));

        cache.put("one", page(b"1", 1)).await.unwrap();
        cache.put("two", page(b"2", 1)).await.unwrap();

        assert_eq!(cache.stats().await.memory_entries, 1);
        assert_eq!(cache.get("one").await.unwrap().body.as_ref(), b"1");
    }
}
