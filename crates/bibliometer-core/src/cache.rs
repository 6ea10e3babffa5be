//! Two-tier cache for aggregated query outcomes.
//!
//! **L1**: [`DashMap`] in-memory map keyed by scope fingerprint (lock-free
//! concurrent reads, lives for the process session).
//! **L2**: Optional SQLite database on disk (persists across process restarts).
//!
//! On [`get`](ResultCache::get): check L1 first; on miss, fall through to L2
//! and promote the row back into L1 on hit. On [`insert`](ResultCache::insert):
//! write-through to both tiers.
//!
//! Keys are scope fingerprints (see
//! [`QueryScope::fingerprint`](crate::models::QueryScope::fingerprint)), so the
//! same logical query maps to the same entry regardless of identifier order.
//! Only outcomes from fully completed queries belong here; a query that failed
//! part-way must never be inserted.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, params};

use crate::models::QueryOutcome;

/// Default time-to-live for in-memory (session) entries: 5 minutes.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(5 * 60);

/// Default time-to-live for persisted entries: 30 minutes.
pub const DEFAULT_PERSISTED_TTL: Duration = Duration::from_secs(30 * 60);

/// A timestamped L1 entry (uses monotonic `Instant` for TTL checks).
#[derive(Clone, Debug)]
struct CacheEntry {
    outcome: QueryOutcome,
    inserted_at: Instant,
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path, read_only: bool) -> Result<Connection, rusqlite::Error> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

/// SQLite writer connection (L2 writes: insert, clear, evict).
struct SqliteWriter {
    conn: Connection,
}

impl SqliteWriter {
    fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = open_sqlite(path, false)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS result_cache (
                 fingerprint TEXT PRIMARY KEY,
                 payload     TEXT NOT NULL,
                 inserted_at INTEGER NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    fn insert(&self, fingerprint: &str, payload: &str, epoch: u64) {
        let _ = self.conn.execute(
            "INSERT OR REPLACE INTO result_cache (fingerprint, payload, inserted_at)
             VALUES (?1, ?2, ?3)",
            params![fingerprint, payload, epoch],
        );
    }

    fn clear(&self) {
        let _ = self.conn.execute("DELETE FROM result_cache", []);
        // Without VACUUM the deleted pages stay allocated as free pages.
        let _ = self.conn.execute_batch("VACUUM");
    }

    fn evict_expired(&self, persisted_ttl: Duration) {
        let cutoff = now_epoch().saturating_sub(persisted_ttl.as_secs());
        let _ = self.conn.execute(
            "DELETE FROM result_cache WHERE inserted_at < ?1",
            params![cutoff],
        );
    }

    fn count(&self) -> usize {
        self.conn
            .query_row("SELECT COUNT(*) FROM result_cache", [], |row| row.get(0))
            .unwrap_or(0)
    }
}

/// Pool of read-only SQLite connections for concurrent L2 lookups.
///
/// Each reader gets its own connection (SQLite WAL mode allows concurrent
/// reads). Connections are returned to the pool after use; if the pool is
/// empty, a new connection is opened.
struct ReadPool {
    pool: Mutex<Vec<Connection>>,
    path: PathBuf,
}

impl ReadPool {
    fn new(path: &Path) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            path: path.to_path_buf(),
        }
    }

    fn acquire(&self) -> Option<Connection> {
        // Try to reuse a pooled connection
        if let Ok(mut pool) = self.pool.lock()
            && let Some(conn) = pool.pop()
        {
            return Some(conn);
        }
        // Pool empty; open a new read-only connection
        open_sqlite(&self.path, true).ok()
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.push(conn);
        }
    }

    fn get(&self, fingerprint: &str, persisted_ttl: Duration) -> Option<(String, u64)> {
        let conn = self.acquire()?;
        let result = Self::query(&conn, fingerprint, persisted_ttl);
        self.release(conn);
        result
    }

    fn query(
        conn: &Connection,
        fingerprint: &str,
        persisted_ttl: Duration,
    ) -> Option<(String, u64)> {
        let now = now_epoch();
        let mut stmt = conn
            .prepare_cached("SELECT payload, inserted_at FROM result_cache WHERE fingerprint = ?1")
            .ok()?;
        let (payload, inserted_at) = stmt
            .query_row(params![fingerprint], |row| {
                let payload: String = row.get(0)?;
                let inserted_at: u64 = row.get(1)?;
                Ok((payload, inserted_at))
            })
            .ok()?;

        // Expired rows read as misses; the writer evicts them at next startup
        let age = Duration::from_secs(now.saturating_sub(inserted_at));
        if age > persisted_ttl {
            return None;
        }

        Some((payload, inserted_at))
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Thread-safe two-tier cache for query outcomes.
///
/// L1: [`DashMap`] for lock-free concurrent access, bounded by the session TTL.
/// L2: Optional SQLite database; reads use a [`ReadPool`] of concurrent
///     connections, writes go through a single [`SqliteWriter`] behind a
///     [`Mutex`]. L2 entries live for the (longer) persisted TTL.
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    /// Writer connection for inserts, clears, eviction (serialized).
    sqlite_writer: Option<Mutex<SqliteWriter>>,
    /// Pool of read-only connections for concurrent L2 lookups.
    read_pool: Option<ReadPool>,
    session_ttl: Duration,
    persisted_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Running sum of lookup durations in microseconds (for computing average).
    total_lookup_us: AtomicU64,
    /// Total number of lookups (hits + misses) for average calculation.
    total_lookups: AtomicU64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL, DEFAULT_PERSISTED_TTL)
    }
}

impl ResultCache {
    /// Create an in-memory-only cache with custom TTLs (no disk persistence).
    pub fn new(session_ttl: Duration, persisted_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sqlite_writer: None,
            read_pool: None,
            session_ttl,
            persisted_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            total_lookup_us: AtomicU64::new(0),
            total_lookups: AtomicU64::new(0),
        }
    }

    /// Open a persistent cache backed by a SQLite database at `path`.
    ///
    /// On startup, expired rows are evicted from SQLite. The L1 DashMap starts
    /// empty and is populated lazily as entries are accessed.
    pub fn open(
        path: &Path,
        session_ttl: Duration,
        persisted_ttl: Duration,
    ) -> Result<Self, String> {
        let writer = SqliteWriter::open(path)
            .map_err(|e| format!("failed to open cache database at {}: {}", path.display(), e))?;
        writer.evict_expired(persisted_ttl);
        Ok(Self {
            entries: DashMap::new(),
            sqlite_writer: Some(Mutex::new(writer)),
            read_pool: Some(ReadPool::new(path)),
            session_ttl,
            persisted_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            total_lookup_us: AtomicU64::new(0),
            total_lookups: AtomicU64::new(0),
        })
    }

    /// Look up a cached outcome for the given scope fingerprint.
    ///
    /// Returns `Some(outcome)` on cache hit (within TTL), `None` on miss.
    pub fn get(&self, fingerprint: &str) -> Option<QueryOutcome> {
        let start = Instant::now();

        // L1 check
        if let Some(entry) = self.entries.get(fingerprint) {
            if entry.inserted_at.elapsed() > self.session_ttl {
                drop(entry);
                self.entries.remove(fingerprint);
                // Fall through to L2
            } else {
                let outcome = entry.outcome.clone();
                drop(entry);
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.record_lookup(start);
                tracing::trace!(fingerprint, "cache L1 hit");
                return Some(outcome);
            }
        }

        // L2 check (concurrent read, no writer lock needed)
        if let Some(ref pool) = self.read_pool
            && let Some((payload, epoch)) = pool.get(fingerprint, self.persisted_ttl)
            && let Ok(outcome) = serde_json::from_str::<QueryOutcome>(&payload)
        {
            // Promote to L1
            tracing::trace!(fingerprint, "cache L2 hit, promoting to L1");
            self.entries.insert(
                fingerprint.to_string(),
                CacheEntry {
                    outcome: outcome.clone(),
                    inserted_at: epoch_to_instant(epoch),
                },
            );
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.record_lookup(start);
            return Some(outcome);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_lookup(start);
        tracing::trace!(fingerprint, "cache miss");
        None
    }

    fn record_lookup(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.total_lookup_us.fetch_add(us, Ordering::Relaxed);
        self.total_lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Insert a completed query outcome under its scope fingerprint.
    ///
    /// Write-through: updates both L1 and L2. Callers must only insert
    /// outcomes from queries that ran to completion.
    pub fn insert(&self, fingerprint: &str, outcome: &QueryOutcome) {
        tracing::trace!(fingerprint, "cache insert");
        let epoch = now_epoch();

        self.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                outcome: outcome.clone(),
                inserted_at: Instant::now(),
            },
        );

        // Write-through to SQLite so the entry survives a restart.
        if let Some(ref sqlite_mutex) = self.sqlite_writer
            && let Ok(payload) = serde_json::to_string(outcome)
            && let Ok(store) = sqlite_mutex.lock()
        {
            store.insert(fingerprint, &payload, epoch);
        }
    }

    /// Remove all entries from both tiers.
    pub fn clear(&self) {
        self.entries.clear();
        if let Some(ref sqlite_mutex) = self.sqlite_writer
            && let Ok(store) = sqlite_mutex.lock()
        {
            store.clear();
        }
    }

    /// Number of cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Average lookup time in milliseconds (hits and misses).
    pub fn avg_lookup_ms(&self) -> f64 {
        let count = self.total_lookups.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let us = self.total_lookup_us.load(Ordering::Relaxed);
        us as f64 / count as f64 / 1000.0
    }

    /// Number of entries currently in the L1 in-memory cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the L1 cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total entries in the persistent L2 store (0 if no SQLite backing).
    pub fn disk_len(&self) -> usize {
        if let Some(ref sqlite_mutex) = self.sqlite_writer
            && let Ok(store) = sqlite_mutex.lock()
        {
            store.count()
        } else {
            0
        }
    }

    /// Whether this cache has a persistent SQLite backing store.
    pub fn has_persistence(&self) -> bool {
        self.sqlite_writer.is_some()
    }

    /// The in-memory (session) TTL.
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// The on-disk (persisted) TTL.
    pub fn persisted_ttl(&self) -> Duration {
        self.persisted_ttl
    }
}

/// Convert a wall-clock epoch to a monotonic `Instant` approximation.
///
/// We compute the age from `now_epoch - epoch` and subtract from
/// `Instant::now()`. Approximate but sufficient for TTL checks on L2 to L1
/// promotion. The row's age can exceed the machine uptime (persisted cache
/// surviving a reboot), in which case the subtraction is unrepresentable
/// and the entry is stamped as fresh instead.
fn epoch_to_instant(epoch: u64) -> Instant {
    let now = now_epoch();
    let age_secs = now.saturating_sub(epoch);
    Instant::now()
        .checked_sub(Duration::from_secs(age_secs))
        .unwrap_or_else(Instant::now)
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("l1_entries", &self.entries.len())
            .field("l2_entries", &self.disk_len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .field("session_ttl", &self.session_ttl)
            .field("persisted_ttl", &self.persisted_ttl)
            .field("persistent", &self.has_persistence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Provider, Publication, QueryOutcome};
    use std::path::PathBuf;

    fn sample_outcome(total: usize) -> QueryOutcome {
        QueryOutcome {
            provider: Some(Provider::Scopus),
            total_count: total,
            publications: vec![Publication {
                title: "Adaptive Routing in Sensor Networks".into(),
                citation_count: 12,
                year: 2023,
                ..Publication::default()
            }],
            ..QueryOutcome::default()
        }
    }

    #[test]
    fn cache_miss_on_empty() {
        let cache = ResultCache::default();
        assert!(cache.get("scopus:author:2023:01-12:123").is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn cache_hit_after_insert() {
        let cache = ResultCache::default();
        let fp = "scopus:author:2023:01-12:123";
        cache.insert(fp, &sample_outcome(41));
        let cached = cache.get(fp);
        assert!(cached.is_some());
        let outcome = cached.unwrap();
        assert_eq!(outcome.total_count, 41);
        assert_eq!(
            outcome.publications[0].title,
            "Adaptive Routing in Sensor Networks"
        );
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn cache_miss_different_fingerprint() {
        let cache = ResultCache::default();
        cache.insert("scopus:author:2023:01-12:123", &sample_outcome(1));
        assert!(cache.get("openalex:author:2023:01-12:123").is_none());
    }

    #[test]
    fn cache_expired_session_entry() {
        let cache = ResultCache::new(Duration::from_millis(1), Duration::from_secs(3600));
        cache.insert("fp", &sample_outcome(1));
        // Sleep briefly to let the session TTL expire
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("fp").is_none());
    }

    #[test]
    fn cache_len_and_empty() {
        let cache = ResultCache::default();
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
        cache.insert("fp", &sample_outcome(1));
        assert!(!cache.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_clear() {
        let cache = ResultCache::default();
        cache.insert("fp", &sample_outcome(1));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("fp").is_none());
    }

    #[test]
    fn cache_insert_replaces() {
        let cache = ResultCache::default();
        cache.insert("fp", &sample_outcome(1));
        cache.insert("fp", &sample_outcome(99));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fp").unwrap().total_count, 99);
    }

    // ── SQLite persistence tests ──────────────────────────────────────

    use std::sync::atomic::AtomicU32;
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_cache_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "bibliometer_test_cache_{}_{}",
            std::process::id(),
            id,
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("test_cache.db")
    }

    #[test]
    fn sqlite_write_and_read() {
        let path = temp_cache_path();
        let _ = std::fs::remove_file(&path);

        let cache =
            ResultCache::open(&path, DEFAULT_SESSION_TTL, DEFAULT_PERSISTED_TTL).unwrap();
        cache.insert("scopus:author:2024:01-12:7004212771", &sample_outcome(17));
        assert_eq!(cache.disk_len(), 1);

        // Read back from a fresh cache instance (simulating restart)
        drop(cache);
        let cache2 =
            ResultCache::open(&path, DEFAULT_SESSION_TTL, DEFAULT_PERSISTED_TTL).unwrap();
        // L1 should be empty
        assert!(cache2.is_empty());
        // But get() should find it in L2
        let cached = cache2.get("scopus:author:2024:01-12:7004212771");
        assert!(cached.is_some());
        let outcome = cached.unwrap();
        assert_eq!(outcome.total_count, 17);
        assert_eq!(outcome.provider, Some(Provider::Scopus));
        // Should have promoted to L1
        assert_eq!(cache2.len(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sqlite_clear() {
        let path = temp_cache_path();
        let _ = std::fs::remove_file(&path);

        let cache =
            ResultCache::open(&path, DEFAULT_SESSION_TTL, DEFAULT_PERSISTED_TTL).unwrap();
        cache.insert("fp", &sample_outcome(1));
        assert_eq!(cache.disk_len(), 1);
        cache.clear();
        assert_eq!(cache.disk_len(), 0);
        assert!(cache.is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sqlite_expired_evicted_on_open() {
        let path = temp_cache_path();
        let _ = std::fs::remove_file(&path);

        // Insert with 1-second persisted TTL (SQLite uses epoch-second resolution)
        {
            let cache =
                ResultCache::open(&path, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            cache.insert("fp", &sample_outcome(1));
        }

        std::thread::sleep(Duration::from_secs(2));

        // Re-open; startup eviction should remove the expired row
        let cache2 =
            ResultCache::open(&path, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        assert_eq!(cache2.disk_len(), 0);

        let _ = std::fs::remove_file(&path);
    }

    // ── Two-tier interaction tests ────────────────────────────────────

    #[test]
    fn l1_expired_l2_valid_promotes() {
        // Session TTL is near zero but the persisted TTL is long: after the
        // L1 entry lapses, get() should still find the row in L2 and promote it.
        let path = temp_cache_path();
        let _ = std::fs::remove_file(&path);

        let cache =
            ResultCache::open(&path, Duration::from_millis(1), Duration::from_secs(3600)).unwrap();
        cache.insert("fp", &sample_outcome(5));
        std::thread::sleep(Duration::from_millis(10));

        let cached = cache.get("fp");
        assert!(cached.is_some());
        assert_eq!(cached.unwrap().total_count, 5);
        assert_eq!(cache.hits(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn avg_lookup_tracks_lookups() {
        let cache = ResultCache::default();
        assert_eq!(cache.avg_lookup_ms(), 0.0);
        cache.insert("fp", &sample_outcome(1));
        let _ = cache.get("fp");
        let _ = cache.get("other");
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert!(cache.avg_lookup_ms() >= 0.0);
    }
}
