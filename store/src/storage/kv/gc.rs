//! Reclamation of expired records
//!
//! LMDB has no native expiry, so expired records stay on disk (invisible to
//! reads) until a pass deletes them. A pass walks the whole database in
//! fixed-size chunks and rewrites a chunk only when enough of it can be
//! discarded, which keeps write transactions short and avoids churning
//! pages for a handful of stale keys.

use super::cache::ServiceCache;
use super::keys::{is_expired, unseal};
use crate::metrics;
use aperture_shared::utils::bytes_to_hex;
use heed::types::Bytes;
use heed::{Database, Env};
use std::ops::Bound;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keys examined per read transaction
pub const GC_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub scanned: usize,
    pub expired: usize,
    pub reclaimed: usize,
}

/// One chunk of a pass: how many keys were read, which of them had expired
/// and where the next chunk starts.
struct Chunk {
    len: usize,
    expired: Vec<Vec<u8>>,
    last: Option<Vec<u8>>,
}

/// Run one reclamation pass over `db`.
///
/// A chunk's expired keys are deleted when they make up at least
/// `discard_ratio` of the chunk. With nothing expired the pass only reads.
pub fn run_gc_pass(
    env: &Env,
    db: Database<Bytes, Bytes>,
    discard_ratio: f64,
    now_secs: u64,
) -> heed::Result<GcStats> {
    let mut stats = GcStats::default();
    let mut last: Option<Vec<u8>> = None;

    loop {
        let chunk = scan_chunk(env, db, last.as_deref(), now_secs)?;
        if chunk.len == 0 {
            break;
        }
        stats.scanned += chunk.len;
        stats.expired += chunk.expired.len();

        if !chunk.expired.is_empty()
            && chunk.expired.len() as f64 >= discard_ratio * chunk.len as f64
        {
            let reclaimed = delete_expired(env, db, &chunk.expired, now_secs)?;
            stats.reclaimed += reclaimed;
            debug!("GC: reclaimed {} of {} keys in chunk", reclaimed, chunk.len);
        }

        if chunk.len < GC_CHUNK_SIZE {
            break;
        }
        last = chunk.last;
    }

    Ok(stats)
}

/// Read up to [`GC_CHUNK_SIZE`] keys after `after` and collect the expired ones.
fn scan_chunk(
    env: &Env,
    db: Database<Bytes, Bytes>,
    after: Option<&[u8]>,
    now_secs: u64,
) -> heed::Result<Chunk> {
    let rtxn = env.read_txn()?;
    let lower = match after {
        Some(key) => Bound::Excluded(key),
        None => Bound::Unbounded,
    };
    let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (lower, Bound::Unbounded);

    let mut chunk = Chunk {
        len: 0,
        expired: Vec::new(),
        last: None,
    };
    for entry in db.range(&rtxn, &bounds)?.take(GC_CHUNK_SIZE) {
        let (key, value) = entry?;
        chunk.len += 1;
        match unseal(value) {
            Ok((expires_at, _)) if is_expired(expires_at, now_secs) => chunk.expired.push(key.to_vec()),
            Ok(_) => {}
            Err(e) => warn!("GC: skipping malformed record {}: {}", bytes_to_hex(key), e),
        }
        chunk.last = Some(key.to_vec());
    }
    Ok(chunk)
}

/// Delete `keys` that are still expired at `now_secs`.
///
/// A key may have been rewritten with a fresh expiry since it was scanned,
/// so each one is read again under the write transaction.
fn delete_expired(
    env: &Env,
    db: Database<Bytes, Bytes>,
    keys: &[Vec<u8>],
    now_secs: u64,
) -> heed::Result<usize> {
    let mut wtxn = env.write_txn()?;
    let mut reclaimed = 0;
    for key in keys {
        let still_expired = match db.get(&wtxn, key)? {
            Some(value) => matches!(unseal(value), Ok((expires_at, _)) if is_expired(expires_at, now_secs)),
            None => false,
        };
        if still_expired && db.delete(&mut wtxn, key)? {
            reclaimed += 1;
        }
    }
    wtxn.commit()?;
    Ok(reclaimed)
}

/// Background task running [`run_gc_pass`] on a fixed interval
pub struct Reclaimer {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reclaimer {
    pub fn spawn(
        env: Env,
        db: Database<Bytes, Bytes>,
        cache: Arc<ServiceCache>,
        interval: Duration,
        discard_ratio: f64,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = aperture_shared::utils::time::now_seconds().timestamp() as u64;
                        match run_gc_pass(&env, db, discard_ratio, now) {
                            Ok(stats) => {
                                metrics::GC_RECLAIMED.inc_by(stats.reclaimed as f64);
                                if stats.reclaimed > 0 {
                                    info!(
                                        "GC pass: scanned {} keys, reclaimed {} of {} expired",
                                        stats.scanned, stats.reclaimed, stats.expired
                                    );
                                }
                            }
                            Err(e) => warn!("GC pass failed: {}", e),
                        }
                        let evicted = cache.evict_expired(now);
                        if evicted > 0 {
                            debug!("GC: evicted {} expired services from cache", evicted);
                        }
                        metrics::SERVICES_KNOWN.set(cache.len() as f64);
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the task and wait for an in-flight pass to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(h) = handle {
            let _ = h.await;
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::super::keys::seal;
    use super::*;
    use heed::EnvOpenOptions;

    fn open(dir: &std::path::Path) -> (Env, Database<Bytes, Bytes>) {
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(50 * 1024 * 1024)
                .max_dbs(1)
                .open(dir)
                .unwrap()
        };
        let mut wtxn = env.write_txn().unwrap();
        let db = env.create_database(&mut wtxn, Some("gc")).unwrap();
        wtxn.commit().unwrap();
        (env, db)
    }

    fn fill(env: &Env, db: Database<Bytes, Bytes>, count: usize, expires_at: impl Fn(usize) -> u64) {
        let mut wtxn = env.write_txn().unwrap();
        for i in 0..count {
            let key = format!("key-{:06}", i);
            db.put(&mut wtxn, key.as_bytes(), &seal(expires_at(i), b"x")).unwrap();
        }
        wtxn.commit().unwrap();
    }

    fn count(env: &Env, db: Database<Bytes, Bytes>) -> u64 {
        let rtxn = env.read_txn().unwrap();
        db.len(&rtxn).unwrap()
    }

    #[test]
    fn test_gc_noop_when_nothing_expired() {
        let dir = tempfile::tempdir().unwrap();
        let (env, db) = open(dir.path());
        assert_eq!(run_gc_pass(&env, db, 0.5, 100).unwrap(), GcStats::default());

        fill(&env, db, 10, |_| 0);
        let stats = run_gc_pass(&env, db, 0.5, 100).unwrap();
        assert_eq!(stats.scanned, 10);
        assert_eq!(stats.reclaimed, 0);
        assert_eq!(count(&env, db), 10);
    }

    #[test]
    fn test_gc_reclaims_expired() {
        let dir = tempfile::tempdir().unwrap();
        let (env, db) = open(dir.path());
        fill(&env, db, 3000, |i| if i % 2 == 0 { 50 } else { 500 });

        let stats = run_gc_pass(&env, db, 0.5, 100).unwrap();
        assert_eq!(stats.scanned, 3000);
        assert_eq!(stats.expired, 1500);
        assert_eq!(stats.reclaimed, 1500);
        assert_eq!(count(&env, db), 1500);
    }

    #[test]
    fn test_gc_respects_discard_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let (env, db) = open(dir.path());
        fill(&env, db, 100, |i| if i < 10 { 50 } else { 0 });

        let stats = run_gc_pass(&env, db, 0.7, 100).unwrap();
        assert_eq!(stats.expired, 10);
        assert_eq!(stats.reclaimed, 0);

        let stats = run_gc_pass(&env, db, 0.1, 100).unwrap();
        assert_eq!(stats.reclaimed, 10);
        assert_eq!(count(&env, db), 90);
    }

    #[test]
    fn test_gc_keeps_keys_rewritten_after_scan() {
        let dir = tempfile::tempdir().unwrap();
        let (env, db) = open(dir.path());
        fill(&env, db, 4, |_| 50);

        let chunk = scan_chunk(&env, db, None, 100).unwrap();
        assert_eq!(chunk.len, 4);
        assert_eq!(chunk.expired.len(), 4);

        // a writer refreshes one record between the scan and the delete
        let mut wtxn = env.write_txn().unwrap();
        db.put(&mut wtxn, b"key-000001", &seal(500, b"fresh")).unwrap();
        db.delete(&mut wtxn, b"key-000002").unwrap();
        wtxn.commit().unwrap();

        assert_eq!(delete_expired(&env, db, &chunk.expired, 100).unwrap(), 2);
        assert_eq!(count(&env, db), 1);

        let rtxn = env.read_txn().unwrap();
        let value = db.get(&rtxn, b"key-000001").unwrap().unwrap();
        assert_eq!(unseal(value).unwrap(), (500, &b"fresh"[..]));
    }

    #[tokio::test]
    async fn test_reclaimer_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (env, db) = open(dir.path());
        let reclaimer = Reclaimer::spawn(env, db, Arc::new(ServiceCache::new()), Duration::from_millis(10), 0.5);
        tokio::time::sleep(Duration::from_millis(30)).await;
        reclaimer.shutdown().await;
        reclaimer.shutdown().await;
    }
}
