//! Embedded profile store on LMDB
//!
//! Profiles are indexed by service, type and creation time through the key
//! layout in [`keys`]; label filters are applied while scanning. Known
//! service names live in an in-memory [`ServiceCache`]. Records carry their
//! own expiry, reads skip expired records, and a background [`Reclaimer`]
//! deletes them from disk.

pub mod cache;
pub mod gc;
pub mod keys;
pub mod scan;

pub use cache::ServiceCache;
pub use gc::{GcStats, Reclaimer};

use self::keys::{
    is_expired, meta_key, meta_time_lower, meta_time_upper, meta_type_prefix, profile_key,
    seal, service_from_key, service_key, unseal, EXPIRY_LEN, SERVICE_INDEX_PREFIX,
};
use self::scan::{Cursor, ScanRange};
use crate::context::Context;
use crate::error::{Result, StorageError};
use crate::metrics;
use crate::storage::{
    resolve_created_at, FindProfilesParams, ProfileBody, ProfileList, Reader, WriteProfileParams,
    Writer,
};
use aperture_shared::utils::bytes_to_hex;
use aperture_shared::utils::time::{now_seconds, unix_nanos};
use aperture_shared::{parse_profile, Meta, ProfileId, ProfileType};
use async_trait::async_trait;
use bytes::Bytes;
use heed::types::Bytes as RawBytes;
use heed::{Database, Env, EnvOpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

const DATABASE_NAME: &str = "profiles";
const BACKEND: &str = "kv";

#[derive(Debug, Clone)]
pub struct KvOptions {
    /// Maximum size of the memory map in bytes
    pub map_size: usize,
    /// How long written records stay visible; zero keeps them forever
    pub profile_ttl: Duration,
    /// How often expired records are reclaimed; zero disables the task
    pub gc_interval: Duration,
    /// Fraction of a chunk that must be expired before it is rewritten
    pub gc_discard_ratio: f64,
}

impl Default for KvOptions {
    fn default() -> Self {
        Self {
            map_size: 1024 * 1024 * 1024,
            profile_ttl: Duration::from_secs(5 * 24 * 3600),
            gc_interval: Duration::from_secs(5 * 60),
            gc_discard_ratio: 0.7,
        }
    }
}

pub struct KvStore {
    env: Env,
    db: Database<RawBytes, RawBytes>,
    cache: Arc<ServiceCache>,
    options: KvOptions,
    path: PathBuf,
    reclaimer: Mutex<Option<Reclaimer>>,
}

fn now_secs() -> u64 {
    u64::try_from(now_seconds().timestamp()).unwrap_or(0)
}

fn heed_err(op: &'static str) -> impl FnOnce(heed::Error) -> StorageError {
    move |e| StorageError::backend(op, e)
}

fn corrupt_record(key: &[u8], err: impl std::fmt::Display) -> StorageError {
    StorageError::backend(
        "decode record",
        format!("key {}: {}", bytes_to_hex(key), err),
    )
}

impl KvStore {
    /// Open (or create) a store in the directory `path`.
    pub fn open(path: impl AsRef<Path>, options: KvOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(options.map_size)
                .max_dbs(1)
                .open(&path)
        }
        .map_err(heed_err("open environment"))?;

        let mut wtxn = env.write_txn().map_err(heed_err("begin transaction"))?;
        let db: Database<RawBytes, RawBytes> = env
            .create_database(&mut wtxn, Some(DATABASE_NAME))
            .map_err(heed_err("create database"))?;
        wtxn.commit().map_err(heed_err("commit"))?;

        let store = Self {
            env,
            db,
            cache: Arc::new(ServiceCache::new()),
            options,
            path,
            reclaimer: Mutex::new(None),
        };
        let loaded = store.load_services()?;
        metrics::SERVICES_KNOWN.set(store.cache.len() as f64);
        info!(
            "Opened profile store at {} ({} services, ttl {:?})",
            store.path.display(),
            loaded,
            store.options.profile_ttl
        );
        Ok(store)
    }

    /// Fill the service cache from the service index keys.
    fn load_services(&self) -> Result<usize> {
        let mut cursor = Cursor::new(
            self.env.clone(),
            self.db,
            vec![ScanRange::prefix(vec![SERVICE_INDEX_PREFIX])],
        );
        let now = now_secs();
        let mut loaded = 0;
        while let Some((key, value)) = cursor.advance().map_err(heed_err("scan services"))? {
            let (expires_at, _) = unseal(&value).map_err(|e| corrupt_record(&key, e))?;
            if is_expired(expires_at, now) {
                continue;
            }
            if let Some(service) = service_from_key(&key) {
                self.cache.put_service(service, expires_at);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &KvOptions {
        &self.options
    }

    /// Start the background reclamation task. Does nothing when the GC
    /// interval is zero or the task is already running.
    pub fn spawn_gc_task(&self) {
        if self.options.gc_interval.is_zero() {
            return;
        }
        let mut guard = match self.reclaimer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        *guard = Some(Reclaimer::spawn(
            self.env.clone(),
            self.db,
            self.cache.clone(),
            self.options.gc_interval,
            self.options.gc_discard_ratio,
        ));
        debug!("GC task started, interval {:?}", self.options.gc_interval);
    }

    /// Run one reclamation pass now.
    pub fn run_gc(&self) -> Result<GcStats> {
        let now = now_secs();
        let stats = gc::run_gc_pass(&self.env, self.db, self.options.gc_discard_ratio, now)
            .map_err(heed_err("gc"))?;
        self.cache.evict_expired(now);
        metrics::GC_RECLAIMED.inc_by(stats.reclaimed as f64);
        metrics::SERVICES_KNOWN.set(self.cache.len() as f64);
        Ok(stats)
    }

    /// Stop the background task, if any.
    pub async fn shutdown(&self) {
        let reclaimer = match self.reclaimer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(r) = reclaimer {
            r.shutdown().await;
        }
    }

    fn expires_at(&self) -> u64 {
        if self.options.profile_ttl.is_zero() {
            return 0;
        }
        now_secs().saturating_add(self.options.profile_ttl.as_secs().max(1))
    }

    fn put_records(&self, records: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(heed_err("begin transaction"))?;
        for (key, value) in records {
            self.db
                .put(&mut wtxn, key, value)
                .map_err(heed_err("put record"))?;
        }
        wtxn.commit().map_err(heed_err("commit"))
    }

    fn store_profile(&self, meta: &Meta, artifact: &[u8]) -> Result<()> {
        let expires_at = self.expires_at();
        let meta_json =
            serde_json::to_vec(meta).map_err(|e| StorageError::backend("encode meta", e))?;

        let mkey = meta_key(
            &meta.service,
            meta.profile_type,
            unix_nanos(&meta.created_at),
            &meta.profile_id,
        );
        let pkey = profile_key(&meta.profile_id);
        let skey = service_key(&meta.service);
        debug!(
            "writing profile {}: meta key {}, profile key {}",
            meta.profile_id,
            bytes_to_hex(&mkey),
            bytes_to_hex(&pkey)
        );

        self.put_records(&[
            (mkey, seal(expires_at, &meta_json)),
            (pkey, seal(expires_at, artifact)),
            (skey, seal(expires_at, &[])),
        ])?;
        self.cache.put_service(&meta.service, expires_at);
        Ok(())
    }

    fn scan_ranges(params: &FindProfilesParams, min_ns: u64, max_ns: u64) -> Vec<ScanRange> {
        params
            .profile_types()
            .into_iter()
            .map(|t: ProfileType| {
                ScanRange::between(
                    meta_type_prefix(&params.service, t),
                    meta_time_lower(&params.service, t, min_ns),
                    meta_time_upper(&params.service, t, max_ns),
                )
            })
            .collect()
    }
}

#[async_trait]
impl Writer for KvStore {
    async fn write_profile(
        &self,
        ctx: &Context,
        params: &WriteProfileParams,
        body: ProfileBody,
    ) -> Result<Meta> {
        params.validate()?;
        ctx.err()?;

        let artifact = body.into_bytes().await?;
        // traces are stored opaque
        let profile = if params.profile_type == ProfileType::Trace {
            None
        } else {
            let profile = parse_profile(&artifact).map_err(|e| {
                StorageError::codec(
                    format!("{} profile for service {}", params.profile_type, params.service),
                    e,
                )
            })?;
            Some(profile)
        };

        let meta = Meta {
            profile_id: ProfileId::generate(),
            external_id: params.external_id,
            service: params.service.clone(),
            profile_type: params.profile_type,
            labels: params.labels.clone(),
            created_at: resolve_created_at(params.created_at, profile.as_ref()),
        };

        ctx.err()?;
        let result = self.store_profile(&meta, &artifact);
        metrics::record_write(BACKEND, result.is_ok(), artifact.len());
        result?;
        metrics::SERVICES_KNOWN.set(self.cache.len() as f64);

        Ok(meta)
    }
}

#[async_trait]
impl Reader for KvStore {
    async fn find_profiles(&self, ctx: &Context, params: &FindProfilesParams) -> Result<Vec<Meta>> {
        let range = params.validate()?;
        let _timer = metrics::FIND_DURATION
            .with_label_values(&[BACKEND])
            .start_timer();

        let limit = params.effective_limit();
        let ranges = Self::scan_ranges(params, unix_nanos(&range.min), unix_nanos(&range.max));
        let mut cursor = Cursor::new(self.env.clone(), self.db, ranges);
        let now = now_secs();

        let mut metas = Vec::new();
        let mut bucket: Option<usize> = None;
        let mut bucket_matches = 0;
        while let Some((key, value)) = cursor.advance().map_err(heed_err("scan metas"))? {
            ctx.err()?;

            if cursor.current_range() != bucket {
                bucket = cursor.current_range();
                bucket_matches = 0;
            }

            let (expires_at, payload) = unseal(&value).map_err(|e| corrupt_record(&key, e))?;
            if is_expired(expires_at, now) {
                continue;
            }
            let meta: Meta =
                serde_json::from_slice(payload).map_err(|e| corrupt_record(&key, e))?;
            if !meta.labels.includes(&params.labels) {
                continue;
            }
            metas.push(meta);

            bucket_matches += 1;
            if bucket_matches >= limit {
                cursor.skip_to_next_range();
            }
        }

        if metas.is_empty() {
            return Err(StorageError::NotFound);
        }
        metas.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.profile_id.cmp(&b.profile_id))
        });
        metas.truncate(limit);
        debug!("find {}: {} profiles", params.service, metas.len());
        Ok(metas)
    }

    async fn list_profiles(&self, ctx: &Context, ids: &[ProfileId]) -> Result<Box<dyn ProfileList>> {
        if ids.is_empty() {
            return Err(StorageError::validation("no profile ids"));
        }
        ctx.err()?;
        let ranges = ids.iter().map(|id| ScanRange::exact(profile_key(id))).collect();
        let cursor = Cursor::new(self.env.clone(), self.db, ranges);
        Ok(Box::new(ProfilesReader::new(ctx.clone(), cursor)))
    }

    async fn list_services(&self, ctx: &Context) -> Result<Vec<String>> {
        ctx.err()?;
        let services = self.cache.services(now_secs());
        metrics::SERVICES_KNOWN.set(services.len() as f64);
        if services.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(services)
    }
}

enum ReaderStatus {
    Active,
    /// First error seen; reported by `close`
    Errored(StorageError),
    Closed,
}

/// [`ProfileList`] over profile records, one scan range per requested id
pub struct ProfilesReader {
    ctx: Context,
    cursor: Cursor,
    status: ReaderStatus,
    current: Option<Bytes>,
}

impl ProfilesReader {
    fn new(ctx: Context, cursor: Cursor) -> Self {
        Self {
            ctx,
            cursor,
            status: ReaderStatus::Active,
            current: None,
        }
    }

    fn fail(&mut self, err: StorageError) {
        if matches!(self.status, ReaderStatus::Active) {
            self.status = ReaderStatus::Errored(err);
        }
        self.current = None;
        self.cursor.finish();
    }
}

#[async_trait]
impl ProfileList for ProfilesReader {
    async fn next(&mut self) -> bool {
        if !matches!(self.status, ReaderStatus::Active) {
            return false;
        }
        self.current = None;

        let now = now_secs();
        loop {
            if let Err(e) = self.ctx.err() {
                self.fail(e.into());
                return false;
            }
            match self.cursor.advance() {
                Ok(Some((key, value))) => match unseal(&value) {
                    Ok((expires_at, _)) if is_expired(expires_at, now) => continue,
                    Ok(_) => {
                        self.current = Some(Bytes::from(value).split_off(EXPIRY_LEN));
                        return true;
                    }
                    Err(e) => {
                        self.fail(corrupt_record(&key, e));
                        return false;
                    }
                },
                Ok(None) => return false,
                Err(e) => {
                    self.fail(StorageError::backend("scan profiles", e));
                    return false;
                }
            }
        }
    }

    async fn profile(&mut self) -> Result<Bytes> {
        self.ctx.err()?;
        match &self.status {
            ReaderStatus::Active => self
                .current
                .clone()
                .ok_or_else(|| StorageError::validation("profile called without a successful next")),
            ReaderStatus::Errored(_) => Err(StorageError::backend(
                "read profile",
                "profile list failed, see close",
            )),
            ReaderStatus::Closed => Err(StorageError::validation("profile list is closed")),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.current = None;
        self.cursor.finish();
        match std::mem::replace(&mut self.status, ReaderStatus::Closed) {
            ReaderStatus::Errored(e) => Err(e),
            _ => Ok(()),
        }
    }
}
