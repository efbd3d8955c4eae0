//! Store configuration

use crate::storage::kv::{KvOptions, KvStore};
use crate::storage::{MultiWriter, Reader, Writer};
use anyhow::{bail, Context as _};
use aperture_shared::utils::parse_duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Prefix for environment overrides
const ENV_PREFIX: &str = "APERTURE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Configured backends. The first is the primary: it serves reads and
    /// its ids are authoritative. The rest receive replicated writes.
    pub storages: Vec<StorageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Kv(KvConfig),
    ClickHouse(ClickHouseConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    /// Data directory
    pub path: PathBuf,

    pub map_size_mb: usize,

    /// Record lifetime such as "120h"; "0" keeps records forever
    pub profile_ttl: String,

    /// Reclamation interval; "0" disables the background task
    pub gc_interval: String,

    pub gc_discard_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseConfig {
    pub endpoint: String,
    pub database: String,
    /// Row lifetime in days, 0 disables the table TTL
    pub ttl_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storages: vec![StorageConfig::Kv(KvConfig::default())],
        }
    }
}

impl Default for KvConfig {
    fn default() -> Self {
        let defaults = KvOptions::default();
        Self {
            path: std::env::var("APERTURE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/profiles")),
            map_size_mb: defaults.map_size / (1024 * 1024),
            profile_ttl: "120h".to_string(),
            gc_interval: "5m".to_string(),
            gc_discard_ratio: defaults.gc_discard_ratio,
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::var("APERTURE_CLICKHOUSE_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:8123".to_string()),
            database: std::env::var("APERTURE_CLICKHOUSE_DATABASE")
                .unwrap_or_else(|_| "aperture".to_string()),
            ttl_days: 5,
        }
    }
}

impl KvConfig {
    pub fn options(&self) -> anyhow::Result<KvOptions> {
        if !(0.0..=1.0).contains(&self.gc_discard_ratio) {
            bail!(
                "gc_discard_ratio must be within [0, 1], got {}",
                self.gc_discard_ratio
            );
        }
        if self.map_size_mb == 0 {
            bail!("map_size_mb must be positive");
        }
        Ok(KvOptions {
            map_size: self.map_size_mb * 1024 * 1024,
            profile_ttl: parse_duration(&self.profile_ttl)
                .with_context(|| format!("invalid profile_ttl {:?}", self.profile_ttl))?,
            gc_interval: parse_duration(&self.gc_interval)
                .with_context(|| format!("invalid gc_interval {:?}", self.gc_interval))?,
            gc_discard_ratio: self.gc_discard_ratio,
        })
    }
}

/// Opened backends, ready to serve
pub struct Backends {
    /// Primary writer, or a [`MultiWriter`] when replicas are configured
    pub writer: Arc<dyn Writer>,
    /// Reader of the primary backend
    pub reader: Arc<dyn Reader>,
    /// Embedded stores, for maintenance commands and shutdown
    pub kv: Vec<Arc<KvStore>>,
}

impl Backends {
    /// Stop background tasks of every embedded store.
    pub async fn shutdown(&self) {
        for store in &self.kv {
            store.shutdown().await;
        }
    }
}

impl StoreConfig {
    /// Load from an optional file, then apply `APERTURE_*` environment
    /// overrides (nested keys use `__`). Backend lists only come from the
    /// file or the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().context("failed to read store configuration")?;
        let cfg: StoreConfig = settings
            .try_deserialize()
            .context("invalid store configuration")?;
        if cfg.storages.is_empty() {
            bail!("no storage backends configured");
        }
        Ok(cfg)
    }

    /// Open every configured backend.
    pub async fn open(&self) -> anyhow::Result<Backends> {
        let mut writers: Vec<Arc<dyn Writer>> = Vec::with_capacity(self.storages.len());
        let mut reader: Option<Arc<dyn Reader>> = None;
        let mut kv = Vec::new();

        for storage in &self.storages {
            let (w, r): (Arc<dyn Writer>, Arc<dyn Reader>) = match storage {
                StorageConfig::Kv(cfg) => {
                    let store = KvStore::open(&cfg.path, cfg.options()?).with_context(|| {
                        format!("failed to open profile store at {}", cfg.path.display())
                    })?;
                    let store = Arc::new(store);
                    store.spawn_gc_task();
                    kv.push(store.clone());
                    (store.clone(), store)
                }
                StorageConfig::ClickHouse(cfg) => open_clickhouse(cfg).await?,
            };
            writers.push(w);
            if reader.is_none() {
                reader = Some(r);
            }
        }

        let reader = match reader {
            Some(reader) => reader,
            None => bail!("no storage backends configured"),
        };
        let writer: Arc<dyn Writer> = if writers.len() == 1 {
            writers.remove(0)
        } else {
            info!("Replicating writes to {} backends", writers.len());
            Arc::new(MultiWriter::new(writers)?)
        };

        Ok(Backends { writer, reader, kv })
    }
}

#[cfg(feature = "clickhouse-storage")]
async fn open_clickhouse(
    cfg: &ClickHouseConfig,
) -> anyhow::Result<(Arc<dyn Writer>, Arc<dyn Reader>)> {
    use crate::storage::clickhouse::ClickHouseStore;

    let store = ClickHouseStore::new(&cfg.endpoint, &cfg.database, cfg.ttl_days)
        .await
        .with_context(|| format!("failed to connect to ClickHouse at {}", cfg.endpoint))?;
    let store = Arc::new(store);
    Ok((store.clone(), store))
}

#[cfg(not(feature = "clickhouse-storage"))]
async fn open_clickhouse(
    cfg: &ClickHouseConfig,
) -> anyhow::Result<(Arc<dyn Writer>, Arc<dyn Reader>)> {
    bail!(
        "ClickHouse storage ({}) requires the clickhouse-storage feature",
        cfg.endpoint
    )
}
