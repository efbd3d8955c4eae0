//! Aperture profile storage
//!
//! Writers persist profiling artifacts with their metadata, readers find
//! them by service, type, labels and time, and the querier merges them on
//! read. The embedded LMDB store is always available; ClickHouse is behind
//! the `clickhouse-storage` feature.

pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod querier;
pub mod storage;

pub use collector::Collector;
pub use config::{Backends, StoreConfig};
pub use context::{Context, ContextError};
pub use error::{Result, StorageError};
pub use querier::{MergeOutcome, Querier};
pub use storage::kv::{KvOptions, KvStore};
pub use storage::{
    FindProfilesParams, MultiWriter, ProfileBody, ProfileList, Reader, WriteProfileParams, Writer,
};
