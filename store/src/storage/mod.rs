//! Storage contract and backends
//!
//! Every backend implements [`Writer`], [`Reader`] or both. Callers hold them
//! as `Arc<dyn Writer>` / `Arc<dyn Reader>` so backends can be swapped or
//! composed (see [`MultiWriter`]) without touching the query path.

#[cfg(feature = "clickhouse-storage")]
pub mod clickhouse;
pub mod kv;
pub mod multi_writer;
pub mod testing;

pub use multi_writer::MultiWriter;

use crate::context::Context;
use crate::error::{Result, StorageError};
use aperture_shared::utils::time::{now_seconds, truncate_to_seconds};
use aperture_shared::{Labels, Meta, Profile, ProfileId, ProfileType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Number of results a find returns when the caller sets no limit
pub const DEFAULT_FIND_LIMIT: usize = 1000;

/// Parameters of a single profile write
#[derive(Debug, Clone, Default)]
pub struct WriteProfileParams {
    pub service: String,
    pub profile_type: ProfileType,
    /// Canonical id of the same profile in another backend
    pub external_id: Option<ProfileId>,
    pub labels: Labels,
    /// Explicit creation time; otherwise taken from the artifact or the clock
    pub created_at: Option<DateTime<Utc>>,
}

impl WriteProfileParams {
    pub fn validate(&self) -> Result<()> {
        if self.service.is_empty() {
            return Err(StorageError::validation("empty service"));
        }
        if !self.profile_type.is_known() {
            return Err(StorageError::validation("unknown profile type"));
        }
        Ok(())
    }
}

/// Query parameters for [`Reader::find_profiles`]
#[derive(Debug, Clone, Default)]
pub struct FindProfilesParams {
    pub service: String,
    /// `Unknown` matches every type
    pub profile_type: ProfileType,
    /// Stored labels must include all of these
    pub labels: Labels,
    pub created_at_min: Option<DateTime<Utc>>,
    /// Defaults to now
    pub created_at_max: Option<DateTime<Utc>>,
    /// 0 means the backend default
    pub limit: usize,
}

/// A validated time window, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
}

impl FindProfilesParams {
    /// Check the parameters and resolve defaults. Called by every backend
    /// before any I/O.
    pub fn validate(&self) -> Result<TimeRange> {
        if self.service.is_empty() {
            return Err(StorageError::validation("empty service"));
        }
        let min = self
            .created_at_min
            .filter(|t| t.timestamp() > 0)
            .ok_or_else(|| StorageError::validation("created_at_min is required"))?;
        let max = self.created_at_max.unwrap_or_else(Utc::now);
        if min > max {
            return Err(StorageError::validation(format!(
                "created_at_min {} is after created_at_max {}",
                min, max
            )));
        }
        Ok(TimeRange { min, max })
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_FIND_LIMIT
        } else {
            self.limit
        }
    }

    /// Types a query covers, in key order.
    pub fn profile_types(&self) -> Vec<ProfileType> {
        if self.profile_type.is_known() {
            vec![self.profile_type]
        } else {
            ProfileType::KNOWN.to_vec()
        }
    }
}

/// Creation time of a new record: the caller's explicit value, else the
/// timestamp embedded in the artifact, else now. Whole seconds.
pub fn resolve_created_at(explicit: Option<DateTime<Utc>>, profile: Option<&Profile>) -> DateTime<Utc> {
    explicit
        .or_else(|| profile.and_then(Profile::created_at))
        .map(truncate_to_seconds)
        .unwrap_or_else(now_seconds)
}

/// Artifact bytes handed to a writer
pub enum ProfileBody {
    Buffered(Bytes),
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl ProfileBody {
    /// Read the whole body into memory.
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self {
            ProfileBody::Buffered(bytes) => Ok(bytes),
            ProfileBody::Stream(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl From<Bytes> for ProfileBody {
    fn from(bytes: Bytes) -> Self {
        ProfileBody::Buffered(bytes)
    }
}

impl From<Vec<u8>> for ProfileBody {
    fn from(bytes: Vec<u8>) -> Self {
        ProfileBody::Buffered(Bytes::from(bytes))
    }
}

impl std::fmt::Debug for ProfileBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            ProfileBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[async_trait]
pub trait Writer: Send + Sync {
    /// Persist one artifact. The body is consumed fully before returning.
    /// On success the data is durable and the returned meta carries the
    /// assigned id and resolved creation time.
    async fn write_profile(
        &self,
        ctx: &Context,
        params: &WriteProfileParams,
        body: ProfileBody,
    ) -> Result<Meta>;
}

#[async_trait]
pub trait Reader: Send + Sync {
    /// Matching metas, oldest first. `NotFound` when nothing matches.
    async fn find_profiles(&self, ctx: &Context, params: &FindProfilesParams) -> Result<Vec<Meta>>;

    /// Like [`find_profiles`](Self::find_profiles) but ids only.
    async fn find_profile_ids(
        &self,
        ctx: &Context,
        params: &FindProfilesParams,
    ) -> Result<Vec<ProfileId>> {
        let metas = self.find_profiles(ctx, params).await?;
        Ok(metas.into_iter().map(|m| m.profile_id).collect())
    }

    /// Lazily yield the artifacts stored under `ids`. Unknown ids are skipped.
    async fn list_profiles(&self, ctx: &Context, ids: &[ProfileId]) -> Result<Box<dyn ProfileList>>;

    /// Known service names, sorted. `NotFound` when there are none.
    async fn list_services(&self, ctx: &Context) -> Result<Vec<String>>;
}

/// Forward-only sequence of stored artifacts.
///
/// `next` must be called before each `profile`. Once the context passed to
/// `list_profiles` ends, `next` returns false and `profile` returns the
/// context error. `close` releases backend resources, reports the first
/// error seen, and may be called more than once.
#[async_trait]
pub trait ProfileList: Send {
    async fn next(&mut self) -> bool;

    async fn profile(&mut self) -> Result<Bytes>;

    fn close(&mut self) -> Result<()>;
}
