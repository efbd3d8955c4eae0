//! ClickHouse storage backend
//!
//! One row per profile: metadata columns for filtering and the artifact as
//! base64. Inserts are written synchronously so a returned meta is durable.
//! Label filters are applied in process after the time/service query.

use crate::context::Context;
use crate::error::{Result, StorageError};
use crate::metrics;
use crate::storage::{
    resolve_created_at, FindProfilesParams, ProfileBody, ProfileList, Reader, WriteProfileParams,
    Writer,
};
use aperture_shared::utils::time::{from_unix_nanos, unix_nanos};
use aperture_shared::{parse_profile, Labels, Meta, ProfileId, ProfileType};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

const TABLE_NAME: &str = "aperture_profiles";
const BACKEND: &str = "clickhouse";

const TABLE_ENGINE: &str = "\
MergeTree() \
PARTITION BY toYYYYMM(toDateTime(intDiv(created_at_ns, 1000000000))) \
ORDER BY (service, profile_type, created_at_ns)";

/// One row in the profiles table (matches the ClickHouse schema).
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct ProfileRow {
    pub profile_id: String,
    /// Empty when the profile has no external id
    pub external_id: String,
    pub service: String,
    pub profile_type: u8,
    pub labels: String,
    pub created_at_ns: i64,
    /// Artifact stored as base64
    pub payload: String,
}

/// Metadata columns only, for finds.
#[derive(Debug, Row, Deserialize)]
struct MetaRow {
    profile_id: String,
    external_id: String,
    service: String,
    profile_type: u8,
    labels: String,
    created_at_ns: i64,
}

impl MetaRow {
    fn into_meta(self) -> Result<Meta> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            StorageError::backend(
                "decode row",
                format!("profile {}: bad {}: {}", self.profile_id, what, e),
            )
        };
        let profile_id: ProfileId = self
            .profile_id
            .parse()
            .map_err(|e| corrupt("profile_id", &e))?;
        let external_id = if self.external_id.is_empty() {
            None
        } else {
            Some(self.external_id.parse().map_err(|e| corrupt("external_id", &e))?)
        };
        let labels: Labels = self.labels.parse().map_err(|e| corrupt("labels", &e))?;

        Ok(Meta {
            profile_id,
            external_id,
            service: self.service,
            profile_type: ProfileType::from_u8(self.profile_type),
            labels,
            created_at: from_unix_nanos(u64::try_from(self.created_at_ns).unwrap_or(0)),
        })
    }
}

/// ClickHouse-backed profile store.
pub struct ClickHouseStore {
    client: Client,
    table: String,
}

fn ch_err(op: &'static str) -> impl FnOnce(clickhouse::error::Error) -> StorageError {
    move |e| StorageError::backend(op, e)
}

impl ClickHouseStore {
    /// Connect and create the table if needed. `ttl_days == 0` keeps rows
    /// forever.
    pub async fn new(endpoint: &str, database: &str, ttl_days: u32) -> Result<Self> {
        let mut client = Client::default()
            .with_url(endpoint)
            .with_database(database)
            .with_option("connect_timeout", "10")
            .with_option("receive_timeout", "30");
        if let Ok(password) = std::env::var("APERTURE_CLICKHOUSE_PASSWORD") {
            client = client.with_user("default").with_password(password);
        }

        let store = Self {
            client,
            table: TABLE_NAME.to_string(),
        };
        store.ensure_table(ttl_days).await?;
        info!("ClickHouse storage ready: {} / {}", endpoint, database);
        Ok(store)
    }

    async fn ensure_table(&self, ttl_days: u32) -> Result<()> {
        let ttl = if ttl_days > 0 {
            format!(
                " TTL toDateTime(intDiv(created_at_ns, 1000000000)) + INTERVAL {} DAY",
                ttl_days
            )
        } else {
            String::new()
        };
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                profile_id String,
                external_id String,
                service LowCardinality(String),
                profile_type UInt8,
                labels String,
                created_at_ns Int64,
                payload String
            ) ENGINE = {}{}",
            self.table, TABLE_ENGINE, ttl
        );
        self.client
            .query(&ddl)
            .execute()
            .await
            .map_err(ch_err("create table"))
    }

    async fn insert_row(client: &Client, table: &str, row: &ProfileRow) -> Result<()> {
        let mut insert = client.insert::<ProfileRow>(table).map_err(ch_err("insert"))?;
        insert.write(row).await.map_err(ch_err("write row"))?;
        insert.end().await.map_err(ch_err("flush insert"))
    }

    async fn fetch_metas(&self, params: &FindProfilesParams, min_ns: i64, max_ns: i64) -> Result<Vec<Meta>> {
        let mut sql = format!(
            "SELECT profile_id, external_id, service, profile_type, labels, created_at_ns \
             FROM {} WHERE service = ? AND created_at_ns >= ? AND created_at_ns <= ?",
            self.table
        );
        if params.profile_type.is_known() {
            sql += " AND profile_type = ?";
        }
        sql += " ORDER BY created_at_ns, profile_id";
        // label filtering happens here, so the limit can only go to the server without labels
        if params.labels.is_empty() {
            sql += " LIMIT ?";
        }

        let mut q = self
            .client
            .query(&sql)
            .bind(params.service.as_str())
            .bind(min_ns)
            .bind(max_ns);
        if params.profile_type.is_known() {
            q = q.bind(params.profile_type.as_u8());
        }
        if params.labels.is_empty() {
            q = q.bind(params.effective_limit() as u64);
        }

        let limit = params.effective_limit();
        let mut cursor = q.fetch::<MetaRow>().map_err(ch_err("query profiles"))?;
        let mut metas = Vec::new();
        while let Some(row) = cursor.next().await.map_err(ch_err("read profiles"))? {
            let meta = row.into_meta()?;
            if !meta.labels.includes(&params.labels) {
                continue;
            }
            metas.push(meta);
            if metas.len() >= limit {
                break;
            }
        }
        Ok(metas)
    }
}

fn clamp_nanos(t: &chrono::DateTime<chrono::Utc>) -> i64 {
    i64::try_from(unix_nanos(t)).unwrap_or(i64::MAX)
}

#[async_trait]
impl Writer for ClickHouseStore {
    async fn write_profile(
        &self,
        ctx: &Context,
        params: &WriteProfileParams,
        body: ProfileBody,
    ) -> Result<Meta> {
        params.validate()?;
        ctx.err()?;

        let artifact = body.into_bytes().await?;
        let profile = if params.profile_type == ProfileType::Trace {
            None
        } else {
            Some(parse_profile(&artifact).map_err(|e| {
                StorageError::codec(
                    format!("{} profile for service {}", params.profile_type, params.service),
                    e,
                )
            })?)
        };

        let meta = Meta {
            profile_id: ProfileId::generate(),
            external_id: params.external_id,
            service: params.service.clone(),
            profile_type: params.profile_type,
            labels: params.labels.clone(),
            created_at: resolve_created_at(params.created_at, profile.as_ref()),
        };
        let row = ProfileRow {
            profile_id: meta.profile_id.to_string(),
            external_id: meta.external_id.map(|id| id.to_string()).unwrap_or_default(),
            service: meta.service.clone(),
            profile_type: meta.profile_type.as_u8(),
            labels: meta.labels.to_string(),
            created_at_ns: clamp_nanos(&meta.created_at),
            payload: BASE64.encode(&artifact),
        };

        let result = match ctx.run(Self::insert_row(&self.client, &self.table, &row)).await {
            Ok(inserted) => inserted,
            Err(e) => Err(e.into()),
        };
        metrics::record_write(BACKEND, result.is_ok(), artifact.len());
        result?;

        debug!("Inserted profile {} into ClickHouse", meta.profile_id);
        Ok(meta)
    }
}

#[async_trait]
impl Reader for ClickHouseStore {
    async fn find_profiles(&self, ctx: &Context, params: &FindProfilesParams) -> Result<Vec<Meta>> {
        let range = params.validate()?;
        let _timer = metrics::FIND_DURATION
            .with_label_values(&[BACKEND])
            .start_timer();

        let metas = ctx
            .run(self.fetch_metas(params, clamp_nanos(&range.min), clamp_nanos(&range.max)))
            .await??;
        if metas.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(metas)
    }

    async fn list_profiles(&self, ctx: &Context, ids: &[ProfileId]) -> Result<Box<dyn ProfileList>> {
        if ids.is_empty() {
            return Err(StorageError::validation("no profile ids"));
        }
        ctx.err()?;
        Ok(Box::new(ClickHouseProfileList {
            client: self.client.clone(),
            table: self.table.clone(),
            ctx: ctx.clone(),
            ids: ids.iter().copied().collect(),
            current: None,
            error: None,
            closed: false,
        }))
    }

    async fn list_services(&self, ctx: &Context) -> Result<Vec<String>> {
        let sql = format!("SELECT DISTINCT service FROM {} ORDER BY service", self.table);
        let services = ctx
            .run(self.client.query(&sql).fetch_all::<String>())
            .await?
            .map_err(ch_err("list services"))?;
        if services.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(services)
    }
}

/// Fetches one payload per id on demand
struct ClickHouseProfileList {
    client: Client,
    table: String,
    ctx: Context,
    ids: VecDeque<ProfileId>,
    current: Option<Bytes>,
    error: Option<StorageError>,
    closed: bool,
}

impl ClickHouseProfileList {
    async fn fetch_payload(&self, id: ProfileId) -> Result<Option<Bytes>> {
        #[derive(Debug, Row, Deserialize)]
        struct PayloadRow {
            payload: String,
        }

        let sql = format!("SELECT payload FROM {} WHERE profile_id = ? LIMIT 1", self.table);
        let row = self
            .client
            .query(&sql)
            .bind(id.to_string())
            .fetch_optional::<PayloadRow>()
            .await
            .map_err(ch_err("fetch profile"))?;
        match row {
            Some(row) => BASE64
                .decode(row.payload)
                .map(|b| Some(Bytes::from(b)))
                .map_err(|e| StorageError::backend("decode payload", format!("profile {}: {}", id, e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProfileList for ClickHouseProfileList {
    async fn next(&mut self) -> bool {
        self.current = None;
        if self.closed || self.error.is_some() {
            return false;
        }
        while let Some(id) = self.ids.pop_front() {
            let fetched = match self.ctx.run(self.fetch_payload(id)).await {
                Ok(fetched) => fetched,
                Err(e) => Err(e.into()),
            };
            match fetched {
                Ok(Some(payload)) => {
                    self.current = Some(payload);
                    return true;
                }
                // unknown or expired id
                Ok(None) => continue,
                Err(e) => {
                    self.error = Some(e);
                    return false;
                }
            }
        }
        false
    }

    async fn profile(&mut self) -> Result<Bytes> {
        self.ctx.err()?;
        if self.closed {
            return Err(StorageError::validation("profile list is closed"));
        }
        if self.error.is_some() {
            return Err(StorageError::backend("read profile", "profile list failed, see close"));
        }
        self.current
            .clone()
            .ok_or_else(|| StorageError::validation("profile called without a successful next"))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.current = None;
        self.ids.clear();
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
