//! Fan-out writer replicating each write to several backends

use crate::context::Context;
use crate::error::{Result, StorageError};
use crate::storage::{ProfileBody, WriteProfileParams, Writer};
use aperture_shared::Meta;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes every profile to all wrapped writers.
///
/// The first writer is authoritative: its meta is returned and its id is
/// passed to the others as `external_id`. Replicas are written one after
/// another once the primary has committed. A replica failure is returned
/// to the caller even though the primary write (and any earlier replica
/// writes) have already been persisted; nothing is rolled back.
pub struct MultiWriter {
    writers: Vec<Arc<dyn Writer>>,
}

impl MultiWriter {
    pub fn new(writers: Vec<Arc<dyn Writer>>) -> Result<Self> {
        if writers.is_empty() {
            return Err(StorageError::validation("multi writer needs at least one writer"));
        }
        Ok(Self { writers })
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

#[async_trait]
impl Writer for MultiWriter {
    async fn write_profile(
        &self,
        ctx: &Context,
        params: &WriteProfileParams,
        body: ProfileBody,
    ) -> Result<Meta> {
        let (primary, replicas) = match self.writers.split_first() {
            Some(split) => split,
            None => return Err(StorageError::validation("multi writer has no writers")),
        };

        if replicas.is_empty() {
            return primary.write_profile(ctx, params, body).await;
        }

        // every writer needs its own copy of the body
        let data = body.into_bytes().await?;

        let meta = primary
            .write_profile(ctx, params, ProfileBody::Buffered(data.clone()))
            .await?;

        // replicas keep the primary's id and timestamp
        let replica_params = WriteProfileParams {
            external_id: Some(meta.profile_id),
            created_at: Some(meta.created_at),
            ..params.clone()
        };
        for (i, writer) in replicas.iter().enumerate() {
            match writer
                .write_profile(ctx, &replica_params, ProfileBody::Buffered(data.clone()))
                .await
            {
                Ok(replica) => debug!(
                    "replica {} stored profile {} as {}",
                    i + 1,
                    meta.profile_id,
                    replica.profile_id
                ),
                Err(e) => {
                    warn!(
                        "replica {} failed to store profile {} (primary write kept): {}",
                        i + 1,
                        meta.profile_id,
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(meta)
    }
}
