//! Read-side query engine
//!
//! Resolves profile ids through a [`Reader`], decodes the stored artifacts
//! and merges them into a single answer (merge-on-read).

use crate::context::Context;
use crate::error::{Result, StorageError};
use crate::metrics;
use crate::storage::{FindProfilesParams, ProfileList, Reader};
use aperture_shared::codec::{merge_profiles, parse_profile, serialize_profile};
use aperture_shared::{Meta, Profile, ProfileId};
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Result of a merged query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merged profile was written to the destination
    Written { profiles: usize },
    /// Matches exist but carry no samples; nothing was written
    Empty,
}

pub struct Querier {
    reader: Arc<dyn Reader>,
}

impl Querier {
    pub fn new(reader: Arc<dyn Reader>) -> Self {
        Self { reader }
    }

    /// Load and decode one stored profile.
    pub async fn get_profile(&self, ctx: &Context, id: ProfileId) -> Result<Profile> {
        let mut list = self.reader.list_profiles(ctx, &[id]).await?;
        let result = Self::first_profile(ctx, list.as_mut(), id).await;
        let closed = list.close();
        let profile = result?;
        closed?;
        Ok(profile)
    }

    async fn first_profile(ctx: &Context, list: &mut dyn ProfileList, id: ProfileId) -> Result<Profile> {
        ctx.err()?;
        if !list.next().await {
            ctx.err()?;
            return Err(StorageError::NotFound);
        }
        let bytes = list.profile().await?;
        parse_profile(&bytes).map_err(|e| StorageError::codec(format!("profile {}", id), e))
    }

    /// Merge the profiles stored under `ids` and write the result to `dst`.
    pub async fn get_profiles_to<W: Write>(
        &self,
        ctx: &Context,
        dst: W,
        ids: &[ProfileId],
    ) -> Result<MergeOutcome> {
        if ids.is_empty() {
            return Err(StorageError::validation("no profile ids"));
        }
        self.merge_to(ctx, dst, ids).await
    }

    pub async fn find_profiles(&self, ctx: &Context, params: &FindProfilesParams) -> Result<Vec<Meta>> {
        self.reader.find_profiles(ctx, params).await
    }

    /// Find matching profiles and write their merge to `dst`.
    pub async fn find_profile_to<W: Write>(
        &self,
        ctx: &Context,
        dst: W,
        params: &FindProfilesParams,
    ) -> Result<MergeOutcome> {
        let metas = self.reader.find_profiles(ctx, params).await?;
        let ids: Vec<ProfileId> = metas.iter().map(|m| m.profile_id).collect();
        self.merge_to(ctx, dst, &ids).await
    }

    /// Like [`find_profile_to`](Self::find_profile_to) but resolves ids only.
    pub async fn find_merge_profile_to<W: Write>(
        &self,
        ctx: &Context,
        dst: W,
        params: &FindProfilesParams,
    ) -> Result<MergeOutcome> {
        let ids = self.reader.find_profile_ids(ctx, params).await?;
        self.merge_to(ctx, dst, &ids).await
    }

    async fn merge_to<W: Write>(&self, ctx: &Context, dst: W, ids: &[ProfileId]) -> Result<MergeOutcome> {
        let profiles = self.collect_profiles(ctx, ids).await?;
        if profiles.is_empty() {
            return Err(StorageError::NotFound);
        }

        let count = profiles.len();
        let merged = merge_profiles(profiles)
            .map_err(|e| StorageError::codec(format!("merge of {} profiles", count), e))?;
        metrics::PROFILES_MERGED.inc_by(count as f64);

        if merged.is_empty() {
            debug!("merged {} profiles without samples", count);
            return Ok(MergeOutcome::Empty);
        }
        serialize_profile(&merged, dst)
            .map_err(|e| StorageError::codec("merged profile", e))?;
        Ok(MergeOutcome::Written { profiles: count })
    }

    /// Decode every profile of `ids`. The list is always closed.
    async fn collect_profiles(&self, ctx: &Context, ids: &[ProfileId]) -> Result<Vec<Profile>> {
        let mut list = self.reader.list_profiles(ctx, ids).await?;
        let result = Self::drain(ctx, list.as_mut()).await;
        let closed = list.close();
        let profiles = result?;
        closed?;
        Ok(profiles)
    }

    async fn drain(ctx: &Context, list: &mut dyn ProfileList) -> Result<Vec<Profile>> {
        let mut profiles = Vec::new();
        loop {
            ctx.err()?;
            if !list.next().await {
                break;
            }
            ctx.err()?;
            let bytes = list.profile().await?;
            let profile = parse_profile(&bytes).map_err(|e| {
                StorageError::codec(format!("profile {} of the merge set", profiles.len() + 1), e)
            })?;
            profiles.push(profile);
        }
        // a list stops early when its context ends
        ctx.err()?;
        Ok(profiles)
    }
}
