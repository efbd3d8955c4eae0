//! In-memory doubles for exercising code written against the storage
//! traits without a real backend.

use crate::context::Context;
use crate::error::{Result, StorageError};
use crate::storage::{
    resolve_created_at, FindProfilesParams, ProfileBody, ProfileList, Reader, WriteProfileParams,
    Writer,
};
use aperture_shared::{Meta, ProfileId};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One call received by a [`StubWriter`]
#[derive(Debug, Clone)]
pub struct WriteCall {
    pub params: WriteProfileParams,
    pub body: Bytes,
    /// Meta the writer returned (or would have returned, when failing)
    pub meta: Meta,
}

/// Writer that records every call and optionally fails all of them
#[derive(Debug, Default)]
pub struct StubWriter {
    fail_with: Option<String>,
    calls: Mutex<Vec<WriteCall>>,
}

impl StubWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Writer for StubWriter {
    async fn write_profile(
        &self,
        ctx: &Context,
        params: &WriteProfileParams,
        body: ProfileBody,
    ) -> Result<Meta> {
        ctx.err()?;
        let body = body.into_bytes().await?;
        let meta = Meta {
            profile_id: ProfileId::generate(),
            external_id: params.external_id,
            service: params.service.clone(),
            profile_type: params.profile_type,
            labels: params.labels.clone(),
            created_at: resolve_created_at(params.created_at, None),
        };
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WriteCall {
                params: params.clone(),
                body,
                meta: meta.clone(),
            });

        match &self.fail_with {
            Some(message) => Err(StorageError::backend("stub write", message.clone())),
            None => Ok(meta),
        }
    }
}

type FindFn = dyn Fn(&FindProfilesParams) -> Result<Vec<Meta>> + Send + Sync;
type ListFn = dyn Fn(&Context, &[ProfileId]) -> Result<Box<dyn ProfileList>> + Send + Sync;

/// Reader whose answers come from closures set by the test
#[derive(Default)]
pub struct MockReader {
    find: Option<Box<FindFn>>,
    list: Option<Box<ListFn>>,
    services: Vec<String>,
}

impl MockReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_find<F>(mut self, f: F) -> Self
    where
        F: Fn(&FindProfilesParams) -> Result<Vec<Meta>> + Send + Sync + 'static,
    {
        self.find = Some(Box::new(f));
        self
    }

    pub fn with_list<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &[ProfileId]) -> Result<Box<dyn ProfileList>> + Send + Sync + 'static,
    {
        self.list = Some(Box::new(f));
        self
    }

    pub fn with_services(mut self, services: &[&str]) -> Self {
        self.services = services.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[async_trait]
impl Reader for MockReader {
    async fn find_profiles(&self, ctx: &Context, params: &FindProfilesParams) -> Result<Vec<Meta>> {
        ctx.err()?;
        match &self.find {
            Some(find) => find(params),
            None => Err(StorageError::NotFound),
        }
    }

    async fn list_profiles(&self, ctx: &Context, ids: &[ProfileId]) -> Result<Box<dyn ProfileList>> {
        if ids.is_empty() {
            return Err(StorageError::validation("no profile ids"));
        }
        match &self.list {
            Some(list) => list(ctx, ids),
            None => Ok(Box::new(VecProfileList::new(ctx.clone(), Vec::new()))),
        }
    }

    async fn list_services(&self, ctx: &Context) -> Result<Vec<String>> {
        ctx.err()?;
        if self.services.is_empty() {
            return Err(StorageError::NotFound);
        }
        let mut services = self.services.clone();
        services.sort();
        Ok(services)
    }
}

/// Well-behaved list over fixed artifacts
pub struct VecProfileList {
    ctx: Context,
    items: VecDeque<Bytes>,
    current: Option<Bytes>,
    closed: Arc<AtomicBool>,
}

impl VecProfileList {
    pub fn new(ctx: Context, items: Vec<Bytes>) -> Self {
        Self {
            ctx,
            items: items.into(),
            current: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag set once `close` is called.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

#[async_trait]
impl ProfileList for VecProfileList {
    async fn next(&mut self) -> bool {
        if self.ctx.err().is_err() {
            self.current = None;
            return false;
        }
        self.current = self.items.pop_front();
        self.current.is_some()
    }

    async fn profile(&mut self) -> Result<Bytes> {
        self.ctx.err()?;
        self.current
            .clone()
            .ok_or_else(|| StorageError::validation("profile called without a successful next"))
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// List that claims another artifact forever and never looks at its
/// context. Callers must stop on their own.
pub struct EndlessProfileList {
    artifact: Bytes,
    served: Arc<std::sync::atomic::AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl EndlessProfileList {
    pub fn new(artifact: Bytes) -> Self {
        Self {
            artifact,
            served: Arc::default(),
            closed: Arc::default(),
        }
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Counter of artifacts handed out so far.
    pub fn served_counter(&self) -> Arc<std::sync::atomic::AtomicUsize> {
        self.served.clone()
    }
}

#[async_trait]
impl ProfileList for EndlessProfileList {
    async fn next(&mut self) -> bool {
        tokio::task::yield_now().await;
        true
    }

    async fn profile(&mut self) -> Result<Bytes> {
        self.served.fetch_add(1, Ordering::SeqCst);
        Ok(self.artifact.clone())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
