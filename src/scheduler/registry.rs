//! # Job Handler Registry
//!
//! Maps a job's `handlerName` to the code that runs it. Lookups happen per
//! dispatch, so handlers registered after a job was scheduled are picked up.

use super::errors::RegistryError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Failure reported by a job handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct JobHandlerError(pub String);

impl From<String> for JobHandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for JobHandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for JobHandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// What a handler sees for one attempt
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub job_name: String,
    pub execution_id: Uuid,
    pub attempt: u32,
    pub handler_type: Option<String>,
    pub payload: Value,
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self, context: JobContext) -> Result<Value, JobHandlerError>;
}

pub struct FnJobHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> JobHandler for FnJobHandler<F, Fut>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobHandlerError>> + Send + 'static,
{
    async fn run(&self, context: JobContext) -> Result<Value, JobHandlerError> {
        (self.f)(context).await
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), RegistryError> {
        use dashmap::mapref::entry::Entry;
        let name = name.into();
        match self.handlers.entry(name.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateHandler { name }),
            Entry::Vacant(slot) => {
                debug!(handler = %name, "Registered job handler");
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Register an async closure
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F) -> Result<(), RegistryError>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobHandlerError>> + Send + 'static,
    {
        self.register(
            name,
            Arc::new(FnJobHandler {
                f,
                _marker: PhantomData,
            }),
        )
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn JobHandler>, RegistryError> {
        self.handlers
            .get(name)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| RegistryError::HandlerNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|h| h.key().clone()).collect();
        names.sort();
        names
    }
}
