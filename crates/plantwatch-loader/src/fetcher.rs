//! Field fetchers and their registry
//!
//! A [`FieldFetcher`] is the data-access side of the loader: one async
//! function per display field. The loader does not care whether it talks
//! HTTP, reads a cache, or fabricates data.

use crate::error::FetchError;
use crate::types::{EntityId, FieldName};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Fetches the current value of one field for an entity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FieldFetcher: Send + Sync {
    /// Fetch the field's value
    async fn fetch(&self, entity: &EntityId) -> Result<Value, FetchError>;
}

/// Adapter turning an async closure into a [`FieldFetcher`]
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F> {
    /// Wrap closure
    #[inline]
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> std::fmt::Debug for FnFetcher<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFetcher").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> FieldFetcher for FnFetcher<F>
where
    F: Fn(EntityId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    async fn fetch(&self, entity: &EntityId) -> Result<Value, FetchError> {
        (self.f)(entity.clone()).await
    }
}

/// Build a shared fetcher from an async closure
///
/// ```rust,ignore
/// let kpis = fetcher_fn(|plant| async move { api.kpis(&plant).await });
/// ```
pub fn fetcher_fn<F, Fut>(f: F) -> Arc<dyn FieldFetcher>
where
    F: Fn(EntityId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    Arc::new(FnFetcher::new(f))
}

/// Registry mapping field names to fetchers
///
/// Used to turn a config-declared [`TierLayout`](crate::plan::TierLayout)
/// into an executable plan.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<FieldName, Arc<dyn FieldFetcher>>,
}

impl FetcherRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            fetchers: HashMap::new(),
        }
    }

    /// Register fetcher for a field, replacing any previous one
    pub fn register(&mut self, field: impl Into<FieldName>, fetcher: Arc<dyn FieldFetcher>) {
        self.fetchers.insert(field.into(), fetcher);
    }

    /// Builder-style [`register`](Self::register)
    #[inline]
    #[must_use]
    pub fn with(mut self, field: impl Into<FieldName>, fetcher: Arc<dyn FieldFetcher>) -> Self {
        self.register(field, fetcher);
        self
    }

    /// Get fetcher for a field
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Arc<dyn FieldFetcher>> {
        self.fetchers.get(field).cloned()
    }

    /// Check if a field has a fetcher
    #[inline]
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fetchers.contains_key(field)
    }

    /// Registered field names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fetchers.keys().map(FieldName::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered fetchers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherRegistry")
            .field("fields", &self.names())
            .finish()
    }
}
