//! Reference factory strategies and the instrumentation decorator
//!
//! A reference factory produces the externally visible reference for a
//! public component. The container invokes it once per request type and
//! caches the result, so repeated lookups return the same reference for the
//! container's lifetime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use crate::component::{Component, ComponentRef, DependencySpec};
use crate::error::ContainerError;

/// Strategy producing the externally visible reference for a public component.
pub trait ReferenceFactory: Send + Sync {
    /// Wrap (or pass through) the raw instance for external exposure.
    fn wrap(&self, request_type: &str, instance: ComponentRef) -> ComponentRef;
}

/// Default strategy: the exposed reference is the instance itself.
#[derive(Debug, Default)]
pub struct DirectReferenceFactory;

impl ReferenceFactory for DirectReferenceFactory {
    fn wrap(&self, _request_type: &str, instance: ComponentRef) -> ComponentRef {
        instance
    }
}

/// Per-request-type call statistics recorded by the instrumentation decorator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallStatistics {
    /// Total calls through the exposed reference
    pub total_calls: u64,
    /// Total call duration (microseconds)
    pub total_duration_micros: u64,
    /// Average call duration (microseconds)
    pub avg_duration_micros: f64,
    /// Calls that returned an error
    pub error_count: u64,
    /// Last call timestamp
    pub last_call: Option<DateTime<Utc>>,
}

/// Strategy wrapping public components in a call-timing decorator.
///
/// The decorator forwards every operation to the wrapped instance untouched
/// and folds elapsed time per `call` into a shared statistics table. No
/// publishing sink is involved; callers read the table through
/// [`InstrumentedReferenceFactory::statistics`].
pub struct InstrumentedReferenceFactory {
    statistics: Arc<DashMap<String, CallStatistics>>,
}

impl InstrumentedReferenceFactory {
    /// Create a factory with an empty statistics table.
    pub fn new() -> Self {
        Self {
            statistics: Arc::new(DashMap::new()),
        }
    }

    /// Statistics recorded so far for one request type.
    pub fn statistics(&self, request_type: &str) -> Option<CallStatistics> {
        self.statistics
            .get(request_type)
            .map(|entry| entry.clone())
    }
}

impl Default for InstrumentedReferenceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceFactory for InstrumentedReferenceFactory {
    fn wrap(&self, request_type: &str, instance: ComponentRef) -> ComponentRef {
        Arc::new(InstrumentedReference {
            request_type: request_type.to_string(),
            inner: instance,
            statistics: self.statistics.clone(),
        })
    }
}

/// Call-intercepting decorator produced by [`InstrumentedReferenceFactory`].
struct InstrumentedReference {
    request_type: String,
    inner: ComponentRef,
    statistics: Arc<DashMap<String, CallStatistics>>,
}

#[async_trait]
impl Component for InstrumentedReference {
    fn dependencies(&self) -> Vec<DependencySpec> {
        self.inner.dependencies()
    }

    fn inject(
        &self,
        field: &str,
        reference: Option<ComponentRef>,
    ) -> Result<(), ContainerError> {
        self.inner.inject(field, reference)
    }

    async fn initialize(&self) -> Result<(), ContainerError> {
        self.inner.initialize().await
    }

    async fn finish(&self) -> Result<(), ContainerError> {
        self.inner.finish().await
    }

    async fn call(&self, request: Value) -> Result<Value, ContainerError> {
        let started = Instant::now();
        let result = self.inner.call(request).await;
        let elapsed = started.elapsed();

        let mut entry = self
            .statistics
            .entry(self.request_type.clone())
            .or_default();
        entry.total_calls += 1;
        entry.total_duration_micros += elapsed.as_micros() as u64;
        entry.avg_duration_micros =
            entry.total_duration_micros as f64 / entry.total_calls as f64;
        if result.is_err() {
            entry.error_count += 1;
        }
        entry.last_call = Some(Utc::now());
        drop(entry);

        tracing::debug!(
            request_type = %self.request_type,
            duration_micros = elapsed.as_micros() as u64,
            "instrumented component call"
        );
        result
    }

    /// Downcasts see through the decorator to the wrapped instance.
    fn as_any(&self) -> &dyn Any {
        self.inner.as_any()
    }
}
