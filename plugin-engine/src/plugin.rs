//! Plugin contract and handles
//!
//! A plugin handle binds one constructed plugin object to exactly one
//! isolation boundary and enforces the lifecycle contract on it: the engine
//! initializes it exactly once before the first business operation, and
//! finishes it when the boundary is torn down.

use async_trait::async_trait;
use lifecycle_core::{Lifecycle, LifecycleError, LifecycleState, Managed};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::boundary::BoundaryId;
use crate::error::EngineError;

/// Opaque failure raised by a plugin's own setup, teardown, or business logic.
pub type PluginFault = Box<dyn std::error::Error + Send + Sync>;

/// Contract every loadable plugin implements.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// One-time setup; runs before any business operation.
    async fn on_initialize(&mut self) -> Result<(), PluginFault> {
        Ok(())
    }

    /// Business operation surface.
    async fn invoke(&self, request: Value) -> Result<Value, PluginFault>;

    /// One-time teardown; runs during undeploy. Implementations that spawned
    /// worker threads should signal them to stop and wait a bounded time;
    /// the engine caps the whole call with its teardown timeout.
    async fn on_finish(&mut self) -> Result<(), PluginFault> {
        Ok(())
    }
}

/// Newtype driving a boxed plugin through the lifecycle wrapper.
struct PluginCell(Box<dyn Plugin>);

#[async_trait]
impl Managed for PluginCell {
    type Error = PluginFault;

    async fn on_initialize(&mut self) -> Result<(), PluginFault> {
        self.0.on_initialize().await
    }

    async fn on_finish(&mut self) -> Result<(), PluginFault> {
        self.0.on_finish().await
    }
}

/// A constructed plugin bound to one isolation boundary.
pub struct PluginHandle {
    id: Uuid,
    type_name: String,
    boundary: BoundaryId,
    /// Lifecycle transitions take the write half, business calls the read
    /// half, so each transition is individually guarded
    cell: RwLock<Lifecycle<PluginCell>>,
}

impl PluginHandle {
    /// Wrap a freshly loaded plugin object.
    pub fn new(boundary: BoundaryId, type_name: impl Into<String>, plugin: Box<dyn Plugin>) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_name: type_name.into(),
            boundary,
            cell: RwLock::new(Lifecycle::new(PluginCell(plugin))),
        }
    }

    /// Unique id of this plugin instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Plugin type name the handle was resolved by.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Boundary the plugin is bound to.
    pub fn boundary(&self) -> BoundaryId {
        self.boundary
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LifecycleState {
        self.cell.read().await.state()
    }

    /// Run the plugin's one-time setup. Fails with `AlreadyInitialized` on a
    /// second attempt.
    pub async fn initialize(&self) -> Result<(), LifecycleError<PluginFault>> {
        self.cell.write().await.initialize().await
    }

    /// Invoke a business operation; requires the `Ready` state.
    pub async fn invoke(&self, request: Value) -> Result<Value, EngineError> {
        let cell = self.cell.read().await;
        let plugin = cell.get().map_err(EngineError::Plugin)?;
        plugin
            .0
            .invoke(request)
            .await
            .map_err(EngineError::Invocation)
    }

    /// Run the plugin's one-time teardown; idempotent once `Finished`.
    pub async fn finish(&self) -> Result<(), LifecycleError<PluginFault>> {
        self.cell.write().await.finish().await
    }
}
