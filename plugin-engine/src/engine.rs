//! Deployment orchestration
//!
//! The engine owns the shared boundary plus a registry of per-deployment
//! boundaries. Deploy and undeploy serialize per deployment name; unrelated
//! names proceed fully in parallel. Listener notification runs on the
//! calling task without the registry's mutating lock held, so listeners may
//! re-enter the engine; the registry can therefore be mutated by another
//! task while a notification is in progress, which is an accepted
//! trade-off.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::boundary::{
    AllowList, ArtifactCoordinate, BoundaryId, BoundaryState, DeploymentInfo, IsolationBoundary,
};
use crate::collaborators::{ArtifactResolver, PluginLoader, SecurityProvider};
use crate::error::{EngineError, EngineResult};
use crate::listener::{DeploymentListener, Veto};
use crate::plugin::PluginHandle;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded wait for one plugin's teardown during undeploy; a plugin
    /// exceeding it is logged and skipped, not failed
    pub teardown_timeout: Duration,
    /// Maximum concurrently registered deployments
    pub max_deployments: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            teardown_timeout: Duration::from_secs(30),
            max_deployments: 64,
        }
    }
}

/// One plugin or listener failure collected during best-effort teardown.
#[derive(Debug, Clone, Serialize)]
pub struct TeardownFailure {
    /// Plugin type name or listener description
    pub subject: String,
    /// Failure detail
    pub detail: String,
}

/// Aggregate outcome of a completed (non-vetoed) undeploy.
#[derive(Debug, Serialize)]
pub struct UndeployReport {
    /// Deployment that was removed
    pub deployment: String,
    /// Plugins whose teardown completed cleanly
    pub finished_plugins: usize,
    /// Collected teardown failures; none of them blocked registry removal
    pub failures: Vec<TeardownFailure>,
}

/// Runtime host orchestrating plugin deployment, resolution, and teardown.
pub struct PluginEngine {
    config: EngineConfig,
    resolver: Arc<dyn ArtifactResolver>,
    security: Arc<dyn SecurityProvider>,
    loader: Arc<dyn PluginLoader>,
    /// Arena of live boundaries, shared boundary included
    boundaries: RwLock<HashMap<BoundaryId, Arc<IsolationBoundary>>>,
    /// Deployment name -> boundary handle
    registry: RwLock<HashMap<String, BoundaryId>>,
    /// Per-name guards serializing deploy/undeploy of the same name
    name_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    listeners: RwLock<Vec<Arc<dyn DeploymentListener>>>,
    shared: BoundaryId,
    next_id: AtomicU64,
}

impl PluginEngine {
    /// Create an engine with its external collaborators. The shared boundary
    /// is constructed immediately, carrying the security provider's
    /// shared-classpath default permissions and a permit-all allow list.
    pub fn new(
        config: EngineConfig,
        resolver: Arc<dyn ArtifactResolver>,
        security: Arc<dyn SecurityProvider>,
        loader: Arc<dyn PluginLoader>,
    ) -> Self {
        let shared_id = BoundaryId::new(0);
        let shared = Arc::new(IsolationBoundary::shared(
            shared_id,
            security.shared_default_permissions(),
        ));
        let mut boundaries = HashMap::new();
        boundaries.insert(shared_id, shared);

        Self {
            config,
            resolver,
            security,
            loader,
            boundaries: RwLock::new(boundaries),
            registry: RwLock::new(HashMap::new()),
            name_guards: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            shared: shared_id,
            next_id: AtomicU64::new(1),
        }
    }

    /// Handle of the engine-owned shared boundary. It is not a deployment
    /// and cannot be undeployed.
    pub fn shared_boundary(&self) -> BoundaryId {
        self.shared
    }

    /// Register a deployment: resolve its payloads, construct its isolation
    /// boundary, register it, and notify listeners in registration order.
    ///
    /// A listener error propagates to the caller, but the boundary remains
    /// registered.
    pub async fn deploy(
        &self,
        name: &str,
        coordinate: &ArtifactCoordinate,
    ) -> EngineResult<BoundaryId> {
        let guard = self.name_guard(name).await;
        let _serialized = guard.lock().await;

        {
            let registry = self.registry.read().await;
            if registry.contains_key(name) {
                return Err(EngineError::DuplicateDeployment(name.to_string()));
            }
            if registry.len() >= self.config.max_deployments {
                return Err(EngineError::DeploymentLimitExceeded(
                    self.config.max_deployments,
                ));
            }
        }

        // Opaque, possibly slow, possibly failing; not retried here
        let resources = self
            .resolver
            .resolve(coordinate)
            .await
            .map_err(|cause| EngineError::Resolver {
                coordinate: coordinate.to_string(),
                cause,
            })?;
        let manifest = self
            .loader
            .manifest(&resources)
            .await
            .map_err(|cause| EngineError::Loader {
                context: format!("manifest of {coordinate}"),
                cause,
            })?;

        let id = BoundaryId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let boundary = Arc::new(IsolationBoundary::deployment(
            id,
            name,
            resources,
            AllowList::new(manifest.exported_prefixes),
            self.security.sandbox_default_permissions(),
        ));

        {
            let mut boundaries = self.boundaries.write().await;
            let mut registry = self.registry.write().await;
            // Re-check under the write lock: deploys of distinct names run in
            // parallel, so others may have registered during resolution
            if registry.len() >= self.config.max_deployments {
                return Err(EngineError::DeploymentLimitExceeded(
                    self.config.max_deployments,
                ));
            }
            boundaries.insert(id, boundary.clone());
            registry.insert(name.to_string(), id);
        }
        info!(deployment = %name, boundary = %id, coordinate = %coordinate, "deployment registered");

        // Release the per-name guard before notification so listeners may
        // re-enter the engine
        drop(_serialized);

        for listener in self.listener_snapshot().await {
            listener
                .deployed(&boundary)
                .await
                .map_err(EngineError::Listener)?;
        }
        Ok(id)
    }

    /// Resolve a plugin inside a boundary, loading and initializing it on
    /// first request. Concurrent first-use races collapse to exactly one
    /// instantiation.
    pub async fn get_plugin(
        &self,
        boundary: BoundaryId,
        type_name: &str,
        expected_capability: &str,
    ) -> EngineResult<Arc<PluginHandle>> {
        let boundary = self.boundary(boundary).await?;
        if boundary.state().await != BoundaryState::Deployed {
            return Err(EngineError::NoSuchDeployment(boundary.display_name()));
        }

        // Cross-boundary type-safety check: the requested capability must be
        // exported by the boundary
        if !boundary.allow_list().permits(expected_capability) {
            return Err(EngineError::VisibilityViolation {
                boundary: boundary.display_name(),
                type_name: expected_capability.to_string(),
            });
        }

        let mut plugins = boundary.plugins.lock().await;
        // The boundary may have started undeploying while we waited
        if boundary.state().await != BoundaryState::Deployed {
            return Err(EngineError::NoSuchDeployment(boundary.display_name()));
        }
        boundary.touch().await;

        if let Some(handle) = plugins.get(type_name) {
            debug!(boundary = %boundary.id(), plugin = %type_name, "plugin handle cache hit");
            return Ok(handle.clone());
        }

        let plugin = self
            .loader
            .load(boundary.resources(), type_name)
            .await
            .map_err(|cause| EngineError::Loader {
                context: type_name.to_string(),
                cause,
            })?;
        let handle = Arc::new(PluginHandle::new(boundary.id(), type_name, plugin));
        handle.initialize().await.map_err(EngineError::Plugin)?;
        plugins.insert(type_name.to_string(), handle.clone());
        info!(
            boundary = %boundary.id(),
            deployment = %boundary.display_name(),
            plugin = %type_name,
            instance = %handle.id(),
            "plugin loaded and initialized"
        );
        Ok(handle)
    }

    /// Two-phase undeploy.
    ///
    /// Phase 1 notifies listeners with a veto token; any veto aborts with no
    /// state change. Phase 2 finishes every resolved plugin (best-effort,
    /// bounded by the teardown timeout), removes the registry entry, and
    /// notifies listeners of completion. Teardown failures are collected in
    /// the report and never block removal.
    pub async fn undeploy(&self, boundary: BoundaryId) -> EngineResult<UndeployReport> {
        let boundary = self.boundary(boundary).await?;
        let name = boundary
            .name()
            .map(str::to_string)
            .ok_or_else(|| EngineError::NoSuchDeployment(boundary.display_name()))?;

        let guard = self.name_guard(&name).await;
        let _serialized = guard.lock().await;

        boundary.begin_undeploy().await?;
        let listeners = self.listener_snapshot().await;

        // Phase 1: veto phase, registry entry still present
        let veto = Veto::new();
        for listener in &listeners {
            listener.undeploying(&boundary, &veto).await;
        }
        if veto.is_vetoed() {
            boundary.cancel_undeploy().await;
            info!(deployment = %name, reason = ?veto.reason(), "undeploy vetoed");
            return Err(EngineError::UndeployVetoed {
                deployment: name,
                reason: veto.reason(),
            });
        }

        // Phase 2: best-effort teardown
        let handles: Vec<Arc<PluginHandle>> = {
            let mut plugins = boundary.plugins.lock().await;
            plugins.drain().map(|(_, handle)| handle).collect()
        };
        let mut finished = 0usize;
        let mut failures: Vec<TeardownFailure> = Vec::new();
        for handle in handles {
            match tokio::time::timeout(self.config.teardown_timeout, handle.finish()).await {
                Ok(Ok(())) => finished += 1,
                Ok(Err(err)) => {
                    warn!(
                        deployment = %name,
                        plugin = %handle.type_name(),
                        error = %err,
                        "plugin teardown failed, continuing"
                    );
                    failures.push(TeardownFailure {
                        subject: handle.type_name().to_string(),
                        detail: err.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        deployment = %name,
                        plugin = %handle.type_name(),
                        timeout = ?self.config.teardown_timeout,
                        "plugin teardown timed out, proceeding without it"
                    );
                    failures.push(TeardownFailure {
                        subject: handle.type_name().to_string(),
                        detail: format!(
                            "teardown did not complete within {:?}",
                            self.config.teardown_timeout
                        ),
                    });
                }
            }
        }

        {
            let mut boundaries = self.boundaries.write().await;
            let mut registry = self.registry.write().await;
            registry.remove(&name);
            boundaries.remove(&boundary.id());
        }
        boundary.complete_undeploy().await;
        info!(
            deployment = %name,
            finished = finished,
            failures = failures.len(),
            "deployment removed"
        );

        drop(_serialized);
        self.release_name_guard(&name, &guard).await;

        for listener in &listeners {
            if let Err(err) = listener.undeployed(&boundary).await {
                warn!(deployment = %name, error = %err, "undeployed listener failed");
                failures.push(TeardownFailure {
                    subject: "listener".to_string(),
                    detail: err.to_string(),
                });
            }
        }

        Ok(UndeployReport {
            deployment: name,
            finished_plugins: finished,
            failures,
        })
    }

    /// Append a listener; notification order is registration order.
    pub async fn add_listener(&self, listener: Arc<dyn DeploymentListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Remove a listener by identity.
    pub async fn remove_listener(&self, listener: &Arc<dyn DeploymentListener>) {
        self.listeners
            .write()
            .await
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Boundary handle for a registered deployment name.
    pub async fn boundary_id(&self, name: &str) -> Option<BoundaryId> {
        self.registry.read().await.get(name).copied()
    }

    /// Registered deployment names, point-in-time snapshot.
    pub async fn deployments(&self) -> Vec<String> {
        self.registry.read().await.keys().cloned().collect()
    }

    /// Point-in-time view of one registered deployment.
    pub async fn deployment_info(&self, name: &str) -> Option<DeploymentInfo> {
        let id = self.boundary_id(name).await?;
        let boundary = {
            let boundaries = self.boundaries.read().await;
            boundaries.get(&id)?.clone()
        };
        let state = boundary.state().await;
        let last_accessed = *boundary.last_accessed.read().await;
        let resolved_plugins = boundary.plugins.lock().await.len();
        Some(DeploymentInfo {
            boundary: boundary.id(),
            deployment: boundary.display_name(),
            state,
            deployed_at: boundary.deployed_at(),
            last_accessed,
            resolved_plugins,
            payloads: boundary.resources().len(),
        })
    }

    async fn boundary(&self, id: BoundaryId) -> EngineResult<Arc<IsolationBoundary>> {
        self.boundaries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchDeployment(format!("boundary {id}")))
    }

    async fn name_guard(&self, name: &str) -> Arc<Mutex<()>> {
        let mut guards = self.name_guards.lock().await;
        guards
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a name's guard once its deployment is gone, unless another task
    /// already holds a handle to it.
    async fn release_name_guard(&self, name: &str, guard: &Arc<Mutex<()>>) {
        let mut guards = self.name_guards.lock().await;
        if let Some(existing) = guards.get(name) {
            // One count for the map entry, one for our handle
            if Arc::ptr_eq(existing, guard) && Arc::strong_count(existing) <= 2 {
                guards.remove(name);
            }
        }
    }

    async fn listener_snapshot(&self) -> Vec<Arc<dyn DeploymentListener>> {
        self.listeners.read().await.clone()
    }
}
