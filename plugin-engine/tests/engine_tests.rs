//! Deployment lifecycle, veto, visibility, and host assembly scenarios
//!
//! Drives the engine through fake collaborators: an in-memory resolver, a
//! static security provider, and a loader that constructs echo plugins and
//! records how often each type was initialized.

use async_trait::async_trait;
use component_container::Component;
use parking_lot::Mutex;
use plugin_engine::{
    build_host_container, host_engine, ArtifactCoordinate, ArtifactResolver, BoundaryId,
    BoundaryManifest, BoundaryState, CapabilityToken, CollaboratorFault, DeploymentListener,
    EngineConfig, EngineError, IsolationBoundary, ListenerFault, PayloadLocation, Plugin,
    PluginEngine, PluginFault, PluginHandle, PluginLoader, SecurityProvider, Veto,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn coordinate(artifact: &str) -> ArtifactCoordinate {
    ArtifactCoordinate::new("com.acme", artifact, "jar", "1.4.0")
}

/// Resolver producing one payload per coordinate out of thin air.
struct FakeResolver;

#[async_trait]
impl ArtifactResolver for FakeResolver {
    async fn resolve(
        &self,
        coordinate: &ArtifactCoordinate,
    ) -> Result<Vec<PayloadLocation>, CollaboratorFault> {
        Ok(vec![PayloadLocation {
            coordinate: coordinate.clone(),
            path: PathBuf::from(format!("/repo/{}/{}.jar", coordinate.group, coordinate.artifact)),
        }])
    }
}

/// Resolver whose backing repository is unreachable.
struct OfflineResolver;

#[async_trait]
impl ArtifactResolver for OfflineResolver {
    async fn resolve(
        &self,
        _coordinate: &ArtifactCoordinate,
    ) -> Result<Vec<PayloadLocation>, CollaboratorFault> {
        Err(anyhow::anyhow!("artifact repository offline").into())
    }
}

struct FakeSecurity;

impl SecurityProvider for FakeSecurity {
    fn sandbox_default_permissions(&self) -> HashSet<CapabilityToken> {
        [CapabilityToken::new("fs:read")].into_iter().collect()
    }

    fn shared_default_permissions(&self) -> HashSet<CapabilityToken> {
        [
            CapabilityToken::new("fs:read"),
            CapabilityToken::new("net:connect"),
        ]
        .into_iter()
        .collect()
    }
}

/// Plugin that echoes its request and counts lifecycle hook invocations.
struct EchoPlugin {
    type_name: String,
    init_counts: Arc<Mutex<HashMap<String, usize>>>,
    fail_finish: bool,
}

#[async_trait]
impl Plugin for EchoPlugin {
    async fn on_initialize(&mut self) -> Result<(), PluginFault> {
        *self
            .init_counts
            .lock()
            .entry(self.type_name.clone())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn invoke(&self, request: Value) -> Result<Value, PluginFault> {
        Ok(json!({ "plugin": self.type_name, "echo": request }))
    }

    async fn on_finish(&mut self) -> Result<(), PluginFault> {
        if self.fail_finish {
            return Err(format!("{} left its worker thread running", self.type_name).into());
        }
        Ok(())
    }
}

/// Loader handing out echo plugins and a configurable export surface.
struct FakeLoader {
    exported_prefixes: Vec<String>,
    init_counts: Arc<Mutex<HashMap<String, usize>>>,
    fail_finish_types: HashSet<String>,
}

impl FakeLoader {
    fn new(exported_prefixes: &[&str]) -> Self {
        Self {
            exported_prefixes: exported_prefixes.iter().map(|p| p.to_string()).collect(),
            init_counts: Arc::new(Mutex::new(HashMap::new())),
            fail_finish_types: HashSet::new(),
        }
    }

    fn with_failing_finish(mut self, type_name: &str) -> Self {
        self.fail_finish_types.insert(type_name.to_string());
        self
    }

    fn init_count(&self, type_name: &str) -> usize {
        self.init_counts.lock().get(type_name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PluginLoader for FakeLoader {
    async fn manifest(
        &self,
        _resources: &[PayloadLocation],
    ) -> Result<BoundaryManifest, CollaboratorFault> {
        Ok(BoundaryManifest {
            exported_prefixes: self.exported_prefixes.clone(),
        })
    }

    async fn load(
        &self,
        _resources: &[PayloadLocation],
        type_name: &str,
    ) -> Result<Box<dyn Plugin>, CollaboratorFault> {
        Ok(Box::new(EchoPlugin {
            type_name: type_name.to_string(),
            init_counts: self.init_counts.clone(),
            fail_finish: self.fail_finish_types.contains(type_name),
        }))
    }
}

fn engine_with(loader: Arc<FakeLoader>, config: EngineConfig) -> Arc<PluginEngine> {
    Arc::new(PluginEngine::new(
        config,
        Arc::new(FakeResolver),
        Arc::new(FakeSecurity),
        loader,
    ))
}

fn default_engine(loader: Arc<FakeLoader>) -> Arc<PluginEngine> {
    engine_with(loader, EngineConfig::default())
}

/// Listener that can veto undeploys and counts completion notifications.
struct GateListener {
    armed: AtomicBool,
    undeployed_count: AtomicUsize,
}

impl GateListener {
    fn new(armed: bool) -> Self {
        Self {
            armed: AtomicBool::new(armed),
            undeployed_count: AtomicUsize::new(0),
        }
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeploymentListener for GateListener {
    async fn undeploying(&self, _boundary: &IsolationBoundary, veto: &Veto) {
        if self.armed.load(Ordering::SeqCst) {
            veto.veto("in-flight requests still draining");
        }
    }

    async fn undeployed(&self, _boundary: &IsolationBoundary) -> Result<(), ListenerFault> {
        self.undeployed_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Listener whose deployed notification always fails.
struct BrokenListener;

#[async_trait]
impl DeploymentListener for BrokenListener {
    async fn deployed(&self, _boundary: &IsolationBoundary) -> Result<(), ListenerFault> {
        Err("audit sink unreachable".into())
    }
}

#[tokio::test]
async fn test_deploy_and_resolve_plugin_initializes_once() {
    let loader = Arc::new(FakeLoader::new(&["com.acme."]));
    let engine = default_engine(loader.clone());

    let id = engine.deploy("orders", &coordinate("orders")).await.unwrap();
    assert_eq!(engine.boundary_id("orders").await, Some(id));

    let first = engine
        .get_plugin(id, "com.acme.orders.Validator", "com.acme.orders.Validator")
        .await
        .unwrap();
    let second = engine
        .get_plugin(id, "com.acme.orders.Validator", "com.acme.orders.Validator")
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(loader.init_count("com.acme.orders.Validator"), 1);

    let response = first.invoke(json!({ "order": 7 })).await.unwrap();
    assert_eq!(
        response,
        json!({ "plugin": "com.acme.orders.Validator", "echo": { "order": 7 } })
    );
}

#[tokio::test]
async fn test_duplicate_deployment_name_rejected() {
    let engine = default_engine(Arc::new(FakeLoader::new(&["com.acme."])));

    let first = engine.deploy("orders", &coordinate("orders")).await.unwrap();
    let err = engine
        .deploy("orders", &coordinate("orders-v2"))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::DuplicateDeployment(name) if name == "orders"));
    assert_eq!(engine.boundary_id("orders").await, Some(first));
}

#[tokio::test]
async fn test_deployment_limit_enforced() {
    let config = EngineConfig {
        max_deployments: 1,
        ..EngineConfig::default()
    };
    let engine = engine_with(Arc::new(FakeLoader::new(&["com.acme."])), config);

    engine.deploy("orders", &coordinate("orders")).await.unwrap();
    let err = engine
        .deploy("billing", &coordinate("billing"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DeploymentLimitExceeded(1)));
}

#[tokio::test]
async fn test_resolver_failure_surfaces_without_registration() {
    let engine = Arc::new(PluginEngine::new(
        EngineConfig::default(),
        Arc::new(OfflineResolver),
        Arc::new(FakeSecurity),
        Arc::new(FakeLoader::new(&["com.acme."])),
    ));

    let err = engine.deploy("orders", &coordinate("orders")).await.unwrap_err();
    assert!(matches!(err, EngineError::Resolver { .. }));
    assert_eq!(engine.boundary_id("orders").await, None);
}

#[tokio::test]
async fn test_capability_outside_allow_list_is_rejected() {
    let loader = Arc::new(FakeLoader::new(&["com.acme.api."]));
    let engine = default_engine(loader);
    let id = engine.deploy("orders", &coordinate("orders")).await.unwrap();

    // Exported prefix passes
    engine
        .get_plugin(id, "com.acme.api.Validator", "com.acme.api.Validator")
        .await
        .unwrap();

    // A boundary-private type does not, even if loadable
    let err = engine
        .get_plugin(id, "com.acme.internal.Cache", "com.acme.internal.Cache")
        .await
        .err()
        .unwrap();
    match err {
        EngineError::VisibilityViolation {
            boundary,
            type_name,
        } => {
            assert_eq!(boundary, "orders");
            assert_eq!(type_name, "com.acme.internal.Cache");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unknown_boundary_and_shared_boundary_undeploy() {
    let engine = default_engine(Arc::new(FakeLoader::new(&["com.acme."])));

    assert!(matches!(
        engine
            .get_plugin(BoundaryId::from_raw(999), "com.acme.X", "com.acme.X")
            .await,
        Err(EngineError::NoSuchDeployment(_))
    ));

    // The shared boundary is not a deployment
    let err = engine.undeploy(engine.shared_boundary()).await.unwrap_err();
    assert!(matches!(err, EngineError::NoSuchDeployment(_)));
}

#[tokio::test]
async fn test_veto_aborts_undeploy_without_state_change() {
    let loader = Arc::new(FakeLoader::new(&["com.acme."]));
    let engine = default_engine(loader);
    let gate = Arc::new(GateListener::new(true));
    engine.add_listener(gate.clone()).await;

    let id = engine.deploy("orders", &coordinate("orders")).await.unwrap();
    engine
        .get_plugin(id, "com.acme.Validator", "com.acme.Validator")
        .await
        .unwrap();

    let err = engine.undeploy(id).await.unwrap_err();
    match &err {
        EngineError::UndeployVetoed { deployment, reason } => {
            assert_eq!(deployment, "orders");
            assert_eq!(
                reason.as_deref(),
                Some("in-flight requests still draining")
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());

    // Fully usable after the veto
    assert_eq!(engine.boundary_id("orders").await, Some(id));
    let info = engine.deployment_info("orders").await.unwrap();
    assert_eq!(info.state, BoundaryState::Deployed);
    assert_eq!(info.resolved_plugins, 1);
    engine
        .get_plugin(id, "com.acme.Validator", "com.acme.Validator")
        .await
        .unwrap();
    assert_eq!(gate.undeployed_count.load(Ordering::SeqCst), 0);

    // Once the vetoing condition clears, the retry goes through
    gate.disarm();
    let report = engine.undeploy(id).await.unwrap();
    assert_eq!(report.deployment, "orders");
    assert_eq!(report.finished_plugins, 1);
    assert!(report.failures.is_empty());
    assert_eq!(gate.undeployed_count.load(Ordering::SeqCst), 1);

    assert_eq!(engine.boundary_id("orders").await, None);
    assert!(matches!(
        engine
            .get_plugin(id, "com.acme.Validator", "com.acme.Validator")
            .await,
        Err(EngineError::NoSuchDeployment(_))
    ));
}

#[tokio::test]
async fn test_teardown_failures_collected_in_report() {
    let loader = Arc::new(
        FakeLoader::new(&["com.acme."]).with_failing_finish("com.acme.Leaky"),
    );
    let config = EngineConfig {
        teardown_timeout: Duration::from_millis(200),
        ..EngineConfig::default()
    };
    let engine = engine_with(loader, config);

    let id = engine.deploy("orders", &coordinate("orders")).await.unwrap();
    engine
        .get_plugin(id, "com.acme.Clean", "com.acme.Clean")
        .await
        .unwrap();
    engine
        .get_plugin(id, "com.acme.Leaky", "com.acme.Leaky")
        .await
        .unwrap();

    // Teardown failures never block removal
    let report = engine.undeploy(id).await.unwrap();
    assert_eq!(report.finished_plugins, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].subject, "com.acme.Leaky");
    assert_eq!(engine.boundary_id("orders").await, None);
}

#[tokio::test]
async fn test_deployed_listener_error_propagates_but_deployment_stays() {
    let engine = default_engine(Arc::new(FakeLoader::new(&["com.acme."])));
    engine.add_listener(Arc::new(BrokenListener)).await;

    let err = engine.deploy("orders", &coordinate("orders")).await.unwrap_err();
    assert!(matches!(err, EngineError::Listener(_)));
    assert!(engine.boundary_id("orders").await.is_some());
    assert_eq!(engine.deployments().await, vec!["orders".to_string()]);
}

#[tokio::test]
async fn test_listener_removal_by_identity() {
    let engine = default_engine(Arc::new(FakeLoader::new(&["com.acme."])));
    let broken: Arc<dyn DeploymentListener> = Arc::new(BrokenListener);
    engine.add_listener(broken.clone()).await;
    engine.remove_listener(&broken).await;

    // With the listener gone, deploy succeeds
    engine.deploy("orders", &coordinate("orders")).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_first_use_instantiates_once() {
    let loader = Arc::new(FakeLoader::new(&["com.acme."]));
    let engine = default_engine(loader.clone());
    let id = engine.deploy("orders", &coordinate("orders")).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .get_plugin(id, "com.acme.Validator", "com.acme.Validator")
                .await
                .unwrap()
        }));
    }
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(loader.init_count("com.acme.Validator"), 1);
    for handle in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], handle));
    }
}

#[tokio::test]
async fn test_parallel_deploys_of_distinct_names() {
    let engine = default_engine(Arc::new(FakeLoader::new(&["com.acme."])));

    let mut tasks = Vec::new();
    for name in ["orders", "billing", "shipping", "audit"] {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.deploy(name, &coordinate(name)).await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut deployments = engine.deployments().await;
    deployments.sort();
    assert_eq!(deployments, vec!["audit", "billing", "orders", "shipping"]);
}

#[tokio::test]
async fn test_plugin_handle_enforces_lifecycle_contract() {
    let loader = FakeLoader::new(&["com.acme."]);
    let plugin = loader.load(&[], "com.acme.Validator").await.unwrap();
    let handle = PluginHandle::new(BoundaryId::from_raw(1), "com.acme.Validator", plugin);

    // Business call before setup
    let err = handle.invoke(json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Plugin(lifecycle_core::LifecycleError::NotInitialized)
    ));

    // Teardown before setup
    assert!(matches!(
        handle.finish().await.unwrap_err(),
        lifecycle_core::LifecycleError::NotInitialized
    ));

    handle.initialize().await.unwrap();
    assert!(matches!(
        handle.initialize().await.unwrap_err(),
        lifecycle_core::LifecycleError::AlreadyInitialized(_)
    ));

    handle.invoke(json!({})).await.unwrap();
    handle.finish().await.unwrap();
    // Finished is terminal and idempotent
    handle.finish().await.unwrap();
    assert!(handle.invoke(json!({})).await.is_err());
}

#[tokio::test]
async fn test_host_container_wires_and_exposes_the_engine() {
    let loader = Arc::new(FakeLoader::new(&["com.acme."]));
    let container = build_host_container(
        EngineConfig::default(),
        Arc::new(FakeResolver),
        Arc::new(FakeSecurity),
        loader.clone(),
    )
    .await
    .unwrap();

    let engine = host_engine(&container).unwrap();
    let component = container.lookup(plugin_engine::ENGINE_TYPE).unwrap();

    // Deploy through the JSON envelope
    let response = component
        .call(json!({
            "op": "deploy",
            "deployment": "orders",
            "coordinate": coordinate("orders"),
        }))
        .await
        .unwrap();
    assert!(response.get("boundary").is_some());
    assert_eq!(engine.deployments().await, vec!["orders".to_string()]);

    // Invoke through the envelope reaches a real plugin
    let response = component
        .call(json!({
            "op": "invoke",
            "deployment": "orders",
            "plugin_type": "com.acme.Validator",
            "capability": "com.acme.Validator",
            "request": { "order": 9 },
        }))
        .await
        .unwrap();
    assert_eq!(
        response,
        json!({ "plugin": "com.acme.Validator", "echo": { "order": 9 } })
    );
    assert_eq!(loader.init_count("com.acme.Validator"), 1);

    let response = component.call(json!({ "op": "deployments" })).await.unwrap();
    assert_eq!(response, json!({ "deployments": ["orders"] }));

    let response = component
        .call(json!({ "op": "undeploy", "deployment": "orders" }))
        .await
        .unwrap();
    assert_eq!(response["deployment"], "orders");
    assert_eq!(response["finished_plugins"], 1);
    assert!(engine.deployments().await.is_empty());
}

#[tokio::test]
async fn test_host_collaborators_are_private() {
    let container = build_host_container(
        EngineConfig::default(),
        Arc::new(FakeResolver),
        Arc::new(FakeSecurity),
        Arc::new(FakeLoader::new(&["com.acme."])),
    )
    .await
    .unwrap();

    for request_type in [
        plugin_engine::RESOLVER_TYPE,
        plugin_engine::SECURITY_TYPE,
        plugin_engine::LOADER_TYPE,
    ] {
        assert!(container.lookup(request_type).is_err());
    }
}

/// Resolver that takes a while, widening deploy race windows.
struct SlowResolver;

#[async_trait]
impl ArtifactResolver for SlowResolver {
    async fn resolve(
        &self,
        coordinate: &ArtifactCoordinate,
    ) -> Result<Vec<PayloadLocation>, CollaboratorFault> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        FakeResolver.resolve(coordinate).await
    }
}

#[tokio::test]
async fn test_deployment_limit_holds_under_concurrent_deploys() {
    let config = EngineConfig {
        max_deployments: 1,
        ..EngineConfig::default()
    };
    let engine = Arc::new(PluginEngine::new(
        config,
        Arc::new(SlowResolver),
        Arc::new(FakeSecurity),
        Arc::new(FakeLoader::new(&["com.acme."])),
    ));

    let mut tasks = Vec::new();
    for name in ["orders", "billing", "shipping"] {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.deploy(name, &coordinate(name)).await.is_ok()
        }));
    }
    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap() {
            succeeded += 1;
        }
    }

    // Distinct names resolve in parallel, but only one registration fits
    assert_eq!(succeeded, 1);
    assert_eq!(engine.deployments().await.len(), 1);
}

#[tokio::test]
async fn test_deployment_info_reflects_boundary_activity() {
    let engine = default_engine(Arc::new(FakeLoader::new(&["com.acme."])));
    let id = engine.deploy("orders", &coordinate("orders")).await.unwrap();

    let info = engine.deployment_info("orders").await.unwrap();
    assert_eq!(info.boundary, id);
    assert_eq!(info.deployment, "orders");
    assert_eq!(info.state, BoundaryState::Deployed);
    assert_eq!(info.resolved_plugins, 0);
    assert_eq!(info.payloads, 1);

    engine
        .get_plugin(id, "com.acme.Validator", "com.acme.Validator")
        .await
        .unwrap();
    let after = engine.deployment_info("orders").await.unwrap();
    assert_eq!(after.resolved_plugins, 1);
    assert!(after.last_accessed >= info.last_accessed);

    assert!(engine.deployment_info("missing").await.is_none());
}

/// Listener that re-enters the engine and mutates the listener list from
/// inside its own notification.
struct ReentrantListener {
    engine: Mutex<Option<Arc<PluginEngine>>>,
    resolved_in_callback: AtomicBool,
}

impl ReentrantListener {
    fn new() -> Self {
        Self {
            engine: Mutex::new(None),
            resolved_in_callback: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DeploymentListener for ReentrantListener {
    async fn deployed(&self, boundary: &IsolationBoundary) -> Result<(), ListenerFault> {
        let engine = self.engine.lock().clone().ok_or("engine not wired")?;

        // Mutating the listener list mid-notification is safe because the
        // engine iterates a snapshot
        let extra: Arc<dyn DeploymentListener> = Arc::new(GateListener::new(false));
        engine.add_listener(extra.clone()).await;
        engine.remove_listener(&extra).await;

        // Re-entering plugin resolution while this notification is in flight
        engine
            .get_plugin(boundary.id(), "com.acme.Probe", "com.acme.Probe")
            .await
            .map_err(|err| Box::new(err) as ListenerFault)?;
        self.resolved_in_callback.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_listener_may_reenter_engine_from_callback() {
    let loader = Arc::new(FakeLoader::new(&["com.acme."]));
    let engine = default_engine(loader.clone());
    let listener = Arc::new(ReentrantListener::new());
    *listener.engine.lock() = Some(engine.clone());
    engine.add_listener(listener.clone()).await;

    let id = engine.deploy("orders", &coordinate("orders")).await.unwrap();
    assert!(listener.resolved_in_callback.load(Ordering::SeqCst));

    // The callback's resolution is the memoized instance
    let handle = engine
        .get_plugin(id, "com.acme.Probe", "com.acme.Probe")
        .await
        .unwrap();
    assert_eq!(handle.type_name(), "com.acme.Probe");
    assert_eq!(loader.init_count("com.acme.Probe"), 1);
}
