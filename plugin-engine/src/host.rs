//! Host assembly through the component container
//!
//! The engine's own long-lived collaborators are wired like any other host
//! application component: the resolver, security provider, and loader are
//! registered as private components, and a public engine component declares
//! dependencies on all three, constructs the [`PluginEngine`] during its
//! `initialize()`, and exposes deploy/undeploy/invoke as a JSON call
//! envelope.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use component_container::{
    Component, ComponentConfiguration, ComponentContainer, ComponentRef, ContainerError,
    DependencySpec,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::boundary::ArtifactCoordinate;
use crate::collaborators::{ArtifactResolver, PluginLoader, SecurityProvider};
use crate::engine::{EngineConfig, PluginEngine};
use crate::error::EngineError;

/// Request type of the public engine component.
pub const ENGINE_TYPE: &str = "plugin-engine";
/// Request type of the private artifact resolver component.
pub const RESOLVER_TYPE: &str = "artifact-resolver";
/// Request type of the private security provider component.
pub const SECURITY_TYPE: &str = "security-provider";
/// Request type of the private plugin loader component.
pub const LOADER_TYPE: &str = "plugin-loader";

/// Private component carrying the artifact resolver collaborator.
pub struct ResolverComponent {
    resolver: Arc<dyn ArtifactResolver>,
}

impl ResolverComponent {
    /// Wrap a resolver for container registration.
    pub fn new(resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self { resolver }
    }

    fn resolver(&self) -> Arc<dyn ArtifactResolver> {
        self.resolver.clone()
    }
}

#[async_trait]
impl Component for ResolverComponent {
    async fn call(&self, _request: Value) -> Result<Value, ContainerError> {
        Err(ContainerError::Unsupported(
            "artifact resolver is injection-only".to_string(),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Private component carrying the security provider collaborator.
pub struct SecurityComponent {
    security: Arc<dyn SecurityProvider>,
}

impl SecurityComponent {
    /// Wrap a security provider for container registration.
    pub fn new(security: Arc<dyn SecurityProvider>) -> Self {
        Self { security }
    }

    fn security(&self) -> Arc<dyn SecurityProvider> {
        self.security.clone()
    }
}

#[async_trait]
impl Component for SecurityComponent {
    async fn call(&self, _request: Value) -> Result<Value, ContainerError> {
        Err(ContainerError::Unsupported(
            "security provider is injection-only".to_string(),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Private component carrying the plugin loader collaborator.
pub struct LoaderComponent {
    loader: Arc<dyn PluginLoader>,
}

impl LoaderComponent {
    /// Wrap a plugin loader for container registration.
    pub fn new(loader: Arc<dyn PluginLoader>) -> Self {
        Self { loader }
    }

    fn loader(&self) -> Arc<dyn PluginLoader> {
        self.loader.clone()
    }
}

#[async_trait]
impl Component for LoaderComponent {
    async fn call(&self, _request: Value) -> Result<Value, ContainerError> {
        Err(ContainerError::Unsupported(
            "plugin loader is injection-only".to_string(),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// JSON envelope accepted by the engine component's `call` surface.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostCommand {
    /// Deploy a named artifact
    Deploy {
        /// Deployment name
        deployment: String,
        /// Artifact coordinate to resolve
        coordinate: ArtifactCoordinate,
    },
    /// Undeploy a registered deployment
    Undeploy {
        /// Deployment name
        deployment: String,
    },
    /// Invoke a plugin inside a deployment
    Invoke {
        /// Deployment name
        deployment: String,
        /// Plugin type to resolve
        plugin_type: String,
        /// Expected capability type, checked against the allow list
        capability: String,
        /// Request payload forwarded to the plugin
        request: Value,
    },
    /// List registered deployment names
    Deployments,
}

/// Public component exposing the plugin engine.
///
/// Dependencies are injected during wiring; the engine itself is constructed
/// in `initialize()`, after the whole collaborator graph exists.
pub struct EngineComponent {
    config: EngineConfig,
    resolver: Mutex<Option<ComponentRef>>,
    security: Mutex<Option<ComponentRef>>,
    loader: Mutex<Option<ComponentRef>>,
    engine: Mutex<Option<Arc<PluginEngine>>>,
}

impl EngineComponent {
    /// Engine component with the given engine configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            resolver: Mutex::new(None),
            security: Mutex::new(None),
            loader: Mutex::new(None),
            engine: Mutex::new(None),
        }
    }

    /// The running engine, once the container has initialized the component.
    pub fn engine(&self) -> Option<Arc<PluginEngine>> {
        self.engine.lock().clone()
    }

    fn dependency(
        slot: &Mutex<Option<ComponentRef>>,
        field: &str,
    ) -> Result<ComponentRef, ContainerError> {
        slot.lock().clone().ok_or_else(|| {
            ContainerError::Unsupported(format!("dependency {field} was not injected"))
        })
    }

    fn engine_error(err: EngineError) -> ContainerError {
        ContainerError::Component(Box::new(err))
    }
}

#[async_trait]
impl Component for EngineComponent {
    fn dependencies(&self) -> Vec<DependencySpec> {
        vec![
            DependencySpec::required("resolver", RESOLVER_TYPE),
            DependencySpec::required("security", SECURITY_TYPE),
            DependencySpec::required("loader", LOADER_TYPE),
        ]
    }

    fn inject(
        &self,
        field: &str,
        reference: Option<ComponentRef>,
    ) -> Result<(), ContainerError> {
        match field {
            "resolver" => *self.resolver.lock() = reference,
            "security" => *self.security.lock() = reference,
            "loader" => *self.loader.lock() = reference,
            other => {
                return Err(ContainerError::Unsupported(format!(
                    "unknown dependency field: {other}"
                )))
            }
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<(), ContainerError> {
        let resolver = Self::dependency(&self.resolver, "resolver")?;
        let resolver = resolver
            .as_any()
            .downcast_ref::<ResolverComponent>()
            .ok_or_else(|| {
                ContainerError::Unsupported("resolver dependency has unexpected type".to_string())
            })?
            .resolver();

        let security = Self::dependency(&self.security, "security")?;
        let security = security
            .as_any()
            .downcast_ref::<SecurityComponent>()
            .ok_or_else(|| {
                ContainerError::Unsupported("security dependency has unexpected type".to_string())
            })?
            .security();

        let loader = Self::dependency(&self.loader, "loader")?;
        let loader = loader
            .as_any()
            .downcast_ref::<LoaderComponent>()
            .ok_or_else(|| {
                ContainerError::Unsupported("loader dependency has unexpected type".to_string())
            })?
            .loader();

        let engine = Arc::new(PluginEngine::new(
            self.config.clone(),
            resolver,
            security,
            loader,
        ));
        *self.engine.lock() = Some(engine);
        Ok(())
    }

    async fn finish(&self) -> Result<(), ContainerError> {
        *self.engine.lock() = None;
        Ok(())
    }

    async fn call(&self, request: Value) -> Result<Value, ContainerError> {
        let engine = self.engine().ok_or(ContainerError::NotBuilt)?;
        let command: HostCommand = serde_json::from_value(request)?;
        match command {
            HostCommand::Deploy {
                deployment,
                coordinate,
            } => {
                let boundary = engine
                    .deploy(&deployment, &coordinate)
                    .await
                    .map_err(Self::engine_error)?;
                Ok(json!({ "boundary": boundary.raw() }))
            }
            HostCommand::Undeploy { deployment } => {
                let boundary = engine
                    .boundary_id(&deployment)
                    .await
                    .ok_or_else(|| Self::engine_error(EngineError::NoSuchDeployment(deployment)))?;
                let report = engine.undeploy(boundary).await.map_err(Self::engine_error)?;
                Ok(serde_json::to_value(report)?)
            }
            HostCommand::Invoke {
                deployment,
                plugin_type,
                capability,
                request,
            } => {
                let boundary = engine
                    .boundary_id(&deployment)
                    .await
                    .ok_or_else(|| Self::engine_error(EngineError::NoSuchDeployment(deployment)))?;
                let handle = engine
                    .get_plugin(boundary, &plugin_type, &capability)
                    .await
                    .map_err(Self::engine_error)?;
                handle.invoke(request).await.map_err(Self::engine_error)
            }
            HostCommand::Deployments => Ok(json!({ "deployments": engine.deployments().await })),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Build a container hosting the engine and its collaborators.
///
/// The collaborators are private components; only the engine is public.
pub async fn build_host_container(
    config: EngineConfig,
    resolver: Arc<dyn ArtifactResolver>,
    security: Arc<dyn SecurityProvider>,
    loader: Arc<dyn PluginLoader>,
) -> Result<ComponentContainer, ContainerError> {
    let mut container = ComponentContainer::new();
    container.add_configuration(ComponentConfiguration::instance(
        RESOLVER_TYPE,
        Arc::new(ResolverComponent::new(resolver)),
    ))?;
    container.add_configuration(ComponentConfiguration::instance(
        SECURITY_TYPE,
        Arc::new(SecurityComponent::new(security)),
    ))?;
    container.add_configuration(ComponentConfiguration::instance(
        LOADER_TYPE,
        Arc::new(LoaderComponent::new(loader)),
    ))?;
    container.add_configuration(
        ComponentConfiguration::instance(ENGINE_TYPE, Arc::new(EngineComponent::new(config)))
            .with_public(),
    )?;
    container.build().await?;
    Ok(container)
}

/// The running engine behind a built host container.
pub fn host_engine(container: &ComponentContainer) -> Result<Arc<PluginEngine>, ContainerError> {
    let reference = container.lookup(ENGINE_TYPE)?;
    let component = reference
        .as_any()
        .downcast_ref::<EngineComponent>()
        .ok_or_else(|| {
            ContainerError::Unsupported("engine component has unexpected type".to_string())
        })?;
    component
        .engine()
        .ok_or(ContainerError::NotBuilt)
}
