//! Runtime host for pluggable modules inside a long-lived process.
//!
//! The engine loads plugin code into isolation boundaries, wires their
//! lifecycle, and tears them down under a veto-capable two-phase protocol:
//!
//! - Named deployments backed by ordered binary payload sets from an
//!   external artifact resolver
//! - One isolation boundary per deployment, carrying a visibility allow-list
//!   and opaque capability tokens from an external security provider
//! - Lazy, memoized plugin instantiation with exactly-once initialization
//! - Deployment listeners notified in registration order, with a veto phase
//!   that can abort an undeploy with no observable state change
//! - Best-effort aggregate teardown: plugin failures during undeploy are
//!   collected and reported, never block registry removal
//! - Per-deployment-name serialization of deploy/undeploy; unrelated
//!   deployments proceed fully in parallel
//!
//! See [`PluginEngine`] for the orchestration entry point and the
//! [`host`] module for wiring the engine's own collaborators through the
//! component container.

pub mod boundary;
pub mod collaborators;
pub mod engine;
pub mod error;
pub mod host;
pub mod listener;
pub mod plugin;

pub use boundary::{
    AllowList, ArtifactCoordinate, BoundaryId, BoundaryState, CapabilityToken, DeploymentInfo,
    IsolationBoundary, PayloadLocation,
};
pub use collaborators::{
    ArtifactResolver, BoundaryManifest, CollaboratorFault, PluginLoader, SecurityProvider,
};
pub use engine::{EngineConfig, PluginEngine, TeardownFailure, UndeployReport};
pub use error::{EngineError, EngineResult};
pub use host::{
    build_host_container, host_engine, EngineComponent, HostCommand, ENGINE_TYPE, LOADER_TYPE,
    RESOLVER_TYPE, SECURITY_TYPE,
};
pub use listener::{DeploymentListener, ListenerFault, Veto};
pub use plugin::{Plugin, PluginFault, PluginHandle};
