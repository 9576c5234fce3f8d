//! External collaborator seams
//!
//! The engine treats artifact resolution, security-token provisioning, and
//! plugin loading as opaque external operations: possibly slow, possibly
//! failing, never retried here. Hosts supply implementations at engine
//! construction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::boundary::{ArtifactCoordinate, CapabilityToken, PayloadLocation};
use crate::plugin::Plugin;

/// Opaque failure raised by an external collaborator.
pub type CollaboratorFault = Box<dyn std::error::Error + Send + Sync>;

/// Resolves an artifact coordinate to its ordered binary payload set.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    /// Ordered payload set for one coordinate, transitive dependencies
    /// included in load order.
    async fn resolve(
        &self,
        coordinate: &ArtifactCoordinate,
    ) -> Result<Vec<PayloadLocation>, CollaboratorFault>;
}

/// Supplies the opaque capability tokens attached to boundaries.
///
/// Tokens are interpreted only by the boundary loader, never by the engine.
pub trait SecurityProvider: Send + Sync {
    /// Default tokens for per-deployment sandbox boundaries.
    fn sandbox_default_permissions(&self) -> HashSet<CapabilityToken>;

    /// Default tokens for the engine's shared boundary.
    fn shared_default_permissions(&self) -> HashSet<CapabilityToken>;
}

/// Boundary-level metadata derived from a payload set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundaryManifest {
    /// Name-prefix patterns for the types the boundary exports; everything
    /// else stays private to the boundary
    pub exported_prefixes: Vec<String>,
}

/// Loads plugin types out of a boundary's payload set.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// Describe a payload set before the boundary is constructed.
    async fn manifest(
        &self,
        resources: &[PayloadLocation],
    ) -> Result<BoundaryManifest, CollaboratorFault>;

    /// Construct the named plugin type from the payload set.
    async fn load(
        &self,
        resources: &[PayloadLocation],
        type_name: &str,
    ) -> Result<Box<dyn Plugin>, CollaboratorFault>;
}
