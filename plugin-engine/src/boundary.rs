//! Isolation boundaries and their identifying data
//!
//! A boundary is one unit of loaded plugin code: its ordered binary payload
//! set, a visibility allow-list checked on every cross-boundary type
//! request, and the opaque capability tokens attached by the security
//! provider. Boundaries live in the engine's arena and are addressed by
//! stable [`BoundaryId`] handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::plugin::PluginHandle;

/// Stable handle addressing one boundary in the engine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundaryId(u64);

impl BoundaryId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Rebuild a handle from its raw arena index.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw arena index.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BoundaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Artifact coordinate resolved by the external artifact resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactCoordinate {
    /// Group identifier
    pub group: String,
    /// Artifact identifier
    pub artifact: String,
    /// Payload extension
    pub extension: String,
    /// Version string
    pub version: String,
}

impl ArtifactCoordinate {
    /// Build a coordinate from its four parts.
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        extension: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            extension: extension.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.group, self.artifact, self.extension, self.version
        )
    }
}

/// One resolved binary payload of a boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadLocation {
    /// Coordinate the payload was resolved from
    pub coordinate: ArtifactCoordinate,
    /// Local filesystem location of the payload
    pub path: PathBuf,
}

/// Name-prefix patterns controlling which types inside a boundary may be
/// referenced from outside it.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    patterns: Vec<String>,
    permit_all: bool,
}

impl AllowList {
    /// Allow list from explicit name-prefix patterns.
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            permit_all: false,
        }
    }

    /// Allow list permitting every type; used by the shared boundary.
    pub fn permit_all() -> Self {
        Self {
            patterns: Vec::new(),
            permit_all: true,
        }
    }

    /// Whether a fully-qualified type name matches any pattern.
    pub fn permits(&self, type_name: &str) -> bool {
        self.permit_all
            || self
                .patterns
                .iter()
                .any(|pattern| type_name.starts_with(pattern.as_str()))
    }

    /// Configured patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Opaque capability token supplied by the security provider and never
/// interpreted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityToken(String);

impl CapabilityToken {
    /// Wrap an opaque token value.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token value, uninterpreted.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Boundary lifecycle state.
///
/// Legal transitions: `Deployed -> Undeploying -> {Deployed, Undeployed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryState {
    /// Registered; plugins may be resolved
    Deployed,
    /// Veto phase in progress; registry entry still present
    Undeploying,
    /// Terminal; registry entry removed
    Undeployed,
}

/// One unit of loaded plugin code with its own visibility rules.
///
/// Immutable after construction except for its state and the table of
/// instantiated plugin handles.
pub struct IsolationBoundary {
    id: BoundaryId,
    /// Deployment name; `None` for the engine's shared boundary
    name: Option<String>,
    resources: Vec<PayloadLocation>,
    allow_list: AllowList,
    tokens: HashSet<CapabilityToken>,
    deployed_at: DateTime<Utc>,
    pub(crate) state: RwLock<BoundaryState>,
    /// Lazily resolved plugin handles, keyed by plugin type name
    pub(crate) plugins: Mutex<HashMap<String, Arc<PluginHandle>>>,
    pub(crate) last_accessed: RwLock<DateTime<Utc>>,
}

impl IsolationBoundary {
    pub(crate) fn deployment(
        id: BoundaryId,
        name: impl Into<String>,
        resources: Vec<PayloadLocation>,
        allow_list: AllowList,
        tokens: HashSet<CapabilityToken>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: Some(name.into()),
            resources,
            allow_list,
            tokens,
            deployed_at: now,
            state: RwLock::new(BoundaryState::Deployed),
            plugins: Mutex::new(HashMap::new()),
            last_accessed: RwLock::new(now),
        }
    }

    pub(crate) fn shared(id: BoundaryId, tokens: HashSet<CapabilityToken>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: None,
            resources: Vec::new(),
            allow_list: AllowList::permit_all(),
            tokens,
            deployed_at: now,
            state: RwLock::new(BoundaryState::Deployed),
            plugins: Mutex::new(HashMap::new()),
            last_accessed: RwLock::new(now),
        }
    }

    /// Stable handle of this boundary.
    pub fn id(&self) -> BoundaryId {
        self.id
    }

    /// Deployment name; `None` for the shared boundary.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for logs and error context.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| "<shared>".to_string())
    }

    /// Ordered binary payload set.
    pub fn resources(&self) -> &[PayloadLocation] {
        &self.resources
    }

    /// Visibility allow-list.
    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Opaque capability tokens attached at construction.
    pub fn tokens(&self) -> &HashSet<CapabilityToken> {
        &self.tokens
    }

    /// Deployment timestamp.
    pub fn deployed_at(&self) -> DateTime<Utc> {
        self.deployed_at
    }

    /// Current state.
    pub async fn state(&self) -> BoundaryState {
        *self.state.read().await
    }

    /// `Deployed -> Undeploying`; fails when the boundary is not deployed.
    pub(crate) async fn begin_undeploy(&self) -> Result<(), crate::error::EngineError> {
        let mut state = self.state.write().await;
        if *state != BoundaryState::Deployed {
            return Err(crate::error::EngineError::NoSuchDeployment(
                self.display_name(),
            ));
        }
        *state = BoundaryState::Undeploying;
        Ok(())
    }

    /// `Undeploying -> Deployed` after a veto.
    pub(crate) async fn cancel_undeploy(&self) {
        *self.state.write().await = BoundaryState::Deployed;
    }

    /// `Undeploying -> Undeployed`, terminal.
    pub(crate) async fn complete_undeploy(&self) {
        *self.state.write().await = BoundaryState::Undeployed;
    }

    pub(crate) async fn touch(&self) {
        *self.last_accessed.write().await = Utc::now();
    }
}

/// Point-in-time view of one registered deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentInfo {
    /// Boundary handle
    pub boundary: BoundaryId,
    /// Deployment name
    pub deployment: String,
    /// Current boundary state
    pub state: BoundaryState,
    /// Deployment timestamp
    pub deployed_at: DateTime<Utc>,
    /// Last plugin resolution timestamp
    pub last_accessed: DateTime<Utc>,
    /// Plugin handles resolved so far
    pub resolved_plugins: usize,
    /// Binary payloads backing the boundary
    pub payloads: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_prefix_matching() {
        let list = AllowList::new(vec![
            "org.example.api.".to_string(),
            "org.example.spi.Extension".to_string(),
        ]);

        assert!(list.permits("org.example.api.Greeter"));
        assert!(list.permits("org.example.spi.Extension"));
        assert!(!list.permits("org.example.internal.GreeterImpl"));
        assert!(!list.permits("org.other.api.Greeter"));
    }

    #[test]
    fn test_permit_all_allow_list() {
        let list = AllowList::permit_all();
        assert!(list.permits("anything.at.All"));
        assert!(list.patterns().is_empty());
    }

    #[test]
    fn test_coordinate_display() {
        let coordinate = ArtifactCoordinate::new("org.example", "greeter", "jar", "1.2.0");
        assert_eq!(coordinate.to_string(), "org.example:greeter:jar:1.2.0");
    }
}
