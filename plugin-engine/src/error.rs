//! Engine error types
//!
//! Configuration errors (duplicate deployment names) fail fast. Policy
//! errors (a vetoed undeploy) are expected control flow and side-effect
//! free, so callers may retry once the vetoing condition clears. Boundary
//! errors carry the boundary name and offending type so callers can correct
//! usage. Teardown failures are aggregated in the undeploy report, not
//! raised here.

use lifecycle_core::LifecycleError;
use thiserror::Error;

use crate::collaborators::CollaboratorFault;
use crate::listener::ListenerFault;
use crate::plugin::PluginFault;

/// Main plugin engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    /// A deployment with this name is already registered
    #[error("deployment already exists: {0}")]
    DuplicateDeployment(String),

    /// The configured deployment limit is reached
    #[error("deployment limit reached ({0})")]
    DeploymentLimitExceeded(usize),

    /// The boundary is unknown, undeployed, or mid-undeploy
    #[error("no such deployment: {0}")]
    NoSuchDeployment(String),

    /// The requested capability type is not exported by the boundary
    #[error("visibility violation in boundary {boundary}: type {type_name} is not exported")]
    VisibilityViolation {
        /// Boundary the caller reached into
        boundary: String,
        /// Offending fully-qualified type name
        type_name: String,
    },

    /// A listener vetoed the undeploy; no state was changed
    #[error("undeploy vetoed for deployment {deployment}")]
    UndeployVetoed {
        /// Deployment the veto protected
        deployment: String,
        /// Reason supplied by the vetoing listener, if any
        reason: Option<String>,
    },

    /// The external artifact resolver failed
    #[error("artifact resolution failed for {coordinate}: {cause}")]
    Resolver {
        /// Coordinate being resolved
        coordinate: String,
        /// Opaque resolver failure
        cause: CollaboratorFault,
    },

    /// The plugin loader failed
    #[error("plugin loader failed ({context}): {cause}")]
    Loader {
        /// Boundary manifest or plugin type being loaded
        context: String,
        /// Opaque loader failure
        cause: CollaboratorFault,
    },

    /// A deployment listener failed during the deployed notification
    #[error("deployment listener failed: {0}")]
    Listener(ListenerFault),

    /// Plugin lifecycle contract violation or hook failure
    #[error("plugin lifecycle error: {0}")]
    Plugin(LifecycleError<PluginFault>),

    /// A plugin's business operation failed
    #[error("plugin invocation failed: {0}")]
    Invocation(PluginFault),
}

impl EngineError {
    /// Error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateDeployment(_) | Self::DeploymentLimitExceeded(_) => "configuration",
            Self::NoSuchDeployment(_) | Self::VisibilityViolation { .. } => "boundary",
            Self::UndeployVetoed { .. } => "policy",
            Self::Resolver { .. } | Self::Loader { .. } => "collaborator",
            Self::Listener(_) => "listener",
            Self::Plugin(_) => "lifecycle",
            Self::Invocation(_) => "plugin",
        }
    }

    /// Policy errors are expected control flow and legitimately retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UndeployVetoed { .. })
    }
}

impl From<LifecycleError<PluginFault>> for EngineError {
    fn from(err: LifecycleError<PluginFault>) -> Self {
        Self::Plugin(err)
    }
}

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;
