//! Container error types
//!
//! Configuration errors (duplicate request types, missing mandatory
//! dependencies) fail fast and are non-retryable; lifecycle-misuse errors
//! indicate programming mistakes; shutdown failures are aggregated so
//! teardown always runs to completion.

use lifecycle_core::LifecycleError;
use std::convert::Infallible;
use thiserror::Error;

/// Opaque failure raised by a component's own business logic.
pub type ComponentFault = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle misuse surfaced by the container's own state tracking.
pub type MisuseError = LifecycleError<Infallible>;

/// Main container error type
#[derive(Error, Debug)]
pub enum ContainerError {
    /// A configuration with this request type already exists
    #[error("duplicate request type: {0}")]
    DuplicateRequestType(String),

    /// Configuration mutation attempted after `build()`
    #[error("container already built")]
    AlreadyBuilt,

    /// Lookup or shutdown attempted before `build()`
    #[error("container not built")]
    NotBuilt,

    /// A mandatory dependency has no matching configuration
    #[error("component {component} requires {request_type} (field {field}) but no such configuration exists")]
    MissingDependency {
        /// Request type of the component declaring the edge
        component: String,
        /// Declared dependency field
        field: String,
        /// Missing request type
        request_type: String,
    },

    /// The request type is configured but not public
    #[error("component is not public: {0}")]
    NotPublic(String),

    /// No configuration exists for the request type
    #[error("no component configured for request type: {0}")]
    Unconfigured(String),

    /// A component rejected an operation it does not support
    #[error("unsupported component operation: {0}")]
    Unsupported(String),

    /// Lifecycle contract violation
    #[error("lifecycle violation: {0}")]
    Lifecycle(MisuseError),

    /// A component hook or business call failed
    #[error("component failure: {0}")]
    Component(ComponentFault),

    /// Request/response payload could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// One or more components failed during shutdown
    #[error("shutdown completed with {} component failure(s)", .0.len())]
    ShutdownFailures(Vec<(String, ContainerError)>),
}

impl ContainerError {
    /// Wrap an opaque business failure.
    pub fn component(fault: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Component(Box::new(fault))
    }

    /// Error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateRequestType(_)
            | Self::AlreadyBuilt
            | Self::NotBuilt
            | Self::MissingDependency { .. } => "configuration",
            Self::NotPublic(_) | Self::Unconfigured(_) => "lookup",
            Self::Unsupported(_) => "operation",
            Self::Lifecycle(_) => "lifecycle",
            Self::Component(_) => "component",
            Self::Serialization(_) => "serialization",
            Self::ShutdownFailures(_) => "teardown",
        }
    }
}

/// Container result type
pub type ContainerResult<T> = Result<T, ContainerError>;
