//! Component trait and declarative wiring tables
//!
//! A component declares its dependency edges as explicit (field, request
//! type) pairs. The container resolves every edge against the complete
//! instance table after all components exist, which is what makes cyclic
//! graphs tractable.

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

use crate::error::ContainerError;

/// Shared reference to a component instance.
pub type ComponentRef = Arc<dyn Component>;

/// One declared dependency edge of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    /// Field name the resolved reference is bound to
    pub field: String,
    /// Request type of the collaborator
    pub request_type: String,
    /// Mandatory edges fail the build when unresolved; optional edges bind
    /// to the explicit absent value instead
    pub required: bool,
}

impl DependencySpec {
    /// Mandatory dependency: build fails if no matching configuration exists.
    pub fn required(field: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            request_type: request_type.into(),
            required: true,
        }
    }

    /// Optional dependency: binds to `None` if no matching configuration exists.
    pub fn optional(field: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            request_type: request_type.into(),
            required: false,
        }
    }
}

/// Contract every container-managed component implements.
///
/// Dependency fields use interior mutability so the container can wire a
/// fully instantiated graph through `&self`. Components participating in a
/// dependency cycle may be initialized before a collaborator has finished
/// its own `initialize()`; hard work that needs a ready collaborator belongs
/// after initialization, in the first business call.
#[async_trait]
pub trait Component: Send + Sync {
    /// Wiring table resolved by the container during build.
    fn dependencies(&self) -> Vec<DependencySpec> {
        Vec::new()
    }

    /// Bind one declared dependency field.
    ///
    /// `None` is the explicit absent value: it is passed for an optional
    /// edge with no matching configuration, and again during shutdown to
    /// release the reference.
    fn inject(
        &self,
        field: &str,
        reference: Option<ComponentRef>,
    ) -> Result<(), ContainerError> {
        let _ = reference;
        Err(ContainerError::Unsupported(format!(
            "component declares no dependency field named {field}"
        )))
    }

    /// One-time setup, run by the container in declaration order.
    async fn initialize(&self) -> Result<(), ContainerError> {
        Ok(())
    }

    /// One-time teardown, run by the container in reverse declaration order.
    async fn finish(&self) -> Result<(), ContainerError> {
        Ok(())
    }

    /// Uniform business-operation surface.
    ///
    /// Reference factories decorate this method, so cross-cutting behavior
    /// (timing, auditing) wraps every call without changing the contract.
    async fn call(&self, request: Value) -> Result<Value, ContainerError>;

    /// Typed access for callers that know the concrete component.
    fn as_any(&self) -> &dyn Any;
}
