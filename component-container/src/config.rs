//! Component configuration entries
//!
//! A configuration maps a request type to an implementation and a public
//! flag. The request type is the entry's primary key: two configurations
//! are the same entry when their request types match, regardless of
//! implementation or visibility.

use std::fmt;
use std::sync::Arc;

use crate::component::ComponentRef;

/// How the container obtains the component instance during build.
#[derive(Clone)]
pub enum ComponentProvider {
    /// Pre-built instance supplied by the caller
    Instance(ComponentRef),
    /// Factory invoked once during the instantiate phase
    Factory(Arc<dyn Fn() -> ComponentRef + Send + Sync>),
}

impl fmt::Debug for ComponentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("ComponentProvider::Instance"),
            Self::Factory(_) => f.write_str("ComponentProvider::Factory"),
        }
    }
}

/// One request-type -> implementation entry in the container's table.
#[derive(Debug, Clone)]
pub struct ComponentConfiguration {
    request_type: String,
    provider: ComponentProvider,
    public: bool,
}

impl ComponentConfiguration {
    /// Configure a pre-built instance. Entries are private by default.
    pub fn instance(request_type: impl Into<String>, instance: ComponentRef) -> Self {
        Self {
            request_type: request_type.into(),
            provider: ComponentProvider::Instance(instance),
            public: false,
        }
    }

    /// Configure a factory invoked once during build.
    pub fn factory(
        request_type: impl Into<String>,
        factory: impl Fn() -> ComponentRef + Send + Sync + 'static,
    ) -> Self {
        Self {
            request_type: request_type.into(),
            provider: ComponentProvider::Factory(Arc::new(factory)),
            public: false,
        }
    }

    /// Expose the component through the container's lookup API.
    pub fn with_public(mut self) -> Self {
        self.public = true;
        self
    }

    /// Request type this entry is looked up by.
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// Whether the component is exposed via `lookup`.
    pub fn is_public(&self) -> bool {
        self.public
    }

    pub(crate) fn instantiate(&self) -> ComponentRef {
        match &self.provider {
            ComponentProvider::Instance(instance) => instance.clone(),
            ComponentProvider::Factory(factory) => factory(),
        }
    }
}

/// Primary-key equality: request type only.
impl PartialEq for ComponentConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.request_type == other.request_type
    }
}

impl Eq for ComponentConfiguration {}
