//! Dependency-injection container for the host's long-lived components.
//!
//! This crate builds a graph of internal system components from a table of
//! request-type -> implementation configurations:
//!
//! - Instantiate-all-then-wire-all construction, so cyclic dependency graphs
//!   (A -> B -> C -> A) resolve without recursion or placeholder objects
//! - Declarative wiring tables: each component lists its dependency fields as
//!   (field, request type) pairs, no runtime reflection
//! - Mandatory vs. optional dependency policy per edge: a missing optional
//!   dependency binds to an explicit absent value, a missing mandatory one
//!   fails the build naming the request type
//! - Public/private separation: private components are reachable only through
//!   injection, never through the container's lookup API
//! - Pluggable reference factories for public components, including a
//!   call-timing instrumentation decorator
//!
//! See [`ComponentContainer`] for the build algorithm and
//! [`Component`] for the trait all components implement.

pub mod component;
pub mod config;
pub mod container;
pub mod error;
pub mod reference;

pub use component::{Component, ComponentRef, DependencySpec};
pub use config::{ComponentConfiguration, ComponentProvider};
pub use container::ComponentContainer;
pub use error::{ContainerError, ContainerResult};
pub use reference::{
    CallStatistics, DirectReferenceFactory, InstrumentedReferenceFactory, ReferenceFactory,
};
