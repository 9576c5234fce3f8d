//! Component container and the four-phase build algorithm
//!
//! Build order is the key design choice: instantiate every configured
//! component first, then wire every declared dependency edge against the
//! complete instance table, then initialize in declaration order, then
//! expose public components through the reference factory. Because every
//! instance exists before the first edge is bound, cyclic graphs resolve
//! without recursion or placeholders.

use std::collections::HashMap;
use std::sync::Arc;

use lifecycle_core::LifecycleTracker;
use tracing::{debug, info, warn};

use crate::component::{ComponentRef, DependencySpec};
use crate::config::ComponentConfiguration;
use crate::error::{ContainerError, ContainerResult};
use crate::reference::{DirectReferenceFactory, ReferenceFactory};

/// One built component with its lifecycle bookkeeping.
struct BuiltEntry {
    instance: ComponentRef,
    tracker: LifecycleTracker,
    dependencies: Vec<DependencySpec>,
    public: bool,
    /// Exposed reference, produced by the factory exactly once
    public_reference: Option<ComponentRef>,
}

/// Dependency-injection container for the host's internal components.
pub struct ComponentContainer {
    configurations: Vec<ComponentConfiguration>,
    reference_factory: Arc<dyn ReferenceFactory>,
    entries: HashMap<String, BuiltEntry>,
    /// Declaration order, drives initialization and (reversed) shutdown
    order: Vec<String>,
    built: bool,
}

impl ComponentContainer {
    /// Create an empty container with the pass-through reference factory.
    pub fn new() -> Self {
        Self {
            configurations: Vec::new(),
            reference_factory: Arc::new(DirectReferenceFactory),
            entries: HashMap::new(),
            order: Vec::new(),
            built: false,
        }
    }

    /// Replace the reference factory used for public components.
    pub fn with_reference_factory(mut self, factory: Arc<dyn ReferenceFactory>) -> Self {
        self.reference_factory = factory;
        self
    }

    /// Add a configuration entry. Pre-build only; duplicate request types
    /// are rejected here, not at build time.
    pub fn add_configuration(&mut self, config: ComponentConfiguration) -> ContainerResult<()> {
        if self.built {
            return Err(ContainerError::AlreadyBuilt);
        }
        if self.contains_request_type(config.request_type()) {
            return Err(ContainerError::DuplicateRequestType(
                config.request_type().to_string(),
            ));
        }
        self.configurations.push(config);
        Ok(())
    }

    /// Remove the entry sharing this configuration's request type.
    /// Pre-build only. Returns whether an entry was removed.
    pub fn remove_configuration(
        &mut self,
        config: &ComponentConfiguration,
    ) -> ContainerResult<bool> {
        if self.built {
            return Err(ContainerError::AlreadyBuilt);
        }
        let before = self.configurations.len();
        self.configurations.retain(|existing| existing != config);
        Ok(self.configurations.len() != before)
    }

    /// Whether any configuration uses this request type.
    pub fn contains_request_type(&self, request_type: &str) -> bool {
        self.configurations
            .iter()
            .any(|existing| existing.request_type() == request_type)
    }

    /// Structural containment: same request type, implementation and
    /// visibility are ignored.
    pub fn contains_configuration(&self, config: &ComponentConfiguration) -> bool {
        self.contains_request_type(config.request_type())
    }

    /// Run the four-phase build algorithm.
    pub async fn build(&mut self) -> ContainerResult<()> {
        if self.built {
            return Err(ContainerError::AlreadyBuilt);
        }

        // Phase 1: instantiate every configured component, bare
        let mut order = Vec::with_capacity(self.configurations.len());
        let mut entries: HashMap<String, BuiltEntry> = HashMap::new();
        for config in &self.configurations {
            let instance = config.instantiate();
            let dependencies = instance.dependencies();
            order.push(config.request_type().to_string());
            entries.insert(
                config.request_type().to_string(),
                BuiltEntry {
                    instance,
                    tracker: LifecycleTracker::new(),
                    dependencies,
                    public: config.is_public(),
                    public_reference: None,
                },
            );
        }

        // Phase 2: wire every declared edge against the complete table
        for request_type in &order {
            let (instance, dependencies) = match entries.get(request_type) {
                Some(entry) => (entry.instance.clone(), entry.dependencies.clone()),
                None => continue,
            };
            for dependency in &dependencies {
                match entries.get(&dependency.request_type) {
                    Some(target) => {
                        instance.inject(&dependency.field, Some(target.instance.clone()))?;
                    }
                    None if dependency.required => {
                        return Err(ContainerError::MissingDependency {
                            component: request_type.clone(),
                            field: dependency.field.clone(),
                            request_type: dependency.request_type.clone(),
                        });
                    }
                    None => {
                        // Optional edge: bind the explicit absent value
                        instance.inject(&dependency.field, None)?;
                    }
                }
            }
        }

        // Phase 3: initialize in declaration order. Members of a cycle may be
        // initialized before a collaborator they depend on has finished its
        // own initialize().
        let mut initialized: Vec<String> = Vec::new();
        for request_type in &order {
            let instance = match entries.get_mut(request_type) {
                Some(entry) => {
                    entry
                        .tracker
                        .begin_initialize()
                        .map_err(ContainerError::Lifecycle)?;
                    entry.instance.clone()
                }
                None => continue,
            };
            if let Err(err) = instance.initialize().await {
                warn!(
                    request_type = %request_type,
                    error = %err,
                    "component initialization failed, rolling back"
                );
                Self::rollback(&mut entries, &initialized).await;
                return Err(err);
            }
            if let Some(entry) = entries.get_mut(request_type) {
                entry.tracker.complete_initialize();
            }
            initialized.push(request_type.clone());
        }

        // Phase 4: expose public components through the factory, once
        for request_type in &order {
            let entry = match entries.get_mut(request_type) {
                Some(entry) => entry,
                None => continue,
            };
            if entry.public {
                let reference = self
                    .reference_factory
                    .wrap(request_type, entry.instance.clone());
                entry.public_reference = Some(reference);
            }
        }

        let public = entries.values().filter(|entry| entry.public).count();
        info!(
            components = order.len(),
            public = public,
            "component container built"
        );

        self.entries = entries;
        self.order = order;
        self.built = true;
        Ok(())
    }

    /// Best-effort reverse teardown of the components initialized before a
    /// build failure.
    async fn rollback(entries: &mut HashMap<String, BuiltEntry>, initialized: &[String]) {
        for request_type in initialized.iter().rev() {
            if let Some(entry) = entries.get_mut(request_type) {
                if let Err(err) = entry.instance.finish().await {
                    warn!(
                        request_type = %request_type,
                        error = %err,
                        "component teardown failed during build rollback"
                    );
                }
                entry.tracker.complete_finish();
            }
        }
    }

    /// Public reference for a request type.
    ///
    /// Returns the cached factory-produced reference, so repeated lookups
    /// are reference-equal. Private components fail with `NotPublic`.
    pub fn lookup(&self, request_type: &str) -> ContainerResult<ComponentRef> {
        if !self.built {
            return Err(ContainerError::NotBuilt);
        }
        let entry = self
            .entries
            .get(request_type)
            .ok_or_else(|| ContainerError::Unconfigured(request_type.to_string()))?;
        entry
            .public_reference
            .clone()
            .ok_or_else(|| ContainerError::NotPublic(request_type.to_string()))
    }

    /// Finish every component in reverse declaration order, continuing past
    /// individual failures and aggregating them. Injected references are
    /// released afterwards so cyclic graphs can be dropped.
    pub async fn shutdown(&mut self) -> ContainerResult<()> {
        if !self.built {
            return Err(ContainerError::NotBuilt);
        }

        let mut failures: Vec<(String, ContainerError)> = Vec::new();
        for request_type in self.order.iter().rev() {
            let entry = match self.entries.get_mut(request_type) {
                Some(entry) => entry,
                None => continue,
            };
            match entry.tracker.begin_finish::<std::convert::Infallible>() {
                Ok(true) => {
                    if let Err(err) = entry.instance.finish().await {
                        warn!(
                            request_type = %request_type,
                            error = %err,
                            "component teardown failed, continuing"
                        );
                        failures.push((request_type.clone(), err));
                    }
                    entry.tracker.complete_finish();
                }
                Ok(false) => {}
                Err(err) => failures.push((request_type.clone(), ContainerError::Lifecycle(err))),
            }
        }

        // Release injected references to break Arc cycles
        for request_type in &self.order {
            if let Some(entry) = self.entries.get(request_type) {
                for dependency in &entry.dependencies {
                    if let Err(err) = entry.instance.inject(&dependency.field, None) {
                        debug!(
                            request_type = %request_type,
                            field = %dependency.field,
                            error = %err,
                            "could not release injected reference"
                        );
                    }
                }
            }
        }

        self.entries.clear();
        self.order.clear();
        self.built = false;
        info!(failures = failures.len(), "component container shut down");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ContainerError::ShutdownFailures(failures))
        }
    }

    /// Number of configuration entries.
    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    /// Whether no components are configured.
    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    /// Whether `build()` has completed.
    pub fn is_built(&self) -> bool {
        self.built
    }
}

impl Default for ComponentContainer {
    fn default() -> Self {
        Self::new()
    }
}
