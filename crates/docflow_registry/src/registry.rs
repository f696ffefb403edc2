//! Manager Registry
//!
//! Builds the manager graph once at startup:
//! 1. `register` every spec (names unique)
//! 2. `initialize` validates kinds and dependencies, orders the graph with
//!    Kahn's algorithm (ties broken by registration order) and constructs
//!    each manager after its dependencies
//! 3. `start_all`, then name lookup with `get` for the rest of the process
//! 4. `shutdown` tears everything down in reverse construction order
//!
//! Any failure during 2 leaves nothing running.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{RegistryError, Result};
use crate::factory::ManagerFactory;
use crate::manager::{Dependencies, Manager, ManagerInstance};
use crate::spec::ManagerSpec;

pub struct ManagerRegistry {
    factory: ManagerFactory,
    specs: Vec<ManagerSpec>,
    index: HashMap<String, usize>,
    managers: HashMap<String, ManagerInstance>,
    order: Vec<String>,
    initialized: bool,
}

impl ManagerRegistry {
    pub fn new(factory: ManagerFactory) -> Self {
        Self {
            factory,
            specs: Vec::new(),
            index: HashMap::new(),
            managers: HashMap::new(),
            order: Vec::new(),
            initialized: false,
        }
    }

    /// Add a spec. Registration order is the tie-breaker for construction.
    pub fn register(&mut self, spec: ManagerSpec) -> Result<()> {
        if self.initialized {
            return Err(RegistryError::AlreadyInitialized);
        }
        if self.index.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateName(spec.name));
        }
        debug!(manager = %spec.name, kind = %spec.kind, "Registering manager spec");
        self.index.insert(spec.name.clone(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    pub fn register_all(&mut self, specs: impl IntoIterator<Item = ManagerSpec>) -> Result<()> {
        specs.into_iter().try_for_each(|spec| self.register(spec))
    }

    pub fn specs(&self) -> &[ManagerSpec] {
        &self.specs
    }

    /// Validate the graph and return the construction order without
    /// constructing anything.
    pub fn plan(&self) -> Result<Vec<String>> {
        for spec in &self.specs {
            if !self.factory.has_kind(&spec.kind) {
                return Err(RegistryError::UnknownKind {
                    manager: spec.name.clone(),
                    kind: spec.kind.clone(),
                });
            }
        }
        let order = self.topological_order()?;
        Ok(order.into_iter().map(|i| self.specs[i].name.clone()).collect())
    }

    /// Kahn's algorithm over registration indices. The ready set is ordered,
    /// so the lowest registration index always goes next.
    fn topological_order(&self) -> Result<Vec<usize>> {
        let len = self.specs.len();
        let mut in_degree = vec![0usize; len];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); len];

        for (i, spec) in self.specs.iter().enumerate() {
            let mut seen = BTreeSet::new();
            for dependency in &spec.dependencies {
                let dep = *self.index.get(dependency).ok_or_else(|| {
                    RegistryError::MissingDependency {
                        manager: spec.name.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                if seen.insert(dep) {
                    in_degree[i] += 1;
                    dependents[dep].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..len).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(len);
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != len {
            let members = (0..len)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.specs[i].name.clone())
                .collect();
            return Err(RegistryError::Cycle { members });
        }
        Ok(order)
    }

    /// Construct every manager in dependency order.
    ///
    /// On failure, managers built so far are shut down in reverse order
    /// before the error is returned.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(RegistryError::AlreadyInitialized);
        }
        let order = self.plan()?;
        info!(managers = order.len(), order = %order.join(" -> "), "Constructing managers");

        for name in &order {
            let spec = &self.specs[self.index[name]];
            let Some(constructor) = self.factory.get(&spec.kind) else {
                // plan() checked every kind
                return Err(RegistryError::UnknownKind {
                    manager: spec.name.clone(),
                    kind: spec.kind.clone(),
                });
            };
            let deps = Dependencies::new(&spec.name, &spec.dependencies, &self.managers);
            let built = constructor.construct(spec, &deps).await;
            match built {
                Ok(instance) => {
                    debug!(manager = %name, kind = %spec.kind, "Manager constructed");
                    self.managers.insert(name.clone(), instance);
                    self.order.push(name.clone());
                }
                Err(source) => {
                    error!(manager = %name, kind = %spec.kind, error = %format!("{source:#}"), "Manager construction failed");
                    let err = RegistryError::Construction {
                        manager: name.clone(),
                        source,
                    };
                    self.teardown().await;
                    return Err(err);
                }
            }
        }

        self.initialized = true;
        info!(managers = self.order.len(), "Manager registry initialized");
        Ok(())
    }

    /// Run every manager's `start` hook in construction order.
    pub async fn start_all(&self) -> Result<()> {
        for name in &self.order {
            if let Some(instance) = self.managers.get(name) {
                instance
                    .manager()
                    .start()
                    .await
                    .map_err(|source| RegistryError::Start {
                        manager: name.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Manager>> {
        self.managers.get(name).map(|m| Arc::clone(m.manager()))
    }

    pub fn get_as<T: Manager>(&self, name: &str) -> Option<Arc<T>> {
        self.managers.get(name).and_then(ManagerInstance::downcast::<T>)
    }

    pub fn construction_order(&self) -> &[String] {
        &self.order
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Shut every manager down in reverse construction order. Safe to call
    /// more than once.
    pub async fn shutdown(&mut self) {
        if self.order.is_empty() {
            return;
        }
        info!(managers = self.order.len(), "Shutting down managers");
        self.teardown().await;
        self.initialized = false;
    }

    async fn teardown(&mut self) {
        while let Some(name) = self.order.pop() {
            if let Some(instance) = self.managers.remove(&name) {
                match instance.manager().shutdown().await {
                    Ok(()) => debug!(manager = %name, "Manager shut down"),
                    Err(e) => warn!(manager = %name, error = %format!("{e:#}"), "Manager shutdown failed"),
                }
            }
        }
        self.managers.clear();
    }
}
