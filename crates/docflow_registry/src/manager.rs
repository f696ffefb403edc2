//! Runtime manager instances.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A service component owned by the registry for the life of the process.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// The factory kind that built this manager.
    fn kind(&self) -> &str;

    /// Called once, in construction order, after every manager exists.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Called once, in reverse construction order, at teardown.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// A constructed manager, erased twice: as `dyn Manager` for lifecycle calls
/// and as `dyn Any` for typed lookup.
#[derive(Clone)]
pub struct ManagerInstance {
    manager: Arc<dyn Manager>,
    any: Arc<dyn Any + Send + Sync>,
}

impl ManagerInstance {
    pub fn new<T: Manager>(manager: Arc<T>) -> Self {
        Self {
            any: manager.clone(),
            manager,
        }
    }

    pub fn manager(&self) -> &Arc<dyn Manager> {
        &self.manager
    }

    pub fn downcast<T: Manager>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.any).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for ManagerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerInstance")
            .field("kind", &self.manager.kind())
            .finish()
    }
}

/// The already-constructed managers a constructor may use.
///
/// Only names listed in the spec's `dependencies` are reachable, so the
/// declared graph is the real graph.
pub struct Dependencies<'a> {
    owner: &'a str,
    declared: &'a [String],
    built: &'a HashMap<String, ManagerInstance>,
}

impl<'a> Dependencies<'a> {
    pub(crate) fn new(
        owner: &'a str,
        declared: &'a [String],
        built: &'a HashMap<String, ManagerInstance>,
    ) -> Self {
        Self {
            owner,
            declared,
            built,
        }
    }

    pub fn names(&self) -> &[String] {
        self.declared
    }

    /// Typed handle to dependency `name`.
    pub fn get<T: Manager>(&self, name: &str) -> Result<Arc<T>> {
        if !self.declared.iter().any(|d| d == name) {
            return Err(anyhow!(
                "'{}' uses '{}' without declaring it as a dependency",
                self.owner,
                name
            ));
        }
        let instance = self
            .built
            .get(name)
            .ok_or_else(|| anyhow!("dependency '{}' of '{}' was not constructed", name, self.owner))?;
        instance.downcast::<T>().ok_or_else(|| {
            anyhow!(
                "dependency '{}' of '{}' has kind '{}', expected {}",
                name,
                self.owner,
                instance.manager().kind(),
                std::any::type_name::<T>()
            )
        })
    }
}
