//! Compile-time table from manager kind to constructor.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::RegistryError;
use crate::manager::{Dependencies, ManagerInstance};
use crate::spec::ManagerSpec;

/// Builds managers of one kind.
#[async_trait]
pub trait ManagerConstructor: Send + Sync {
    fn kind(&self) -> &str;

    async fn construct(
        &self,
        spec: &ManagerSpec,
        deps: &Dependencies<'_>,
    ) -> Result<ManagerInstance>;
}

/// Synchronous constructor from a closure.
pub struct FnConstructor<F> {
    kind: String,
    build: F,
}

impl<F> FnConstructor<F>
where
    F: Fn(&ManagerSpec, &Dependencies<'_>) -> Result<ManagerInstance> + Send + Sync,
{
    pub fn new(kind: impl Into<String>, build: F) -> Self {
        Self {
            kind: kind.into(),
            build,
        }
    }
}

#[async_trait]
impl<F> ManagerConstructor for FnConstructor<F>
where
    F: Fn(&ManagerSpec, &Dependencies<'_>) -> Result<ManagerInstance> + Send + Sync,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn construct(
        &self,
        spec: &ManagerSpec,
        deps: &Dependencies<'_>,
    ) -> Result<ManagerInstance> {
        (self.build)(spec, deps)
    }
}

/// Registry of constructors keyed by kind.
#[derive(Default)]
pub struct ManagerFactory {
    constructors: BTreeMap<String, Box<dyn ManagerConstructor>>,
}

impl ManagerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        constructor: Box<dyn ManagerConstructor>,
    ) -> std::result::Result<(), RegistryError> {
        let kind = constructor.kind().to_string();
        if self.constructors.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind(kind));
        }
        debug!("Registering manager kind: {}", kind);
        self.constructors.insert(kind, constructor);
        Ok(())
    }

    pub fn register_fn<F>(&mut self, kind: &str, build: F) -> std::result::Result<(), RegistryError>
    where
        F: Fn(&ManagerSpec, &Dependencies<'_>) -> Result<ManagerInstance> + Send + Sync + 'static,
    {
        self.register(Box::new(FnConstructor::new(kind, build)))
    }

    pub fn get(&self, kind: &str) -> Option<&dyn ManagerConstructor> {
        self.constructors.get(kind).map(|c| c.as_ref())
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}
