//! Declarative manager descriptions.

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Constructor arguments bound to one manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagerArgs(BTreeMap<String, Value>);

impl ManagerArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.0.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deserialize all arguments into a typed options struct.
    pub fn parse<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let value = Value::Object(self.0.clone().into_iter().collect());
        serde_json::from_value(value).context("Invalid manager arguments")
    }
}

/// One node of the manager graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSpec {
    /// Unique key, used by `get` and in other specs' `dependencies`.
    pub name: String,
    /// Selects the constructor in the [`crate::ManagerFactory`].
    pub kind: String,
    /// Managers that must be constructed first. Duplicates are ignored.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub args: ManagerArgs,
}

impl ManagerSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            dependencies: Vec::new(),
            args: ManagerArgs::new(),
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        let dependency = dependency.into();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key, value);
        self
    }
}
