//! Manager registry.
//!
//! A process is described by a list of [`ManagerSpec`]s (name, kind,
//! dependencies, constructor arguments). [`ManagerFactory`] maps each kind
//! to a constructor at compile time; [`ManagerRegistry`] turns the specs
//! into running managers in dependency order and serves name lookups.

pub mod error;
pub mod factory;
pub mod manager;
pub mod registry;
pub mod spec;

pub use error::RegistryError;
pub use factory::{FnConstructor, ManagerConstructor, ManagerFactory};
pub use manager::{Dependencies, Manager, ManagerInstance};
pub use registry::ManagerRegistry;
pub use spec::{ManagerArgs, ManagerSpec};
