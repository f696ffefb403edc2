//! Integration tests for dependency-ordered manager construction.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};

use docflow_registry::*;

/// Shared journal of lifecycle events: "new:a", "start:a", "stop:a".
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

struct Service {
    name: String,
    journal: Journal,
    upstream: Vec<Arc<Service>>,
}

#[async_trait]
impl Manager for Service {
    fn kind(&self) -> &str {
        "service"
    }

    async fn start(&self) -> Result<()> {
        self.journal.push(format!("start:{}", self.name));
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.journal.push(format!("stop:{}", self.name));
        Ok(())
    }
}

#[derive(Deserialize, Default)]
struct ServiceArgs {
    #[serde(default)]
    fail: bool,
}

fn factory(journal: &Journal) -> ManagerFactory {
    let mut factory = ManagerFactory::new();
    let journal = journal.clone();
    factory
        .register_fn("service", move |spec, deps| {
            let args: ServiceArgs = spec.args.parse()?;
            if args.fail {
                bail!("constructor for '{}' refused", spec.name);
            }
            let upstream = deps
                .names()
                .iter()
                .map(|name| deps.get::<Service>(name))
                .collect::<Result<Vec<_>>>()?;
            journal.push(format!("new:{}", spec.name));
            Ok(ManagerInstance::new(Arc::new(Service {
                name: spec.name.clone(),
                journal: journal.clone(),
                upstream,
            })))
        })
        .unwrap();
    factory
}

fn spec(name: &str, deps: &[&str]) -> ManagerSpec {
    deps.iter()
        .fold(ManagerSpec::new(name, "service"), |spec, dep| spec.depends_on(*dep))
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_linear_graph_constructs_in_order() -> Result<()> {
    let journal = Journal::default();
    let mut registry = ManagerRegistry::new(factory(&journal));
    registry.register(spec("A", &[]))?;
    registry.register(spec("B", &["A"]))?;
    registry.register(spec("C", &["A", "B"]))?;

    registry.initialize().await?;

    assert_eq!(registry.construction_order(), &["A", "B", "C"]);
    assert_eq!(journal.with_prefix("new:"), vec!["A", "B", "C"]);

    let c = registry.get_as::<Service>("C").expect("C constructed");
    let upstream: Vec<&str> = c.upstream.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(upstream, vec!["A", "B"]);
    Ok(())
}

#[tokio::test]
async fn test_dependencies_constructed_first_regardless_of_registration() -> Result<()> {
    let journal = Journal::default();
    let mut registry = ManagerRegistry::new(factory(&journal));
    registry.register_all([
        spec("handler", &["bus", "engine"]),
        spec("engine", &["config"]),
        spec("bus", &["config"]),
        spec("config", &[]),
    ])?;

    registry.initialize().await?;

    let order = registry.construction_order().to_vec();
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    for s in registry.specs() {
        for dep in &s.dependencies {
            assert!(position(dep) < position(&s.name), "{dep} must precede {}", s.name);
        }
    }
    // engine registered before bus, so it wins the tie
    assert_eq!(order, vec!["config", "engine", "bus", "handler"]);
    Ok(())
}

#[tokio::test]
async fn test_identical_specs_give_identical_order() -> Result<()> {
    let specs = vec![
        spec("metrics", &[]),
        spec("bus", &[]),
        spec("ocr", &["bus"]),
        spec("prediction", &["bus"]),
        spec("feedback", &["bus", "metrics"]),
        spec("training", &["bus"]),
    ];

    let mut orders = Vec::new();
    for _ in 0..5 {
        let journal = Journal::default();
        let mut registry = ManagerRegistry::new(factory(&journal));
        registry.register_all(specs.clone())?;
        registry.initialize().await?;
        orders.push(registry.construction_order().to_vec());
    }
    assert!(orders.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(
        orders[0],
        vec!["metrics", "bus", "ocr", "prediction", "feedback", "training"]
    );
    Ok(())
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_cycle_constructs_nothing() -> Result<()> {
    let journal = Journal::default();
    let mut registry = ManagerRegistry::new(factory(&journal));
    registry.register(spec("A", &["B"]))?;
    registry.register(spec("B", &["A"]))?;

    let result = registry.initialize().await;

    assert!(matches!(result, Err(RegistryError::Cycle { ref members }) if members == &["A", "B"]));
    assert!(registry.get("A").is_none());
    assert!(registry.get("B").is_none());
    assert!(journal.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_dependency_constructs_nothing() -> Result<()> {
    let journal = Journal::default();
    let mut registry = ManagerRegistry::new(factory(&journal));
    registry.register(spec("A", &[]))?;
    registry.register(spec("B", &["ai_training"]))?;

    let result = registry.initialize().await;

    assert!(matches!(result, Err(RegistryError::MissingDependency { .. })));
    assert!(journal.events().is_empty());
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_constructor_failure_tears_down_in_reverse() -> Result<()> {
    let journal = Journal::default();
    let mut registry = ManagerRegistry::new(factory(&journal));
    registry.register(spec("A", &[]))?;
    registry.register(spec("B", &["A"]))?;
    registry.register(spec("C", &["B"]).with_arg("fail", true))?;

    let result = registry.initialize().await;

    match result {
        Err(RegistryError::Construction { manager, source }) => {
            assert_eq!(manager, "C");
            assert!(source.to_string().contains("refused"));
        }
        other => panic!("expected construction error, got {other:?}"),
    }
    assert_eq!(
        journal.events(),
        vec!["new:A", "new:B", "stop:B", "stop:A"]
    );
    assert!(registry.get("A").is_none());
    assert!(!registry.is_initialized());
    Ok(())
}

#[tokio::test]
async fn test_initialize_twice_rejected() -> Result<()> {
    let journal = Journal::default();
    let mut registry = ManagerRegistry::new(factory(&journal));
    registry.register(spec("A", &[]))?;
    registry.initialize().await?;

    assert!(matches!(
        registry.initialize().await,
        Err(RegistryError::AlreadyInitialized)
    ));
    assert!(matches!(
        registry.register(spec("B", &[])),
        Err(RegistryError::AlreadyInitialized)
    ));
    Ok(())
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_and_shutdown_order() -> Result<()> {
    let journal = Journal::default();
    let mut registry = ManagerRegistry::new(factory(&journal));
    registry.register_all([spec("A", &[]), spec("B", &["A"]), spec("C", &["B"])])?;
    registry.initialize().await?;

    registry.start_all().await?;
    registry.shutdown().await;
    registry.shutdown().await;

    assert_eq!(journal.with_prefix("start:"), vec!["A", "B", "C"]);
    assert_eq!(journal.with_prefix("stop:"), vec!["C", "B", "A"]);
    assert!(registry.get("A").is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_name_lookup_is_none() -> Result<()> {
    let journal = Journal::default();
    let mut registry = ManagerRegistry::new(factory(&journal));
    registry.register(spec("A", &[]))?;
    registry.initialize().await?;

    assert!(registry.get("ai_training").is_none());
    assert!(registry.get("A").is_some());
    Ok(())
}

// ============================================================================
// Declarative input
// ============================================================================

#[derive(Deserialize)]
struct GraphFile {
    managers: Vec<ManagerSpec>,
}

#[tokio::test]
async fn test_specs_from_toml() -> Result<()> {
    let graph: GraphFile = toml::from_str(
        r#"
        [[managers]]
        name = "bus"
        kind = "service"

        [[managers]]
        name = "ocr"
        kind = "service"
        dependencies = ["bus"]
        args = { fail = false }
        "#,
    )?;

    let journal = Journal::default();
    let mut registry = ManagerRegistry::new(factory(&journal));
    registry.register_all(graph.managers)?;
    assert_eq!(registry.plan()?, vec!["bus", "ocr"]);
    registry.initialize().await?;
    assert_eq!(registry.len(), 2);
    Ok(())
}
