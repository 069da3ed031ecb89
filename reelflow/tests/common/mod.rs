//! Shared fixtures for integration tests.

use std::sync::Arc;

use reelflow::config::OrchestratorConfig;
use reelflow::observability::events::EventEmitter;
use reelflow::orchestrator::Orchestrator;
use reelflow::registry::TemplateRegistry;
use reelflow::store::{MemoryStore, Store};
use reelflow_core::TemplateDoc;

/// One orchestrator over a fresh in-memory store, with direct store
/// access for assertions.
pub struct Harness {
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<Orchestrator>,
    pub events: Arc<EventEmitter>,
}

/// Builds a harness with the built-in templates plus any extra YAML
/// documents.
pub fn harness(extra_templates: &[&str]) -> Harness {
    harness_with_config(extra_templates, OrchestratorConfig::default())
}

/// Builds a harness with a custom configuration.
pub fn harness_with_config(extra_templates: &[&str], config: OrchestratorConfig) -> Harness {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let events = Arc::new(EventEmitter::noop());
    let mut registry = TemplateRegistry::with_builtins().expect("built-ins parse");
    for yaml in extra_templates {
        registry.register(TemplateDoc::from_yaml(yaml).expect("test template parses"));
    }
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        registry,
        config,
        Arc::clone(&events),
    ));
    Harness {
        store,
        orchestrator,
        events,
    }
}
