//! Orchestrator facade
//!
//! Ties the registry, expander, publisher, dispatcher, and query API into
//! the single surface embedders and the CLI talk to. The orchestrator
//! itself is stateless beyond its immutable template cache: every piece of
//! orchestration state lives in the shared store, so any number of
//! processes can run this facade against the same store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use reelflow_core::{OrchestrateError, Task};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::dispatch::Dispatcher;
use crate::expand::{self, Expansion};
use crate::observability::events::EventEmitter;
use crate::publish::Publisher;
use crate::query::{Queries, ScenarioStatus};
use crate::registry::TemplateRegistry;
use crate::store::Store;

/// The orchestration engine.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: TemplateRegistry,
    publisher: Publisher,
    dispatcher: Dispatcher,
    queries: Queries,
}

impl Orchestrator {
    /// Assembles an orchestrator from its parts.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: TemplateRegistry,
        config: OrchestratorConfig,
        events: Arc<EventEmitter>,
    ) -> Self {
        let publisher = Publisher::new(Arc::clone(&store), Arc::clone(&events));
        let dispatcher = Dispatcher::new(Arc::clone(&store), events, config.cascade_fail);
        let queries = Queries::new(store);
        Self {
            config,
            registry,
            publisher,
            dispatcher,
            queries,
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The template registry.
    #[must_use]
    pub const fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Expands a registered template without persisting anything. The
    /// dry-run counterpart of [`Self::submit_scenario`].
    ///
    /// # Errors
    ///
    /// Returns the expansion taxonomy (`UnknownTemplate`,
    /// `InvalidTemplate`, `CyclicTemplate`, ...); no state is touched.
    pub fn preview(
        &self,
        template_name: &str,
        params: &IndexMap<String, serde_json::Value>,
    ) -> Result<Expansion, OrchestrateError> {
        let doc = self.registry.get(template_name)?;
        let scenario_id = fresh_scenario_id();
        expand::expand(
            &doc,
            params,
            &scenario_id,
            &self.config.service_names,
            Utc::now(),
        )
    }

    /// Expands `template_name` with `params` and publishes the resulting
    /// DAG. Returns the new scenario id.
    ///
    /// # Errors
    ///
    /// Expansion errors surface synchronously with nothing persisted;
    /// store errors during publication leave no visible scenario.
    pub async fn submit_scenario(
        &self,
        template_name: &str,
        params: &IndexMap<String, serde_json::Value>,
    ) -> Result<String, OrchestrateError> {
        let doc = self.registry.get(template_name)?;
        let scenario_id = fresh_scenario_id();
        let expansion = expand::expand(
            &doc,
            params,
            &scenario_id,
            &self.config.service_names,
            Utc::now(),
        )?;
        self.publisher.publish(&expansion).await?;
        Ok(scenario_id)
    }

    /// Claims the next ready task from `service`, long-polling up to the
    /// configured claim timeout.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn claim(&self, service: &str) -> Result<Option<String>, OrchestrateError> {
        self.dispatcher
            .claim(service, self.config.claim_timeout)
            .await
    }

    /// Claims with an explicit long-poll timeout.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn claim_with_timeout(
        &self,
        service: &str,
        timeout: Duration,
    ) -> Result<Option<String>, OrchestrateError> {
        self.dispatcher.claim(service, timeout).await
    }

    /// Reports success for a claimed task; runs consumer fan-out.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::succeed`].
    pub async fn succeed(
        &self,
        task_id: &str,
        result_ref: &str,
    ) -> Result<Vec<String>, OrchestrateError> {
        self.dispatcher.succeed(task_id, result_ref).await
    }

    /// Reports failure for a claimed task.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::fail`].
    pub async fn fail(
        &self,
        task_id: &str,
        error: &str,
    ) -> Result<Vec<String>, OrchestrateError> {
        self.dispatcher.fail(task_id, error).await
    }

    /// Fetches a task record.
    ///
    /// # Errors
    ///
    /// `UnknownTask` when absent.
    pub async fn get_task(&self, id: &str) -> Result<Task, OrchestrateError> {
        self.queries.get_task(id).await
    }

    /// Fetches a scenario with per-status counts and progress.
    ///
    /// # Errors
    ///
    /// `UnknownScenario` when absent.
    pub async fn get_scenario(&self, id: &str) -> Result<ScenarioStatus, OrchestrateError> {
        self.queries.get_scenario(id).await
    }

    /// Current depth of a service queue.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn queue_depth(&self, service: &str) -> Result<usize, OrchestrateError> {
        self.queries.queue_depth(service).await
    }

    /// All published scenario ids.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_scenarios(&self) -> Result<Vec<String>, OrchestrateError> {
        self.queries.list_scenarios().await
    }
}

/// Allocates a fresh scenario id. Random (v4), unlike task ids, which are
/// deterministic within the scenario's salted namespace.
fn fresh_scenario_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Tests
// ============================================================================
