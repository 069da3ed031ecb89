//! Property tests: quantified invariants over randomly generated DAG
//! templates, checked at every step of a full drive to completion.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use proptest::prelude::*;
use reelflow::config::OrchestratorConfig;
use reelflow::observability::events::EventEmitter;
use reelflow::orchestrator::Orchestrator;
use reelflow::registry::TemplateRegistry;
use reelflow::store::{MemoryStore, Store, keys};
use reelflow_core::{Task, TaskRef, TaskStatus, TemplateDoc, TaskTemplate};

const SERVICES: [&str; 4] = [
    "text-service",
    "voice-service",
    "image-service",
    "video-service",
];

const CLAIM: Duration = Duration::from_millis(10);

/// Builds a random DAG template: task `i` may depend on any subset of the
/// earlier tasks, selected by the bits of `edge_seeds[i]`.
fn dag_doc(task_count: usize, edge_seeds: &[u64]) -> TemplateDoc {
    let mut tasks = Vec::with_capacity(task_count);
    for i in 0..task_count {
        let mut inputs = IndexMap::new();
        for j in 0..i {
            if edge_seeds[i] & (1 << j) != 0 {
                inputs.insert(
                    format!("dep_{j}"),
                    TaskRef::One(format!("{{{{ UUID('t{j}') }}}}")),
                );
            }
        }
        tasks.push(TaskTemplate {
            id: format!("{{{{ UUID('t{i}') }}}}"),
            service: SERVICES[i % SERVICES.len()].to_string(),
            name: format!("Step{i}"),
            prompt: None,
            params: serde_json::Value::Null,
            inputs,
            count: None,
        });
    }
    TemplateDoc {
        name: "random-dag".to_string(),
        version: None,
        description: None,
        variables: IndexMap::new(),
        tasks,
    }
}

fn orchestrator_for(doc: TemplateDoc) -> (Arc<dyn Store>, Orchestrator) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut registry = TemplateRegistry::new();
    registry.register(doc);
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        registry,
        OrchestratorConfig::default(),
        Arc::new(EventEmitter::noop()),
    );
    (store, orchestrator)
}

/// Checks invariants 1-5 over the current store state.
async fn assert_invariants(store: &Arc<dyn Store>, orchestrator: &Orchestrator, scenario_id: &str) {
    let summary = orchestrator.get_scenario(scenario_id).await.unwrap();
    let scenario = summary.scenario;

    // 1. the status buckets partition the member set
    assert_eq!(summary.counts.total(), scenario.task_ids.len());

    let mut tasks: Vec<Task> = Vec::new();
    for id in &scenario.task_ids {
        tasks.push(orchestrator.get_task(id).await.unwrap());
    }

    let status_of = |id: &str| {
        tasks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.status)
            .expect("upstream id belongs to the scenario")
    };

    for task in &tasks {
        // 2. queued implies no unmet dependencies
        if task.status == TaskStatus::Queued {
            assert_eq!(task.pending_count, 0, "queued task {} has debt", task.id);
        }

        // 3. the stored pending count equals the recomputed one
        let unmet = task
            .upstream_ids()
            .into_iter()
            .filter(|&u| status_of(u) != TaskStatus::Success)
            .count();
        assert_eq!(
            task.pending_count as usize, unmet,
            "pending count of {} drifted from its upstream set",
            task.id
        );

        // 4. a successful task is no longer counted by any consumer
        if task.status == TaskStatus::Success {
            for consumer in &task.consumers {
                let consumer_task = tasks.iter().find(|t| &t.id == consumer).unwrap();
                let recount = consumer_task
                    .upstream_ids()
                    .into_iter()
                    .filter(|&u| status_of(u) != TaskStatus::Success)
                    .count();
                assert_eq!(consumer_task.pending_count as usize, recount);
            }
        }
    }

    // 5. no id appears on more than one queue, or twice on one queue
    let mut seen: HashSet<String> = HashSet::new();
    for service in SERVICES {
        for id in store.list_range(&keys::queue(service)).await.unwrap() {
            assert!(seen.insert(id.clone()), "{id} queued more than once");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn random_dags_preserve_invariants_through_a_full_drive(
        task_count in 2usize..8,
        edge_seeds in prop::collection::vec(any::<u64>(), 8),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let doc = dag_doc(task_count, &edge_seeds);
            let (store, orchestrator) = orchestrator_for(doc);
            let scenario_id = orchestrator
                .submit_scenario("random-dag", &IndexMap::new())
                .await
                .unwrap();

            assert_invariants(&store, &orchestrator, &scenario_id).await;

            // drive to completion, re-checking after every transition
            loop {
                let mut progressed = false;
                for service in SERVICES {
                    while let Some(id) =
                        orchestrator.claim_with_timeout(service, CLAIM).await.unwrap()
                    {
                        progressed = true;
                        assert_invariants(&store, &orchestrator, &scenario_id).await;
                        orchestrator.succeed(&id, "out/artefact").await.unwrap();
                        assert_invariants(&store, &orchestrator, &scenario_id).await;
                    }
                }
                if !progressed {
                    break;
                }
            }

            let status = orchestrator.get_scenario(&scenario_id).await.unwrap();
            prop_assert_eq!(status.counts.success, status.counts.total());
            Ok(())
        })?;
    }

    #[test]
    fn short_video_scales_with_the_slides_parameter(slides in 1u32..6) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let h = common::harness(&[]);
            let mut params = IndexMap::new();
            params.insert("slides".to_string(), serde_json::json!(slides));
            let scenario_id = h
                .orchestrator
                .submit_scenario("short-video", &params)
                .await
                .unwrap();

            let status = h.orchestrator.get_scenario(&scenario_id).await.unwrap();
            prop_assert_eq!(status.counts.total() as u32, 2 * slides + 3);
            prop_assert_eq!(status.counts.queued, 1);

            // the final assembly waits on every slide plus the voice track
            let video_id = status.scenario.task_ids.last().unwrap().clone();
            let video = h.orchestrator.get_task(&video_id).await.unwrap();
            prop_assert_eq!(video.pending_count, slides + 1);
            Ok(())
        })?;
    }

    #[test]
    fn expansion_ids_are_stable_per_scenario_and_disjoint_across(
        task_count in 2usize..6,
        edge_seeds in prop::collection::vec(any::<u64>(), 6),
    ) {
        let doc = dag_doc(task_count, &edge_seeds);
        let services: Vec<String> = SERVICES.iter().map(ToString::to_string).collect();
        let now = chrono::Utc::now();

        let first =
            reelflow::expand::expand(&doc, &IndexMap::new(), "sc-a", &services, now).unwrap();
        let again =
            reelflow::expand::expand(&doc, &IndexMap::new(), "sc-a", &services, now).unwrap();
        let other =
            reelflow::expand::expand(&doc, &IndexMap::new(), "sc-b", &services, now).unwrap();

        prop_assert_eq!(&first.scenario.task_ids, &again.scenario.task_ids);
        let other_ids: HashSet<&String> = other.scenario.task_ids.iter().collect();
        prop_assert!(first.scenario.task_ids.iter().all(|id| !other_ids.contains(id)));
    }
}
