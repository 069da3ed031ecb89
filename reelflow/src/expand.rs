//! Scenario expander
//!
//! Materializes a rendered template into concrete task records: applies
//! `count` multiplication, resolves identifier references to actual task
//! ids, rewrites fan-in/fan-out edges, computes initial pending-dependency
//! counts, and rejects cyclic graphs. Expansion is in-memory and purely
//! functional; nothing is persisted until the publisher runs.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use reelflow_core::template::CountSpec;
use reelflow_core::{
    OrchestrateError, Scenario, Task, TaskRef, TaskStatus, TemplateDoc, ValidationIssue,
};

use crate::template::{self, IdGen, RenderError};

/// Output of a successful expansion: the scenario record plus its fully
/// formed task list, in materialization order.
#[derive(Debug, Clone)]
pub struct Expansion {
    /// The umbrella scenario record.
    pub scenario: Scenario,
    /// All member tasks, edges rewritten and pending counts computed.
    pub tasks: Vec<Task>,
}

impl Expansion {
    /// Ids of tasks that are immediately eligible for dispatch.
    #[must_use]
    pub fn initially_ready(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.pending_count == 0)
            .map(|t| t.id.as_str())
            .collect()
    }
}

/// One materialized replica, before edge rewriting.
struct Materialized {
    id: String,
    template_index: usize,
    /// `(replica_index, count)` for multiplied tasks, 1-based.
    replica: Option<(usize, u32)>,
}

/// Expands `doc` with `params` into a concrete task DAG under a fresh
/// scenario id.
///
/// `services` is the recognised worker service enumeration; a rendered
/// task naming anything else fails validation. Pass an empty slice to
/// skip the check.
///
/// # Errors
///
/// Returns the structured expansion taxonomy: `InvalidTemplate`,
/// `CyclicTemplate`, `AmbiguousReference`, `DanglingReference`,
/// `IdCollision`.
pub fn expand(
    doc: &TemplateDoc,
    params: &IndexMap<String, serde_json::Value>,
    scenario_id: &str,
    services: &[String],
    now: DateTime<Utc>,
) -> Result<Expansion, OrchestrateError> {
    let mut ids = IdGen::new(scenario_id);
    let rendered = template::render_template(doc, params, &mut ids)?;

    check_services(&rendered, services)?;

    // Multiply count-bearing tasks and build the alias table:
    // template-level id -> materialized replica ids (empty for count = 0).
    let mut alias: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut materialized: Vec<Materialized> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut issues: Vec<ValidationIssue> = Vec::new();

    for (template_index, task) in rendered.tasks.iter().enumerate() {
        let count = match &task.count {
            None | Some(CountSpec::Literal(1)) => 1,
            Some(CountSpec::Literal(k)) => *k,
            Some(CountSpec::Expression(_)) => {
                // render_template reduces every expression to a literal
                issues.push(ValidationIssue::error(
                    format!("tasks[{template_index}].count"),
                    "count expression left unevaluated",
                ));
                continue;
            }
        };

        let replica_ids: Vec<String> = if count == 1 {
            vec![task.id.clone()]
        } else {
            let mut replicas = Vec::with_capacity(count as usize);
            for index in 1..=count as usize {
                replicas.push(replica_id(&mut ids, &task.id, index)?);
            }
            replicas
        };

        for (offset, id) in replica_ids.iter().enumerate() {
            if !seen_ids.insert(id.clone()) {
                issues.push(ValidationIssue::error(
                    format!("tasks[{template_index}].id"),
                    format!("duplicate task id '{id}'"),
                ));
                continue;
            }
            materialized.push(Materialized {
                id: id.clone(),
                template_index,
                replica: (count > 1).then_some((offset + 1, count)),
            });
        }

        alias.insert(task.id.clone(), replica_ids);
    }

    if !issues.is_empty() {
        return Err(OrchestrateError::InvalidTemplate {
            name: rendered.name.clone(),
            issues,
        });
    }

    // Rewrite references against the alias table.
    let mut input_refs_by_task: Vec<IndexMap<String, TaskRef>> =
        Vec::with_capacity(materialized.len());
    for m in &materialized {
        let task = &rendered.tasks[m.template_index];
        let mut rewritten = IndexMap::new();
        for (field, reference) in &task.inputs {
            let resolved = match reference {
                TaskRef::One(r) => {
                    TaskRef::One(resolve_scalar(&ids, &alias, &seen_ids, m, field, r)?)
                }
                TaskRef::Many(refs) => {
                    let mut out = Vec::new();
                    for r in refs {
                        out.extend(resolve_list(&alias, &seen_ids, m, field, r)?);
                    }
                    TaskRef::Many(out)
                }
            };
            rewritten.insert(field.clone(), resolved);
        }
        input_refs_by_task.push(rewritten);
    }

    // Compute edges: pending counts from distinct upstream sets, consumer
    // lists in materialization order.
    let mut consumers: HashMap<String, Vec<String>> = HashMap::new();
    let mut upstream_by_task: Vec<Vec<String>> = Vec::with_capacity(materialized.len());
    for (m, input_refs) in materialized.iter().zip(&input_refs_by_task) {
        let mut upstream: Vec<String> = Vec::new();
        for reference in input_refs.values() {
            for id in reference.ids() {
                if !upstream.iter().any(|u| u == id) {
                    upstream.push(id.to_string());
                }
            }
        }
        for u in &upstream {
            consumers.entry(u.clone()).or_default().push(m.id.clone());
        }
        upstream_by_task.push(upstream);
    }

    check_acyclic(&rendered.name, &materialized, &upstream_by_task, &consumers)?;

    // Assemble the final records.
    let mut tasks = Vec::with_capacity(materialized.len());
    for ((m, input_refs), upstream) in materialized
        .iter()
        .zip(input_refs_by_task)
        .zip(&upstream_by_task)
    {
        let task = &rendered.tasks[m.template_index];
        tasks.push(Task {
            id: m.id.clone(),
            scenario_id: scenario_id.to_string(),
            service: task.service.clone(),
            name: task.name.clone(),
            pending_count: u32::try_from(upstream.len()).unwrap_or(u32::MAX),
            status: TaskStatus::Pending,
            consumers: consumers.remove(&m.id).unwrap_or_default(),
            prompt: task.prompt.clone(),
            params: task.params.clone(),
            input_refs,
            result_ref: None,
            error: None,
            created_at: now,
            updated_at: now,
        });
    }

    let scenario = Scenario {
        scenario_id: scenario_id.to_string(),
        template_name: rendered.name.clone(),
        template_version: rendered.version.clone(),
        task_ids: tasks.iter().map(|t| t.id.clone()).collect(),
        created_at: now,
    };

    Ok(Expansion { scenario, tasks })
}

fn check_services(doc: &TemplateDoc, services: &[String]) -> Result<(), OrchestrateError> {
    if services.is_empty() {
        return Ok(());
    }
    let issues: Vec<ValidationIssue> = doc
        .tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| !services.contains(&t.service))
        .map(|(i, t)| {
            ValidationIssue::error(
                format!("tasks[{i}].service"),
                format!("unrecognised service '{}'", t.service),
            )
        })
        .collect();
    if issues.is_empty() {
        Ok(())
    } else {
        Err(OrchestrateError::InvalidTemplate {
            name: doc.name.clone(),
            issues,
        })
    }
}

/// Derives the id of the `index`-th replica of the template task with id
/// `base_id`. Generator-produced ids are indexed at the label level so the
/// written-out indexed form (`UUID('slide.2')`) resolves to the same id;
/// literal ids are suffixed directly.
fn replica_id(
    ids: &mut IdGen,
    base_id: &str,
    index: usize,
) -> Result<String, OrchestrateError> {
    if let Some(label) = ids.label_of(base_id).map(str::to_string) {
        ids.indexed(&label, index).map_err(|err| match err {
            RenderError::IdCollision { label, attempts } => {
                OrchestrateError::IdCollision { label, attempts }
            }
            RenderError::Expr(message) => OrchestrateError::InvalidTemplate {
                name: base_id.to_string(),
                issues: vec![ValidationIssue::error("id", message)],
            },
        })
    } else {
        Ok(format!("{base_id}.{index}"))
    }
}

fn resolve_scalar(
    ids: &IdGen,
    alias: &IndexMap<String, Vec<String>>,
    seen_ids: &HashSet<String>,
    m: &Materialized,
    field: &str,
    reference: &str,
) -> Result<String, OrchestrateError> {
    if let Some(replicas) = alias.get(reference) {
        match replicas.len() {
            0 => Err(dangling(m, field, reference)),
            1 => Ok(replicas[0].clone()),
            n => {
                if let Some((index, count)) = m.replica {
                    if count as usize == n {
                        return Ok(replicas[index - 1].clone());
                    }
                }
                Err(OrchestrateError::AmbiguousReference {
                    task: m.id.clone(),
                    field: field.to_string(),
                    label: ids.label_of(reference).unwrap_or(reference).to_string(),
                })
            }
        }
    } else if seen_ids.contains(reference) {
        // direct reference to a concrete replica id (indexed generator form)
        Ok(reference.to_string())
    } else {
        Err(dangling(m, field, reference))
    }
}

fn resolve_list(
    alias: &IndexMap<String, Vec<String>>,
    seen_ids: &HashSet<String>,
    m: &Materialized,
    field: &str,
    reference: &str,
) -> Result<Vec<String>, OrchestrateError> {
    if let Some(replicas) = alias.get(reference) {
        if replicas.is_empty() {
            return Err(dangling(m, field, reference));
        }
        Ok(replicas.clone())
    } else if seen_ids.contains(reference) {
        Ok(vec![reference.to_string()])
    } else {
        Err(dangling(m, field, reference))
    }
}

fn dangling(m: &Materialized, field: &str, reference: &str) -> OrchestrateError {
    OrchestrateError::DanglingReference {
        task: m.id.clone(),
        field: field.to_string(),
        reference: reference.to_string(),
    }
}

/// Kahn's algorithm over the rewritten edge set. Failure names the task
/// ids left unsorted, which always include the cycle.
fn check_acyclic(
    template_name: &str,
    materialized: &[Materialized],
    upstream_by_task: &[Vec<String>],
    consumers: &HashMap<String, Vec<String>>,
) -> Result<(), OrchestrateError> {
    let mut indegree: HashMap<String, usize> = materialized
        .iter()
        .zip(upstream_by_task)
        .map(|(m, upstream)| (m.id.clone(), upstream.len()))
        .collect();

    let mut ready: VecDeque<String> = materialized
        .iter()
        .filter(|m| indegree[&m.id] == 0)
        .map(|m| m.id.clone())
        .collect();

    let mut sorted = 0usize;
    while let Some(id) = ready.pop_front() {
        sorted += 1;
        if let Some(downstream) = consumers.get(&id) {
            for consumer in downstream {
                if let Some(degree) = indegree.get_mut(consumer) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(consumer.clone());
                    }
                }
            }
        }
    }

    if sorted == materialized.len() {
        Ok(())
    } else {
        let remaining = materialized
            .iter()
            .filter(|m| indegree.get(&m.id).copied().unwrap_or_default() > 0)
            .map(|m| m.id.clone())
            .collect();
        Err(OrchestrateError::CyclicTemplate {
            name: template_name.to_string(),
            remaining,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
