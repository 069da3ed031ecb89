//! Template engine
//!
//! Performs single-pass `{{ EXPR }}` substitution over every string field
//! of a template document before expansion. Substitution is purely
//! functional: the same (template, parameters, scenario salt) triple always
//! renders the same document. Substituted output is never re-interpolated.

pub mod expr;
pub mod ids;

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use reelflow_core::template::CountSpec;
use reelflow_core::{OrchestrateError, TaskRef, TemplateDoc, ValidationIssue};
use thiserror::Error;

pub use expr::Value;
pub use ids::IdGen;

/// Regex matching `{{ ... }}` placeholders.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("valid regex"));

/// Failure inside the template engine, attributed to a field path by the
/// caller.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Expression syntax or evaluation failure.
    #[error("{0}")]
    Expr(String),

    /// The id generator exhausted its salted retries.
    #[error("identifier collision for label '{label}'")]
    IdCollision {
        /// The colliding label.
        label: String,
        /// Retry attempts made.
        attempts: u32,
    },
}

/// Returns `true` if the string contains any `{{ ... }}` placeholders.
#[must_use]
pub fn has_placeholders(s: &str) -> bool {
    PLACEHOLDER_RE.is_match(s)
}

/// Resolves all placeholders in one string.
///
/// # Errors
///
/// Fails on the first unresolvable placeholder; partial output is never
/// returned.
pub fn render_str(
    input: &str,
    variables: &IndexMap<String, serde_json::Value>,
    ids: &mut IdGen,
) -> Result<String, RenderError> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    for captures in PLACEHOLDER_RE.captures_iter(input) {
        let whole = captures.get(0).expect("match always has group 0");
        output.push_str(&input[last..whole.start()]);
        let value = expr::eval(captures[1].trim(), variables, ids)?;
        output.push_str(&value.to_string());
        last = whole.end();
    }
    output.push_str(&input[last..]);
    Ok(output)
}

/// Merges caller parameters over template variable defaults.
///
/// Unknown parameter names are reported as issues rather than silently
/// accepted, so typos surface at submission time.
fn merge_variables(
    doc: &TemplateDoc,
    params: &IndexMap<String, serde_json::Value>,
    issues: &mut Vec<ValidationIssue>,
) -> IndexMap<String, serde_json::Value> {
    let mut variables = doc.variables.clone();
    for (name, value) in params {
        if variables.contains_key(name) {
            variables.insert(name.clone(), value.clone());
        } else {
            issues.push(ValidationIssue::error(
                format!("variables.{name}"),
                "parameter does not match any template variable",
            ));
        }
    }
    variables
}

/// Renders a whole template document: every string field substituted and
/// every `count` expression evaluated to a literal.
///
/// # Errors
///
/// Returns [`OrchestrateError::InvalidTemplate`] carrying all collected
/// issues, or [`OrchestrateError::IdCollision`] when the id generator
/// fails hard.
pub fn render_template(
    doc: &TemplateDoc,
    params: &IndexMap<String, serde_json::Value>,
    ids: &mut IdGen,
) -> Result<TemplateDoc, OrchestrateError> {
    let mut issues = doc.check_structure();
    let variables = merge_variables(doc, params, &mut issues);

    let mut rendered_tasks = Vec::with_capacity(doc.tasks.len());
    for (index, task) in doc.tasks.iter().enumerate() {
        let path = |field: &str| format!("tasks[{index}].{field}");

        let id = resolve_field(&task.id, &variables, ids, &path("id"), &mut issues)?;
        let service =
            resolve_field(&task.service, &variables, ids, &path("service"), &mut issues)?;
        let name = resolve_field(&task.name, &variables, ids, &path("name"), &mut issues)?;
        let prompt = match &task.prompt {
            Some(p) => Some(resolve_field(p, &variables, ids, &path("prompt"), &mut issues)?),
            None => None,
        };

        let mut inputs = IndexMap::new();
        for (field, reference) in &task.inputs {
            let field_path = path(&format!("inputs.{field}"));
            let rendered = match reference {
                TaskRef::One(r) => {
                    TaskRef::One(resolve_field(r, &variables, ids, &field_path, &mut issues)?)
                }
                TaskRef::Many(refs) => {
                    let mut out = Vec::with_capacity(refs.len());
                    for r in refs {
                        out.push(resolve_field(r, &variables, ids, &field_path, &mut issues)?);
                    }
                    TaskRef::Many(out)
                }
            };
            inputs.insert(field.clone(), rendered);
        }

        let params_value =
            render_json(&task.params, &variables, ids, &path("params"), &mut issues)?;

        let count = match &task.count {
            None => None,
            Some(CountSpec::Literal(k)) => Some(CountSpec::Literal(*k)),
            Some(CountSpec::Expression(expression)) => {
                let rendered =
                    resolve_field(expression, &variables, ids, &path("count"), &mut issues)?;
                match rendered.trim().parse::<u32>() {
                    Ok(k) => Some(CountSpec::Literal(k)),
                    Err(_) => {
                        issues.push(ValidationIssue::error(
                            path("count"),
                            format!("'{rendered}' is not a non-negative integer"),
                        ));
                        None
                    }
                }
            }
        };

        rendered_tasks.push(reelflow_core::TaskTemplate {
            id,
            service,
            name,
            prompt,
            params: params_value,
            inputs,
            count,
        });
    }

    if TemplateDoc::has_errors(&issues) {
        return Err(OrchestrateError::InvalidTemplate {
            name: doc.name.clone(),
            issues,
        });
    }

    Ok(TemplateDoc {
        name: doc.name.clone(),
        version: doc.version.clone(),
        description: doc.description.clone(),
        variables,
        tasks: rendered_tasks,
    })
}

/// Renders one string field, downgrading expression failures to issues so
/// the whole document is reported in one pass. Collisions abort.
fn resolve_field(
    input: &str,
    variables: &IndexMap<String, serde_json::Value>,
    ids: &mut IdGen,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Result<String, OrchestrateError> {
    match render_str(input, variables, ids) {
        Ok(rendered) => Ok(rendered),
        Err(RenderError::Expr(message)) => {
            issues.push(ValidationIssue::error(path, message));
            Ok(input.to_string())
        }
        Err(RenderError::IdCollision { label, attempts }) => {
            Err(OrchestrateError::IdCollision { label, attempts })
        }
    }
}

/// Recursively renders string leaves of a JSON value (`params`).
fn render_json(
    value: &serde_json::Value,
    variables: &IndexMap<String, serde_json::Value>,
    ids: &mut IdGen,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Result<serde_json::Value, OrchestrateError> {
    use serde_json::Value as Json;
    Ok(match value {
        Json::String(s) => Json::String(resolve_field(s, variables, ids, path, issues)?),
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(render_json(
                    item,
                    variables,
                    ids,
                    &format!("{path}[{i}]"),
                    issues,
                )?);
            }
            Json::Array(out)
        }
        Json::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(
                    k.clone(),
                    render_json(v, variables, ids, &format!("{path}.{k}"), issues)?,
                );
            }
            Json::Object(out)
        }
        other => other.clone(),
    })
}

// ============================================================================
// Tests
// ============================================================================
