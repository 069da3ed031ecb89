//! Scenario template document schema
//!
//! Templates are YAML documents with three top-level sections: `name`,
//! `variables` (caller-overridable defaults), and `tasks` (ordered task
//! templates). String fields may carry `{{ EXPR }}` placeholders, which the
//! template engine substitutes before expansion.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Severity, ValidationIssue};
use crate::task::TaskRef;

// ============================================================================
// Document
// ============================================================================

/// A parsed scenario template document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateDoc {
    /// Template name (registry key).
    pub name: String,

    /// Template version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Variable defaults; caller parameters override these.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, serde_json::Value>,

    /// Ordered task templates.
    pub tasks: Vec<TaskTemplate>,
}

/// A single task template within a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskTemplate {
    /// Task identifier; conventionally an identifier-generator placeholder
    /// such as `{{ UUID('text') }}`.
    pub id: String,

    /// Worker service that executes the task.
    pub service: String,

    /// Operation kind within the service.
    pub name: String,

    /// Free-form input string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Service-specific parameters; opaque to the orchestrator.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,

    /// Named upstream references. Scalar values must resolve to a single
    /// task; list values expand to the referenced label's full replica set.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: IndexMap<String, TaskRef>,

    /// Replica multiplier; `k` replaces this template with `k` indexed
    /// copies. Accepts an integer or an integer-valued expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<CountSpec>,
}

/// Replica count: a literal integer or a `{{ EXPR }}` string evaluating to
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CountSpec {
    /// Literal count.
    Literal(u32),
    /// Expression to be evaluated by the template engine.
    Expression(String),
}

impl TemplateDoc {
    /// Parses a template document from YAML source.
    ///
    /// # Errors
    ///
    /// Returns the underlying YAML error on malformed input; callers map it
    /// to the invalid-template taxonomy with their own naming context.
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    /// Structural validation that needs no substitution: non-empty name,
    /// at least one task, required task fields present, parameter defaults
    /// limited to scalars.
    #[must_use]
    pub fn check_structure(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.name.trim().is_empty() {
            issues.push(ValidationIssue::error("name", "template name is empty"));
        }
        if self.tasks.is_empty() {
            issues.push(ValidationIssue::error("tasks", "no tasks defined"));
        }

        for (name, value) in &self.variables {
            if value.is_object() || value.is_array() {
                issues.push(ValidationIssue::error(
                    format!("variables.{name}"),
                    "variable defaults must be scalars",
                ));
            }
        }

        for (index, task) in self.tasks.iter().enumerate() {
            if task.id.trim().is_empty() {
                issues.push(ValidationIssue::error(
                    format!("tasks[{index}].id"),
                    "task id is empty",
                ));
            }
            if task.service.trim().is_empty() {
                issues.push(ValidationIssue::error(
                    format!("tasks[{index}].service"),
                    "service is empty",
                ));
            }
            if task.name.trim().is_empty() {
                issues.push(ValidationIssue::error(
                    format!("tasks[{index}].name"),
                    "task name is empty",
                ));
            }
        }

        issues
    }

    /// Whether any issue in `issues` is error severity.
    #[must_use]
    pub fn has_errors(issues: &[ValidationIssue]) -> bool {
        issues.iter().any(|i| i.severity == Severity::Error)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = r#"
name: narrated-post
version: "1"
variables:
  model: small-writer
tasks:
  - id: "{{ UUID('text') }}"
    service: text-service
    name: CreateText
    prompt: "{{ topic }}"
    params:
      model: "{{ model }}"
  - id: "{{ UUID('voice') }}"
    service: voice-service
    name: CreateVoice
    inputs:
      text_task_id: "{{ UUID('text') }}"
"#;

    #[test]
    fn parses_linear_chain() {
        let doc = TemplateDoc::from_yaml(CHAIN).unwrap();
        assert_eq!(doc.name, "narrated-post");
        assert_eq!(doc.version.as_deref(), Some("1"));
        assert_eq!(doc.tasks.len(), 2);
        assert_eq!(doc.tasks[1].service, "voice-service");
        assert!(matches!(
            doc.tasks[1].inputs.get("text_task_id"),
            Some(TaskRef::One(_))
        ));
    }

    #[test]
    fn parses_count_forms() {
        let yaml = r#"
name: fan
tasks:
  - id: "{{ UUID('a') }}"
    service: text-service
    name: A
    count: 3
  - id: "{{ UUID('b') }}"
    service: text-service
    name: B
    count: "{{ slides }}"
"#;
        let doc = TemplateDoc::from_yaml(yaml).unwrap();
        assert_eq!(doc.tasks[0].count, Some(CountSpec::Literal(3)));
        assert_eq!(
            doc.tasks[1].count,
            Some(CountSpec::Expression("{{ slides }}".to_string()))
        );
    }

    #[test]
    fn parses_list_inputs() {
        let yaml = r#"
name: fan-in
tasks:
  - id: "{{ UUID('video') }}"
    service: video-service
    name: CreateVideo
    inputs:
      slide_ids: ["{{ UUID('slide') }}"]
      voice_track_id: "{{ UUID('voice') }}"
"#;
        let doc = TemplateDoc::from_yaml(yaml).unwrap();
        let inputs = &doc.tasks[0].inputs;
        assert!(matches!(inputs.get("slide_ids"), Some(TaskRef::Many(v)) if v.len() == 1));
        assert!(matches!(inputs.get("voice_track_id"), Some(TaskRef::One(_))));
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        let yaml = "name: x\nqueues: []\ntasks: []\n";
        assert!(TemplateDoc::from_yaml(yaml).is_err());
    }

    #[test]
    fn structure_check_flags_empty_sections() {
        let doc = TemplateDoc::from_yaml("name: \"\"\ntasks: []\n").unwrap();
        let issues = doc.check_structure();
        assert!(TemplateDoc::has_errors(&issues));
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn structure_check_flags_structured_variable_default() {
        let yaml = r#"
name: x
variables:
  style: {tone: upbeat}
tasks:
  - id: "{{ UUID('a') }}"
    service: text-service
    name: A
"#;
        let doc = TemplateDoc::from_yaml(yaml).unwrap();
        let issues = doc.check_structure();
        assert!(issues.iter().any(|i| i.path == "variables.style"));
    }

    #[test]
    fn structure_check_accepts_valid_doc() {
        let doc = TemplateDoc::from_yaml(CHAIN).unwrap();
        assert!(doc.check_structure().is_empty());
    }
}
