//! Template registry
//!
//! Named scenario templates resolve here: built-in templates embedded in
//! the binary at compile time, optionally overlaid with templates loaded
//! from a library directory. Lookup failures carry a closest-name
//! suggestion for typo correction.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use reelflow_core::{OrchestrateError, TemplateDoc};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Maximum Damerau-Levenshtein distance for a name suggestion.
const SUGGESTION_DISTANCE: usize = 3;

/// A built-in template embedded in the binary.
pub struct BuiltinTemplate {
    /// Registry key.
    pub name: &'static str,
    /// Short human-readable description.
    pub description: &'static str,
    /// Raw YAML content (embedded at compile time).
    pub yaml: &'static str,
}

/// All built-in templates, in display order.
pub const BUILTIN_TEMPLATES: &[BuiltinTemplate] = &[
    BuiltinTemplate {
        name: "short-video",
        description: "Narrated slideshow short assembled from generated slides and a voice-over",
        yaml: include_str!("../templates/short-video.yaml"),
    },
    BuiltinTemplate {
        name: "narrated-post",
        description: "Short text post with a narrated voice track",
        yaml: include_str!("../templates/narrated-post.yaml"),
    },
];

/// Registry of parsed template documents, keyed by template name.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, Arc<TemplateDoc>>,
}

impl TemplateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with the built-in templates.
    ///
    /// # Errors
    ///
    /// Fails if an embedded template does not parse; that is a packaging
    /// defect, surfaced rather than hidden.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        for builtin in BUILTIN_TEMPLATES {
            let doc = TemplateDoc::from_yaml(builtin.yaml)?;
            registry.register(doc);
        }
        Ok(registry)
    }

    /// Registers a parsed document under its own name. Re-registering a
    /// name replaces the previous document (directory templates shadow
    /// built-ins this way).
    pub fn register(&mut self, doc: TemplateDoc) {
        if self.templates.contains_key(&doc.name) {
            warn!(template = %doc.name, "template shadows an earlier registration");
        }
        self.templates.insert(doc.name.clone(), Arc::new(doc));
    }

    /// Loads every `*.yaml` / `*.yml` file in `dir`, in file-name order.
    /// Returns how many templates were registered.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files or YAML that does not parse.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let source = std::fs::read_to_string(&path)?;
            let doc = TemplateDoc::from_yaml(&source).map_err(Error::Yaml)?;
            debug!(template = %doc.name, path = %path.display(), "loaded template");
            self.register(doc);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Looks up a template by name.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrateError::UnknownTemplate`] with a typo
    /// suggestion when nothing is registered under `name`.
    pub fn get(&self, name: &str) -> std::result::Result<Arc<TemplateDoc>, OrchestrateError> {
        self.templates.get(name).cloned().ok_or_else(|| {
            OrchestrateError::UnknownTemplate {
                name: name.to_string(),
                suggestion: self.suggest(name),
            }
        })
    }

    /// All registered template names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// All registered documents, in registration order.
    #[must_use]
    pub fn templates(&self) -> Vec<Arc<TemplateDoc>> {
        self.templates.values().cloned().collect()
    }

    /// Suggests the closest registered name within edit distance.
    #[must_use]
    pub fn suggest(&self, input: &str) -> Option<String> {
        self.templates
            .keys()
            .map(|name| (name, strsim::damerau_levenshtein(input, name)))
            .filter(|(_, dist)| *dist <= SUGGESTION_DISTANCE)
            .min_by_key(|(_, dist)| *dist)
            .map(|(name, _)| name.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    #[test]
    fn all_builtin_templates_parse_and_validate() {
        for builtin in BUILTIN_TEMPLATES {
            let doc = TemplateDoc::from_yaml(builtin.yaml).unwrap_or_else(|e| {
                panic!("built-in template '{}' failed to parse: {e}", builtin.name)
            });
            assert_eq!(doc.name, builtin.name, "embedded name mismatch");
            let issues = doc.check_structure();
            assert!(
                issues.is_empty(),
                "built-in template '{}' has issues: {issues:?}",
                builtin.name
            );
        }
    }

    #[test]
    fn no_duplicate_builtin_names() {
        let names: Vec<&str> = BUILTIN_TEMPLATES.iter().map(|b| b.name).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len());
    }

    #[test]
    fn builtin_metadata_populated() {
        for builtin in BUILTIN_TEMPLATES {
            assert!(!builtin.name.is_empty());
            assert!(!builtin.description.is_empty());
            assert!(!builtin.yaml.is_empty());
        }
    }

    #[test]
    fn with_builtins_registers_everything() {
        let registry = TemplateRegistry::with_builtins().unwrap();
        assert_eq!(registry.names().len(), BUILTIN_TEMPLATES.len());
        assert!(registry.get("short-video").is_ok());
        assert!(registry.get("narrated-post").is_ok());
    }

    #[test]
    fn unknown_template_suggests_close_name() {
        let registry = TemplateRegistry::with_builtins().unwrap();
        let err = registry.get("shrot-video").unwrap_err();
        match err {
            OrchestrateError::UnknownTemplate { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("short-video"));
            }
            other => panic!("expected UnknownTemplate, got {other}"),
        }
    }

    #[test]
    fn unknown_template_far_from_everything_has_no_suggestion() {
        let registry = TemplateRegistry::with_builtins().unwrap();
        let err = registry.get("xyzzy-quux-12345").unwrap_err();
        match err {
            OrchestrateError::UnknownTemplate { suggestion, .. } => {
                assert_eq!(suggestion, None);
            }
            other => panic!("expected UnknownTemplate, got {other}"),
        }
    }

    #[test]
    fn directory_templates_shadow_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narrated-post.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            concat!(
                "name: narrated-post\n",
                "version: \"2\"\n",
                "tasks:\n",
                "  - id: \"{{{{ UUID('text') }}}}\"\n",
                "    service: text-service\n",
                "    name: CreateText\n",
            )
        )
        .unwrap();

        let mut registry = TemplateRegistry::with_builtins().unwrap();
        let loaded = registry.load_dir(dir.path()).unwrap();
        assert_eq!(loaded, 1);
        let doc = registry.get("narrated-post").unwrap();
        assert_eq!(doc.version.as_deref(), Some("2"));
        // registry size unchanged: same name replaced
        assert_eq!(registry.names().len(), BUILTIN_TEMPLATES.len());
    }

    #[test]
    fn load_dir_ignores_non_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a template").unwrap();
        let mut registry = TemplateRegistry::new();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 0);
    }

    #[test]
    fn load_dir_surfaces_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "tasks: {not: [valid").unwrap();
        let mut registry = TemplateRegistry::new();
        assert!(registry.load_dir(dir.path()).is_err());
    }
}
