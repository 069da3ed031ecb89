//! Scenario-scoped identifier generation
//!
//! `UUID(label)` and `SHORT_UUID(label)` resolve to stable ids derived from
//! a scenario-salted UUIDv5 namespace: the same label yields the same id
//! within one expansion, and different scenarios never share ids. The
//! indexed form `label.N` names the N-th replica of a multiplied task.

use std::collections::HashMap;

use indexmap::IndexMap;
use uuid::Uuid;

use super::RenderError;

/// How many salted variants are tried before giving up on a label.
const MAX_ATTEMPTS: u32 = 3;

/// Length of the compact id form produced by `SHORT_UUID`.
const SHORT_LEN: usize = 12;

#[derive(Debug, Clone)]
struct Allocation {
    id: String,
    short: bool,
}

/// Deterministic per-scenario id allocator.
///
/// Allocation is memoized: repeated requests for a label return the first
/// assigned id, and the first generator form (full or short) used for a
/// label wins. A hash collision between distinct labels retries with a
/// salted label variant; persistent collision is an error.
#[derive(Debug)]
pub struct IdGen {
    namespace: Uuid,
    assigned: IndexMap<String, Allocation>,
    owners: HashMap<String, String>,
}

impl IdGen {
    /// Creates an allocator scoped to `scenario_salt` (the scenario id).
    #[must_use]
    pub fn new(scenario_salt: &str) -> Self {
        Self {
            namespace: Uuid::new_v5(&Uuid::NAMESPACE_OID, scenario_salt.as_bytes()),
            assigned: IndexMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Returns the scenario-scoped id for `label` (full form).
    ///
    /// # Errors
    ///
    /// Returns a collision error if salted retries are exhausted.
    pub fn full(&mut self, label: &str) -> Result<String, RenderError> {
        self.alloc(label, false)
    }

    /// Returns the scenario-scoped id for `label`, truncated to a compact
    /// representation.
    ///
    /// # Errors
    ///
    /// Returns a collision error if salted retries are exhausted.
    pub fn short(&mut self, label: &str) -> Result<String, RenderError> {
        self.alloc(label, true)
    }

    /// Returns the id for the `index`-th replica of `label`, in the same
    /// form (full or short) the base label was allocated with.
    ///
    /// # Errors
    ///
    /// Returns a collision error if salted retries are exhausted.
    pub fn indexed(&mut self, label: &str, index: usize) -> Result<String, RenderError> {
        let short = self
            .assigned
            .get(label)
            .is_some_and(|allocation| allocation.short);
        self.alloc(&format!("{label}.{index}"), short)
    }

    /// The label that produced `id`, if this allocator produced it.
    #[must_use]
    pub fn label_of(&self, id: &str) -> Option<&str> {
        self.owners.get(id).map(String::as_str)
    }

    fn alloc(&mut self, label: &str, short: bool) -> Result<String, RenderError> {
        if let Some(existing) = self.assigned.get(label) {
            return Ok(existing.id.clone());
        }

        for attempt in 0..MAX_ATTEMPTS {
            let candidate_label = if attempt == 0 {
                label.to_string()
            } else {
                format!("{label}#{attempt}")
            };
            let id = self.derive(&candidate_label, short);
            if self.owners.contains_key(&id) {
                continue;
            }
            self.owners.insert(id.clone(), label.to_string());
            self.assigned
                .insert(label.to_string(), Allocation { id: id.clone(), short });
            return Ok(id);
        }

        Err(RenderError::IdCollision {
            label: label.to_string(),
            attempts: MAX_ATTEMPTS,
        })
    }

    fn derive(&self, label: &str, short: bool) -> String {
        let raw = Uuid::new_v5(&self.namespace, label.as_bytes());
        if short {
            raw.simple().to_string()[..SHORT_LEN].to_string()
        } else {
            raw.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_label_same_id() {
        let mut r#gen = IdGen::new("sc-1");
        let a = r#gen.full("text").unwrap();
        let b = r#gen.full("text").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_labels_differ() {
        let mut r#gen = IdGen::new("sc-1");
        assert_ne!(r#gen.full("text").unwrap(), r#gen.full("voice").unwrap());
    }

    #[test]
    fn deterministic_across_allocators_with_same_salt() {
        let mut first = IdGen::new("sc-1");
        let mut second = IdGen::new("sc-1");
        assert_eq!(first.full("text").unwrap(), second.full("text").unwrap());
        assert_eq!(
            first.indexed("slide", 2).unwrap(),
            second.indexed("slide", 2).unwrap()
        );
    }

    #[test]
    fn distinct_scenarios_do_not_share_ids() {
        let mut first = IdGen::new("sc-1");
        let mut second = IdGen::new("sc-2");
        assert_ne!(first.full("text").unwrap(), second.full("text").unwrap());
    }

    #[test]
    fn short_form_is_compact() {
        let mut r#gen = IdGen::new("sc-1");
        let id = r#gen.short("text").unwrap();
        assert_eq!(id.len(), SHORT_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn indexed_follows_base_form() {
        let mut r#gen = IdGen::new("sc-1");
        r#gen.short("slide").unwrap();
        let replica = r#gen.indexed("slide", 1).unwrap();
        assert_eq!(replica.len(), SHORT_LEN);

        let mut r#gen = IdGen::new("sc-1");
        r#gen.full("slide").unwrap();
        let replica = r#gen.indexed("slide", 1).unwrap();
        assert_eq!(replica.len(), 36);
    }

    #[test]
    fn indexed_replicas_are_distinct() {
        let mut r#gen = IdGen::new("sc-1");
        let base = r#gen.full("slide").unwrap();
        let one = r#gen.indexed("slide", 1).unwrap();
        let two = r#gen.indexed("slide", 2).unwrap();
        assert_ne!(base, one);
        assert_ne!(one, two);
    }

    #[test]
    fn label_of_reverses_allocation() {
        let mut r#gen = IdGen::new("sc-1");
        let id = r#gen.full("text").unwrap();
        assert_eq!(r#gen.label_of(&id), Some("text"));
        assert_eq!(r#gen.label_of("unknown"), None);
    }

    #[test]
    fn first_form_wins_for_mixed_requests() {
        let mut r#gen = IdGen::new("sc-1");
        let short = r#gen.short("text").unwrap();
        let again = r#gen.full("text").unwrap();
        assert_eq!(short, again);
    }
}
