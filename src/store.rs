//! Shared tag state.
//!
//! The tag store is the single source of truth for both inbound measurements
//! and outbound command state. One mutex guards the whole map: a batched
//! acquisition update becomes visible all-or-nothing, so no reader ever
//! observes a mix of a previous and a current acquisition cycle.
//!
//! The lock is held only for the duration of a batched update or a snapshot
//! copy, never across I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use crate::core::error::{BridgeError, Result};
use crate::core::tag::{TagKind, TagValue};

/// Outcome of a command-path multi-tag write.
///
/// Multi-tag writes are not atomic: pairs apply in presented order and the
/// first unknown tag (or unparseable value) aborts the remainder, while
/// earlier pairs stay applied. Downstream consumers may depend on the
/// partial application, so it is preserved exactly.
#[derive(Debug)]
pub struct WriteOutcome {
    /// Pairs that were applied, in application order.
    pub applied: Vec<(String, TagValue)>,

    /// The error that aborted the write, if any.
    pub error: Option<BridgeError>,
}

impl WriteOutcome {
    /// Check whether every presented pair was applied.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Locked, in-memory mapping from tag name to typed value.
///
/// One store exists per acquisition node. Tags are declared from
/// configuration at startup (Modbus registers, write-back state) or minted
/// dynamically once a device schema resolves (synchrophasor channels). A
/// tag's kind never changes after first assignment.
#[derive(Debug, Default)]
pub struct TagStore {
    tags: Mutex<HashMap<String, TagValue>>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a tag with a seed value. Existing tags keep their value.
    pub fn declare(&self, name: impl Into<String>, value: TagValue) {
        let mut tags = self.tags.lock().expect("tag store poisoned");
        tags.entry(name.into()).or_insert(value);
    }

    /// Number of known tags.
    pub fn len(&self) -> usize {
        self.tags.lock().expect("tag store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether a tag exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tags
            .lock()
            .expect("tag store poisoned")
            .contains_key(name)
    }

    /// Read one tag.
    pub fn get(&self, name: &str) -> Option<TagValue> {
        self.tags
            .lock()
            .expect("tag store poisoned")
            .get(name)
            .copied()
    }

    /// All known tag names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tags
            .lock()
            .expect("tag store poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Copy of the full state, sorted by name.
    ///
    /// The lock is released before the caller serializes or transmits the
    /// snapshot.
    pub fn snapshot(&self) -> Vec<(String, TagValue)> {
        let mut entries: Vec<(String, TagValue)> = self
            .tags
            .lock()
            .expect("tag store poisoned")
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Apply a whole acquisition batch under one lock hold.
    ///
    /// New tags are minted with the batch value's kind; an update that would
    /// change an existing tag's kind is dropped (and logged), since a tag's
    /// kind is fixed at first assignment.
    pub fn apply_batch(&self, updates: &[(String, TagValue)]) {
        let mut tags = self.tags.lock().expect("tag store poisoned");
        for (name, value) in updates {
            match tags.get_mut(name) {
                Some(existing) if existing.kind() != value.kind() => {
                    warn!(tag = %name, have = %existing.kind(), got = %value.kind(),
                        "dropping update that would change tag kind");
                }
                Some(existing) => *existing = *value,
                None => {
                    tags.insert(name.clone(), *value);
                }
            }
        }
    }

    /// Command-path write of raw text pairs, in presented order.
    ///
    /// Each name must already exist; raw text is coerced to the tag's
    /// established kind. The first unknown name or bad value aborts the
    /// remainder; earlier pairs remain applied (see [`WriteOutcome`]).
    pub fn write_raw(&self, pairs: &[(String, String)]) -> WriteOutcome {
        let mut tags = self.tags.lock().expect("tag store poisoned");
        let mut applied = Vec::with_capacity(pairs.len());

        for (name, raw) in pairs {
            let Some(existing) = tags.get_mut(name) else {
                return WriteOutcome {
                    applied,
                    error: Some(BridgeError::TagNotFound(name.clone())),
                };
            };
            match TagValue::parse_as(existing.kind(), raw, name) {
                Ok(value) => {
                    *existing = value;
                    applied.push((name.clone(), value));
                }
                Err(err) => {
                    return WriteOutcome {
                        applied,
                        error: Some(err),
                    };
                }
            }
        }

        WriteOutcome {
            applied,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[(&str, TagValue)]) -> TagStore {
        let store = TagStore::new();
        for (name, value) in names {
            store.declare(*name, *value);
        }
        store
    }

    #[test]
    fn test_declare_keeps_existing() {
        let store = store_with(&[("a", TagValue::Number(1.0))]);
        store.declare("a", TagValue::Number(9.0));
        assert_eq!(store.get("a"), Some(TagValue::Number(1.0)));
    }

    #[test]
    fn test_snapshot_sorted() {
        let store = store_with(&[
            ("b.x", TagValue::Number(2.0)),
            ("a.x", TagValue::Number(1.0)),
        ]);
        let snap = store.snapshot();
        assert_eq!(snap[0].0, "a.x");
        assert_eq!(snap[1].0, "b.x");
    }

    #[test]
    fn test_apply_batch_mints_and_updates() {
        let store = store_with(&[("old", TagValue::Number(0.0))]);
        store.apply_batch(&[
            ("old".into(), TagValue::Number(3.5)),
            ("new".into(), TagValue::Bool(true)),
        ]);
        assert_eq!(store.get("old"), Some(TagValue::Number(3.5)));
        assert_eq!(store.get("new"), Some(TagValue::Bool(true)));
    }

    #[test]
    fn test_kind_never_changes() {
        let store = store_with(&[("flag", TagValue::Bool(false))]);
        store.apply_batch(&[("flag".into(), TagValue::Number(2.0))]);
        assert_eq!(store.get("flag"), Some(TagValue::Bool(false)));
    }

    #[test]
    fn test_write_raw_round_trip() {
        let store = store_with(&[
            ("setpoint", TagValue::Number(50.0)),
            ("breaker", TagValue::Bool(false)),
        ]);
        let outcome = store.write_raw(&[
            ("setpoint".into(), "51.5".into()),
            ("breaker".into(), "true".into()),
        ]);
        assert!(outcome.is_ok());
        assert_eq!(store.get("setpoint").unwrap().to_string(), "51.5");
        assert_eq!(store.get("breaker").unwrap().to_string(), "true");
    }

    #[test]
    fn test_write_raw_unknown_tag_aborts() {
        let store = store_with(&[
            ("a", TagValue::Number(0.0)),
            ("b", TagValue::Number(0.0)),
        ]);
        let outcome = store.write_raw(&[
            ("a".into(), "1".into()),
            ("doesnotexist".into(), "2".into()),
            ("b".into(), "3".into()),
        ]);
        assert!(!outcome.is_ok());
        assert_eq!(outcome.applied.len(), 1);
        // a applied, b untouched
        assert_eq!(store.get("a"), Some(TagValue::Number(1.0)));
        assert_eq!(store.get("b"), Some(TagValue::Number(0.0)));
    }

    #[test]
    fn test_write_raw_single_unknown_leaves_store_unchanged() {
        let store = store_with(&[("a", TagValue::Number(7.0))]);
        let outcome = store.write_raw(&[("doesnotexist".into(), "1".into())]);
        assert!(!outcome.is_ok());
        assert!(outcome.applied.is_empty());
        assert_eq!(store.get("a"), Some(TagValue::Number(7.0)));
    }
}
