//! Duplicate detection over a bounded window of recently seen keys.

use std::num::NonZeroUsize;

use ledgerflow_core::{DedupAction, DedupConfig};
use lru::LruCache;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::fields::get_path;
use crate::finalize::canonical_json;

/// What to do with a duplicate under `Update` / `Merge`.
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateResolution {
    Drop,
    /// Continue processing this (possibly merged) record.
    Keep(Map<String, Value>),
}

/// Resolves duplicates for the `Update` and `Merge` actions. A job using
/// either action is rejected unless one is registered.
pub trait DuplicateHandler: Send + Sync {
    fn resolve(&self, action: DedupAction, key: &str, record: Map<String, Value>) -> DuplicateResolution;
}

/// Per-job LRU of dedup keys.
pub struct DedupIndex {
    seen: LruCache<String, ()>,
    key_fields: Vec<String>,
    hits: u64,
    misses: u64,
}

impl DedupIndex {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            seen: LruCache::new(NonZeroUsize::new(config.window).unwrap_or(NonZeroUsize::MIN)),
            key_fields: config.key_fields.clone(),
            hits: 0,
            misses: 0,
        }
    }

    /// SHA-256 over the key fields (missing ones as `null`), or over the
    /// whole canonical record when no key fields are configured.
    pub fn key_for(&self, record: &Map<String, Value>) -> String {
        let mut hasher = Sha256::new();
        if self.key_fields.is_empty() {
            hasher.update(canonical_json(&Value::Object(record.clone())).as_bytes());
        } else {
            for field in &self.key_fields {
                let value = get_path(record, field).unwrap_or(&Value::Null);
                hasher.update(canonical_json(value).as_bytes());
                hasher.update([0x1f]);
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Whether `key` is in the window. A hit refreshes its recency.
    pub fn contains(&mut self, key: &str) -> bool {
        if self.seen.get(key).is_some() {
            self.hits += 1;
            true
        } else {
            self.misses += 1;
            false
        }
    }

    /// Remember `key`. Only called once the record carrying it is accepted.
    pub fn insert(&mut self, key: String) {
        self.seen.put(key, ());
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn index(key_fields: &[&str], window: usize) -> DedupIndex {
        DedupIndex::new(&DedupConfig {
            enabled: true,
            key_fields: key_fields.iter().map(|s| s.to_string()).collect(),
            action: DedupAction::Skip,
            window,
        })
    }

    #[test]
    fn key_fields_define_identity() {
        let idx = index(&["id"], 10);
        assert_eq!(
            idx.key_for(&rec(json!({"id": 1, "v": "a"}))),
            idx.key_for(&rec(json!({"id": 1, "v": "b"})))
        );
        assert_ne!(
            idx.key_for(&rec(json!({"id": 1}))),
            idx.key_for(&rec(json!({"id": "1"})))
        );
    }

    #[test]
    fn whole_record_key_ignores_field_order() {
        let idx = index(&[], 10);
        let a = rec(json!({"a": 1, "b": {"x": 1, "y": 2}}));
        let mut b = Map::new();
        b.insert("b".into(), json!({"y": 2, "x": 1}));
        b.insert("a".into(), json!(1));
        assert_eq!(idx.key_for(&a), idx.key_for(&b));
    }

    #[test]
    fn second_sighting_is_duplicate() {
        let mut idx = index(&["id"], 10);
        let key = idx.key_for(&rec(json!({"id": 1})));
        assert!(!idx.contains(&key));
        idx.insert(key.clone());
        assert!(idx.contains(&key));
        assert_eq!(idx.hits(), 1);
        assert_eq!(idx.misses(), 1);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn lookup_alone_does_not_claim_key() {
        let mut idx = index(&["id"], 10);
        assert!(!idx.contains("k"));
        assert!(!idx.contains("k"));
        assert!(idx.is_empty());
    }

    #[test]
    fn window_evicts_oldest() {
        let mut idx = index(&["id"], 2);
        for key in ["a", "b", "c"] {
            idx.insert(key.to_string());
        }
        // "a" fell out of the window
        assert!(!idx.contains("a"));
        assert!(idx.contains("c"));
        assert_eq!(idx.len(), 2);
    }
}
