//! Flush Engine: decides what to write and renders the snapshot
//!
//! A flush drains the dirty set, re-serializes only the touched keys and
//! compares each encoding textually against the cache of what was last
//! written. Only if some key actually changed is a full snapshot rendered:
//!
//! ```text
//!   {
//!   "key": <encoding>,
//!   "other": <encoding>
//!   }
//! ```
//!
//! one member per line, in store key order, from cached encodings.

use hashbrown::HashMap;
use indexmap::IndexMap;

use crate::dirty::DirtyTracker;
use crate::error::{StoreError, StoreResult};
use crate::protocol;
use crate::value::Value;

/// Keys that can never be stored; they name the store's own operations.
pub const RESERVED_KEYS: &[&str] = &[
    "open",
    "open_sync",
    "openSync",
    "flush",
    "flush_sync",
    "flushSync",
    "close",
    "close_sync",
    "closeSync",
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Last-written encoding per key. `None` records a key whose value has no
/// persisted form (undefined).
#[derive(Debug, Default)]
pub struct SerializedCache {
    by_key: HashMap<String, Option<String>>,
}

impl SerializedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Option<String>> {
        self.by_key.get(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
    }

    fn insert(&mut self, key: &str, encoding: Option<String>) {
        self.by_key.insert(key.to_string(), encoding);
    }

    fn forget(&mut self, key: &str) -> bool {
        self.by_key.remove(key).is_some()
    }

    /// Record that the file still holds some member for `key` without
    /// knowing its encoding. No value serializes to the empty string, so
    /// the next comparison always differs.
    fn mark_stale(&mut self, key: &str) {
        self.by_key.insert(key.to_string(), Some(String::new()));
    }

    /// Cached encoding for `key`, serializing on demand.
    fn ensure(&mut self, key: &str, value: &Value) -> Option<&str> {
        self.by_key
            .entry_ref(key)
            .or_insert_with(|| protocol::serialize(value))
            .as_deref()
    }
}

/// Outcome of planning a flush that has something to write.
#[derive(Debug, Clone)]
pub struct FlushPlan {
    /// Keys whose encoding changed, in store order (removed keys last)
    pub changed: Vec<String>,
    /// Full snapshot document
    pub document: String,
}

/// Drain the dirty set and decide whether a write is needed.
///
/// Returns `None` when every touched key still encodes exactly as last
/// written. The dirty set is empty afterwards either way.
pub fn plan_flush(
    data: &IndexMap<String, Value>,
    dirty: &mut DirtyTracker,
    cache: &mut SerializedCache,
) -> Option<FlushPlan> {
    let touched = dirty.take_dirty();
    let mut changed = Vec::new();

    for (key, value) in data {
        if !touched.contains(key.as_str()) {
            continue;
        }
        let encoding = protocol::serialize(value);
        if cache.get(key) != Some(&encoding) {
            cache.insert(key, encoding);
            changed.push(key.clone());
        }
    }

    // Deleted since the last write
    let mut removed: Vec<String> = touched
        .into_iter()
        .filter(|key| !data.contains_key(key.as_str()))
        .filter(|key| cache.forget(key))
        .collect();
    removed.sort();
    changed.extend(removed);

    dirty.record_cycle(!changed.is_empty());
    if changed.is_empty() {
        return None;
    }

    Some(FlushPlan {
        changed,
        document: render_snapshot(data, cache),
    })
}

/// Render the full snapshot, caching encodings of never-flushed keys.
pub fn render_snapshot(data: &IndexMap<String, Value>, cache: &mut SerializedCache) -> String {
    let mut lines = Vec::with_capacity(data.len());
    for (key, value) in data {
        if is_reserved(key) {
            continue;
        }
        if let Some(encoding) = cache.ensure(key, value) {
            let quoted = serde_json::Value::String(key.clone()).to_string();
            lines.push(format!("{}: {}", quoted, encoding));
        }
    }
    format!("{{\n{}\n}}\n", lines.join(",\n"))
}

/// Undo the cache side of a flush whose write failed, so the next flush
/// picks the same keys up again.
///
/// A key missing from `data` is still on disk, so it keeps a stale entry
/// for the next flush to count as a removal.
pub fn rollback_failed(
    changed: &[String],
    data: &IndexMap<String, Value>,
    dirty: &mut DirtyTracker,
    cache: &mut SerializedCache,
) {
    for key in changed {
        if data.contains_key(key.as_str()) {
            cache.forget(key);
        } else {
            cache.mark_stale(key);
        }
        dirty.mark_dirty(key);
    }
}

/// Parse a persisted snapshot into store contents.
///
/// A blank file (the first-run placeholder) is an empty store.
pub fn decode_snapshot(bytes: &[u8]) -> StoreResult<IndexMap<String, Value>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| StoreError::protocol(format!("store file is not UTF-8: {}", e)))?;
    if text.trim().is_empty() {
        return Ok(IndexMap::new());
    }

    match protocol::deserialize(text)? {
        Value::Object(map) => {
            if let Some(key) = map.keys().find(|k| is_reserved(k)) {
                return Err(StoreError::ReservedProperty { name: key.clone() });
            }
            Ok(map)
        }
        _ => Err(StoreError::protocol("store file does not contain an object")),
    }
}

/// Seed the cache with what a freshly loaded file already holds.
pub fn prime_cache(data: &IndexMap<String, Value>, cache: &mut SerializedCache) {
    cache.clear();
    for (key, value) in data {
        cache.insert(key, protocol::serialize(value));
    }
}
