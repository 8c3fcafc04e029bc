//! Response shaping: summary projection and byte-budget enforcement.
//!
//! Oversized payloads are never rejected. [`fit_to_budget`] halves the largest
//! nested collections (keeping a prefix), then replaces large scalar blobs with
//! markers, and finally falls back to a shape summary. Every step is recorded
//! under a top-level `truncation` object.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Item fields kept by summary projections of listing entries.
pub const SUMMARY_FIELDS: [&str; 6] = ["_id", "name", "description", "status", "createdAt", "updatedAt"];

pub const TRUNCATION_KEY: &str = "truncation";

const PROTECTED_KEYS: [&str; 2] = [TRUNCATION_KEY, "partial_failures"];
const MIN_REPLACEABLE_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Summary,
    #[default]
    Full,
}

impl ResponseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Full => "full",
        }
    }
}

pub fn serialized_size<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX)
}

/// Projects an upstream listing item onto [`SUMMARY_FIELDS`].
pub fn project_summary(item: &Value) -> Value {
    let Some(map) = item.as_object() else {
        return item.clone();
    };
    let projected: Map<String, Value> = SUMMARY_FIELDS
        .iter()
        .filter_map(|field| map.get(*field).map(|v| ((*field).to_string(), v.clone())))
        .collect();
    Value::Object(projected)
}

/// Describes a JSON value by type and size without carrying its contents.
pub fn summarize_json_shape(value: &Value) -> Value {
    match value {
        Value::Object(map) => json!({
            "type": "object",
            "keys": map.keys().take(20).cloned().collect::<Vec<_>>(),
            "key_count": map.len(),
        }),
        Value::Array(items) => json!({"type": "array", "len": items.len()}),
        Value::String(s) => json!({"type": "string", "chars": s.chars().count()}),
        Value::Number(_) => json!({"type": "number"}),
        Value::Bool(_) => json!({"type": "bool"}),
        Value::Null => json!({"type": "null"}),
    }
}

#[derive(Debug, Clone)]
enum Degradation {
    Prefix { original_len: usize, kept: usize },
    Replaced { omitted_bytes: usize },
}

impl Degradation {
    fn to_json(&self, path: &str) -> Value {
        match self {
            Self::Prefix { original_len, kept } => json!({
                "path": path,
                "kept": kept,
                "omitted": original_len - kept,
            }),
            Self::Replaced { omitted_bytes } => json!({
                "path": path,
                "omitted_bytes": omitted_bytes,
            }),
        }
    }
}

#[derive(Debug)]
struct Candidate {
    path: String,
    size: usize,
    array_len: Option<usize>,
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn is_marker(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.get("truncated") == Some(&Value::Bool(true)))
}

fn collect_candidates(value: &Value, path: &str, out: &mut Vec<Candidate>) {
    let children: Vec<(String, &Value)> = match value {
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| !(path.is_empty() && PROTECTED_KEYS.contains(&key.as_str())))
            .map(|(key, child)| (format!("{path}/{}", escape_pointer(key)), child))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, child)| (format!("{path}/{idx}"), child))
            .collect(),
        _ => return,
    };

    for (child_path, child) in children {
        if is_marker(child) {
            continue;
        }
        let size = serialized_size(child);
        match child {
            Value::Array(items) if !items.is_empty() => out.push(Candidate {
                path: child_path.clone(),
                size,
                array_len: Some(items.len()),
            }),
            Value::Object(_) | Value::String(_) if size > MIN_REPLACEABLE_BYTES => {
                out.push(Candidate {
                    path: child_path.clone(),
                    size,
                    array_len: None,
                })
            }
            _ => {}
        }
        collect_candidates(child, &child_path, out);
    }
}

/// Picks the largest collection that can still be halved, else the largest
/// replaceable value.
fn next_candidate(value: &Value) -> Option<Candidate> {
    let mut candidates = Vec::new();
    collect_candidates(value, "", &mut candidates);
    let halvable = candidates
        .iter()
        .filter(|c| c.size > MIN_REPLACEABLE_BYTES && c.array_len.is_some_and(|len| len >= 2))
        .max_by_key(|c| c.size)
        .map(|c| c.path.clone());
    let path = halvable.or_else(|| {
        candidates
            .iter()
            .max_by_key(|c| c.size)
            .map(|c| c.path.clone())
    })?;
    candidates.into_iter().find(|c| c.path == path)
}

fn apply(value: &mut Value, candidate: &Candidate, log: &mut BTreeMap<String, Degradation>) {
    let Some(target) = value.pointer_mut(&candidate.path) else {
        return;
    };
    match (candidate.array_len, target) {
        (Some(len), Value::Array(items)) if len >= 2 => {
            let kept = len / 2;
            items.truncate(kept);
            log.entry(candidate.path.clone())
                .and_modify(|d| {
                    if let Degradation::Prefix { kept: k, .. } = d {
                        *k = kept;
                    }
                })
                .or_insert(Degradation::Prefix {
                    original_len: len,
                    kept,
                });
        }
        (_, target) => {
            let original_len = target.as_array().map(Vec::len);
            *target = json!({"truncated": true, "omitted_bytes": candidate.size});
            let entry = match (log.remove(&candidate.path), original_len) {
                (Some(Degradation::Prefix { original_len, .. }), _) => Degradation::Prefix {
                    original_len,
                    kept: 0,
                },
                (_, Some(len)) => Degradation::Prefix {
                    original_len: len,
                    kept: 0,
                },
                _ => Degradation::Replaced {
                    omitted_bytes: candidate.size,
                },
            };
            log.insert(candidate.path.clone(), entry);
        }
    }
}

fn annotate(
    value: &mut Value,
    strategy: &str,
    limit_bytes: usize,
    original_bytes: usize,
    log: &BTreeMap<String, Degradation>,
) {
    if let Some(map) = value.as_object_mut() {
        map.insert(
            TRUNCATION_KEY.to_string(),
            json!({
                "reason": "response_size_limit",
                "strategy": strategy,
                "limit_bytes": limit_bytes,
                "original_bytes": original_bytes,
                "collections": log.iter().map(|(path, d)| d.to_json(path)).collect::<Vec<_>>(),
            }),
        );
    }
}

/// Returns `value` unchanged when it fits `max_bytes`, else the best degraded
/// form that does. The result never serializes larger than `max_bytes` unless
/// `max_bytes` is smaller than the minimal truncation marker.
pub fn fit_to_budget(value: Value, max_bytes: usize) -> Value {
    let original_bytes = serialized_size(&value);
    if original_bytes <= max_bytes {
        return value;
    }

    let mut working = match value {
        Value::Object(_) => value,
        other => json!({ "data": other }),
    };
    let source_shape = summarize_json_shape(&working);
    let mut log = BTreeMap::new();

    while let Some(candidate) = next_candidate(&working) {
        apply(&mut working, &candidate, &mut log);
        annotate(&mut working, "collection_prefix", max_bytes, original_bytes, &log);
        if serialized_size(&working) <= max_bytes {
            return working;
        }
    }

    let fallback = json!({
        TRUNCATION_KEY: {
            "reason": "response_size_limit",
            "strategy": "summary_only",
            "limit_bytes": max_bytes,
            "original_bytes": original_bytes,
        },
        "data_summary": source_shape,
    });
    if serialized_size(&fallback) <= max_bytes {
        return fallback;
    }
    json!({
        TRUNCATION_KEY: {
            "reason": "response_size_limit",
            "strategy": "minimal_fallback",
            "limit_bytes": max_bytes,
            "original_bytes": original_bytes,
        }
    })
}

pub fn is_truncated(value: &Value) -> bool {
    value.get(TRUNCATION_KEY).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big_record(entries: usize) -> Value {
        json!({
            "id": "exp-1",
            "name": "Wheat Trial A",
            "notebook_entries": (0..entries)
                .map(|i| json!({"_id": format!("nb-{i}"), "text": "x".repeat(200)}))
                .collect::<Vec<_>>(),
            "treatment": {"_id": "tr-1", "factors": ["nitrogen", "water"]},
            "partial_failures": [],
        })
    }

    #[test]
    fn fitting_values_are_untouched() {
        let record = big_record(2);
        assert_eq!(fit_to_budget(record.clone(), 100_000), record);
    }

    #[test]
    fn largest_collection_is_cut_to_a_prefix() {
        let shaped = fit_to_budget(big_record(200), 10_000);
        assert!(serialized_size(&shaped) <= 10_000);
        assert_eq!(shaped["id"], "exp-1");
        assert_eq!(shaped["treatment"]["_id"], "tr-1");

        let kept = shaped["notebook_entries"].as_array().unwrap();
        assert!(!kept.is_empty());
        assert_eq!(kept[0]["_id"], "nb-0");

        let collections = shaped[TRUNCATION_KEY]["collections"].as_array().unwrap();
        assert_eq!(collections[0]["path"], "/notebook_entries");
        assert_eq!(
            collections[0]["kept"].as_u64().unwrap() + collections[0]["omitted"].as_u64().unwrap(),
            200
        );
    }

    #[test]
    fn large_single_object_is_replaced_by_marker() {
        let record = json!({
            "id": "exp-1",
            "treatment": {"blob": "y".repeat(20_000)},
        });
        let shaped = fit_to_budget(record, 5_000);
        assert!(serialized_size(&shaped) <= 5_000);
        assert_eq!(shaped["treatment"]["truncated"], true);
        assert!(is_truncated(&shaped));
    }

    #[test]
    fn non_object_roots_are_wrapped() {
        let list = Value::Array((0..500).map(|i| json!({"n": i, "pad": "z".repeat(50)})).collect());
        let shaped = fit_to_budget(list, 4_096);
        assert!(serialized_size(&shaped) <= 4_096);
        assert!(shaped["data"].is_array());
    }

    #[test]
    fn summary_projection_keeps_whitelist_only() {
        let item = json!({
            "_id": "t1",
            "name": "Wheat Trial A",
            "status": "active",
            "plots": [1, 2, 3],
            "owner": {"email": "a@b.c"}
        });
        assert_eq!(
            project_summary(&item),
            json!({"_id": "t1", "name": "Wheat Trial A", "status": "active"})
        );
    }
}
