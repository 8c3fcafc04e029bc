//! Structural identifier extraction from upstream documents of unknown shape.
//!
//! A key is recognised for a kind when, after lowercasing and dropping `_`/`-`,
//! it equals or contains one of the configured patterns. Values under a
//! recognised key are flattened: strings and numbers are taken as-is, arrays
//! are walked, and objects contribute their `_id`/`id`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    GenotypeId,
    TrialId,
}

impl IdentifierKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenotypeId => "genotype_id",
            Self::TrialId => "trial_id",
        }
    }
}

/// Recognised key patterns per identifier kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierKeys {
    pub genotype: Vec<String>,
    pub trial: Vec<String>,
}

impl Default for IdentifierKeys {
    fn default() -> Self {
        Self {
            genotype: vec!["genotypeId".to_string()],
            trial: vec!["trialId".to_string()],
        }
    }
}

impl IdentifierKeys {
    pub fn patterns(&self, kind: IdentifierKind) -> &[String] {
        match kind {
            IdentifierKind::GenotypeId => &self.genotype,
            IdentifierKind::TrialId => &self.trial,
        }
    }
}

pub type IdentifierSet = BTreeMap<IdentifierKind, BTreeSet<String>>;

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn key_matches(key: &str, patterns: &[String]) -> bool {
    let key = normalize_key(key);
    patterns
        .iter()
        .map(|p| normalize_key(p))
        .filter(|p| !p.is_empty())
        .any(|p| key == p || key.contains(&p))
}

fn collect_values(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() {
                out.insert(s.to_string());
            }
        }
        Value::Number(n) => {
            out.insert(n.to_string());
        }
        Value::Array(items) => items.iter().for_each(|item| collect_values(item, out)),
        Value::Object(map) => {
            if let Some(id) = map.get("_id").or_else(|| map.get("id")) {
                collect_values(id, out);
            }
        }
        Value::Null | Value::Bool(_) => {}
    }
}

fn walk(value: &Value, patterns: &[String], out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key_matches(key, patterns) {
                    collect_values(child, out);
                }
                walk(child, patterns, out);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| walk(item, patterns, out)),
        _ => {}
    }
}

/// Returns every identifier of `kind` reachable in `document`. Never fails.
pub fn extract(document: &Value, kind: IdentifierKind, keys: &IdentifierKeys) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    walk(document, keys.patterns(kind), &mut out);
    out
}

pub fn extract_all(document: &Value, keys: &IdentifierKeys) -> IdentifierSet {
    [IdentifierKind::GenotypeId, IdentifierKind::TrialId]
        .into_iter()
        .map(|kind| (kind, extract(document, kind, keys)))
        .collect()
}
