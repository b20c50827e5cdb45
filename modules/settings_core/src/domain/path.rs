//! Dot-path parsing and tree folds over `serde_json::Value`
//!
//! A settings tree is a nested JSON object. Leaves are scalars, `null`
//! (inherit), arrays, or empty objects.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::contract::DiffEntry;

/// Wildcard path observing every change on an instance
pub const WILDCARD: &str = "*";

/// Split a dot-path into its segments, ignoring empty segments
pub fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Join a parent path and a key
pub fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Walk `path`; `None` on any missing intermediate
pub fn get_at<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .into_iter()
        .try_fold(tree, |node, seg| node.as_object()?.get(seg))
}

/// Write `value` at `path`, creating intermediates, and return the old value
/// (`Value::Null` when the path did not exist)
pub fn set_at(tree: &mut Value, path: &str, value: Value) -> Value {
    set_in(tree, &segments(path), value)
}

fn set_in(node: &mut Value, segs: &[&str], value: Value) -> Value {
    let Some((first, rest)) = segs.split_first() else {
        return std::mem::replace(node, value);
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return Value::Null;
    };
    if rest.is_empty() {
        return map.insert(first.to_string(), value).unwrap_or(Value::Null);
    }
    let child = map
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set_in(child, rest, value)
}

/// Remove the value at `path`, returning it
pub fn remove_at(tree: &mut Value, path: &str) -> Option<Value> {
    let segs = segments(path);
    let (last, parents) = segs.split_last()?;
    let parent = parents
        .iter()
        .try_fold(tree, |node, seg| node.as_object_mut()?.get_mut(*seg))?;
    parent.as_object_mut()?.remove(*last)
}

/// Flatten a tree into `(path, leaf)` pairs, depth first
pub fn leaves(tree: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    collect_leaves(tree, "", &mut out);
    out
}

fn collect_leaves(node: &Value, prefix: &str, out: &mut Vec<(String, Value)>) {
    match node {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, &join(prefix, key), out);
            }
        }
        _ if prefix.is_empty() => {}
        leaf => out.push((prefix.to_string(), leaf.clone())),
    }
}

/// Merge `other` into `base`.
///
/// With `overwrite`, values from `other` win on conflicting leaves; otherwise
/// only leaves missing from `base` are filled in.
pub fn merge_into(base: &mut Value, other: &Value, overwrite: bool) {
    match (base, other) {
        (Value::Object(base_map), Value::Object(other_map)) => {
            for (key, other_child) in other_map {
                match base_map.get_mut(key) {
                    Some(base_child) if base_child.is_object() && other_child.is_object() => {
                        merge_into(base_child, other_child, overwrite);
                    }
                    Some(base_child) => {
                        if overwrite {
                            *base_child = other_child.clone();
                        }
                    }
                    None => {
                        base_map.insert(key.clone(), other_child.clone());
                    }
                }
            }
        }
        (base, other) => {
            if overwrite {
                *base = other.clone();
            }
        }
    }
}

/// `merge(defaults, parsed)` with the parsed values winning
pub fn merged_with_defaults(defaults: &Value, parsed: &Value) -> Value {
    let mut tree = defaults.clone();
    merge_into(&mut tree, parsed, true);
    tree
}

/// Leaf-level difference between two trees
pub fn diff(current: &Value, other: &Value) -> BTreeMap<String, DiffEntry> {
    let current_leaves: BTreeMap<String, Value> = leaves(current).into_iter().collect();
    let other_leaves: BTreeMap<String, Value> = leaves(other).into_iter().collect();

    let mut out = BTreeMap::new();
    for (path, value) in &current_leaves {
        let theirs = other_leaves.get(path);
        if theirs != Some(value) {
            out.insert(
                path.clone(),
                DiffEntry {
                    current: Some(value.clone()),
                    other: theirs.cloned(),
                },
            );
        }
    }
    for (path, value) in &other_leaves {
        if !current_leaves.contains_key(path) {
            out.insert(
                path.clone(),
                DiffEntry {
                    current: None,
                    other: Some(value.clone()),
                },
            );
        }
    }
    out
}

/// Segment-wise match where `*` in `pattern` matches exactly one segment
pub fn matches_pattern(pattern: &str, path: &str) -> bool {
    let p = segments(pattern);
    let s = segments(path);
    p.len() == s.len() && p.iter().zip(&s).all(|(a, b)| *a == "*" || a == b)
}

/// True when `path` equals `ancestor` or lies below it
pub fn is_within(path: &str, ancestor: &str) -> bool {
    let a = segments(ancestor);
    let p = segments(path);
    p.len() >= a.len() && a.iter().zip(&p).all(|(x, y)| *x == "*" || x == y)
}
