//! Structural diffing into RFC 6902 JSON Patch documents.
//!
//! Objects are diffed key by key in sorted order; arrays and scalars are
//! replaced whole. Every `remove` and `replace` is preceded by a `test`
//! asserting the old value, so a stale patch fails on the server instead of
//! clobbering concurrent edits.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::{TassError, TassResult};
use crate::json::{Map, Value};

/// Patch operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
    Test,
}

/// One patch step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: OpKind,
    /// JSON Pointer (RFC 6901) to the target location.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self { op: OpKind::Add, path: path.into(), value: Some(value) }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self { op: OpKind::Remove, path: path.into(), value: None }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self { op: OpKind::Replace, path: path.into(), value: Some(value) }
    }

    pub fn test(path: impl Into<String>, value: Value) -> Self {
        Self { op: OpKind::Test, path: path.into(), value: Some(value) }
    }
}

/// Escape one reference token: `~` to `~0`, `/` to `~1`.
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Reverse of [`escape_token`].
pub fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Compute the operations that turn `from` into `to`.
pub fn diff(from: &Value, to: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_into(from, to, "", &mut ops);
    ops
}

/// Patch between two objects.
pub fn json_patch(from: &Map, to: &Map) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_maps(from, to, "", &mut ops);
    ops
}

/// Patch between two objects, serialized as a JSON array string.
pub fn patch_string(from: &Map, to: &Map) -> TassResult<String> {
    Ok(serde_json::to_string(&json_patch(from, to))?)
}

fn diff_into(from: &Value, to: &Value, path: &str, ops: &mut Vec<PatchOp>) {
    if from == to {
        return;
    }
    match (from, to) {
        (Value::Object(a), Value::Object(b)) => diff_maps(a, b, path, ops),
        _ => {
            ops.push(PatchOp::test(path, from.clone()));
            ops.push(PatchOp::replace(path, to.clone()));
        }
    }
}

fn diff_maps(from: &Map, to: &Map, path: &str, ops: &mut Vec<PatchOp>) {
    let child = |key: &str| format!("{path}/{}", escape_token(key));

    for (key, old) in from.iter().filter(|(k, _)| !to.contains_key(*k)) {
        ops.push(PatchOp::test(child(key), old.clone()));
        ops.push(PatchOp::remove(child(key)));
    }
    for (key, new) in to.iter().filter(|(k, _)| !from.contains_key(*k)) {
        ops.push(PatchOp::add(child(key), new.clone()));
    }
    for (key, old) in from {
        if let Some(new) = to.get(key) {
            diff_into(old, new, &child(key), ops);
        }
    }
}

/// Apply `ops` to `target` in order.
///
/// Stops at the first failing operation; earlier operations stay applied.
pub fn apply_patch(target: &mut Value, ops: &[PatchOp]) -> TassResult<()> {
    for op in ops {
        apply_one(target, op)?;
    }
    Ok(())
}

fn apply_one(target: &mut Value, op: &PatchOp) -> TassResult<()> {
    let tokens = parse_pointer(&op.path)?;
    let operand = || {
        op.value
            .clone()
            .ok_or_else(|| TassError::InvalidPatch(format!("{:?} at '{}' needs a value", op.op, op.path)))
    };

    match op.op {
        OpKind::Test => {
            let expected = operand()?;
            match resolve(target, &tokens) {
                Some(actual) if *actual == expected => Ok(()),
                _ => Err(TassError::InvalidPatch(format!("test failed at '{}'", op.path))),
            }
        }
        OpKind::Replace => {
            let value = operand()?;
            let slot = resolve_mut(target, &tokens)
                .ok_or_else(|| TassError::InvalidPatch(format!("no value at '{}'", op.path)))?;
            *slot = value;
            Ok(())
        }
        OpKind::Add => {
            let value = operand()?;
            let Some((last, parents)) = tokens.split_last() else {
                *target = value;
                return Ok(());
            };
            match parent_of(target, parents, &op.path)? {
                Value::Object(map) => {
                    map.insert(last.clone(), value);
                    Ok(())
                }
                Value::Array(items) => {
                    let index = if last == "-" {
                        items.len()
                    } else {
                        array_index(last, items.len() + 1, &op.path)?
                    };
                    items.insert(index, value);
                    Ok(())
                }
                other => Err(not_a_container(other, &op.path)),
            }
        }
        OpKind::Remove => {
            let Some((last, parents)) = tokens.split_last() else {
                return Err(TassError::InvalidPatch("cannot remove the document root".to_string()));
            };
            match parent_of(target, parents, &op.path)? {
                Value::Object(map) => map
                    .remove(last)
                    .map(|_| ())
                    .ok_or_else(|| TassError::InvalidPatch(format!("no value at '{}'", op.path))),
                Value::Array(items) => {
                    let index = array_index(last, items.len(), &op.path)?;
                    items.remove(index);
                    Ok(())
                }
                other => Err(not_a_container(other, &op.path)),
            }
        }
    }
}

fn parse_pointer(path: &str) -> TassResult<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| TassError::InvalidPatch(format!("pointer '{path}' must start with '/'")))?;
    Ok(rest.split('/').map(unescape_token).collect())
}

fn resolve<'a>(mut current: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get(token)?,
            Value::Array(items) => items.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn resolve_mut<'a>(mut current: &'a mut Value, tokens: &[String]) -> Option<&'a mut Value> {
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get_mut(token)?,
            Value::Array(items) => items.get_mut(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn parent_of<'a>(target: &'a mut Value, parents: &[String], path: &str) -> TassResult<&'a mut Value> {
    resolve_mut(target, parents)
        .ok_or_else(|| TassError::InvalidPatch(format!("parent of '{path}' does not exist")))
}

fn array_index(token: &str, bound: usize, path: &str) -> TassResult<usize> {
    token
        .parse::<usize>()
        .ok()
        .filter(|i| *i < bound)
        .ok_or_else(|| TassError::InvalidPatch(format!("index '{token}' out of range at '{path}'")))
}

fn not_a_container(value: &Value, path: &str) -> TassError {
    TassError::InvalidPatch(format!("parent of '{path}' is a {}", value.kind()))
}

/// A map that remembers a snapshot of itself and can describe its changes as a patch.
///
/// The snapshot is taken on construction and moves only through
/// [`TrackedDict::update_snapshot`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedDict {
    content: Map,
    snapshot: Map,
}

impl TrackedDict {
    pub fn new(content: Map) -> Self {
        Self { snapshot: content.clone(), content }
    }

    /// Track an object value.
    pub fn from_value(value: Value) -> TassResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(TassError::Validation(format!(
                "only objects can be tracked, got {}",
                other.kind()
            ))),
        }
    }

    /// Operations turning the snapshot into the current content.
    pub fn as_patch(&self) -> Vec<PatchOp> {
        json_patch(&self.snapshot, &self.content)
    }

    /// [`TrackedDict::as_patch`] serialized as JSON.
    pub fn as_patch_str(&self) -> TassResult<String> {
        Ok(serde_json::to_string(&self.as_patch())?)
    }

    /// Current content serialized as JSON.
    pub fn as_json(&self) -> TassResult<String> {
        Ok(serde_json::to_string(&self.content)?)
    }

    pub fn has_changes(&self) -> bool {
        self.snapshot != self.content
    }

    /// Make the current content the new baseline.
    pub fn update_snapshot(&mut self) {
        self.snapshot = self.content.clone();
    }

    pub fn snapshot(&self) -> &Map {
        &self.snapshot
    }

    pub fn into_inner(self) -> Map {
        self.content
    }
}

impl Deref for TrackedDict {
    type Target = Map;

    fn deref(&self) -> &Map {
        &self.content
    }
}

impl DerefMut for TrackedDict {
    fn deref_mut(&mut self) -> &mut Map {
        &mut self.content
    }
}

impl From<Map> for TrackedDict {
    fn from(content: Map) -> Self {
        Self::new(content)
    }
}

impl Serialize for TrackedDict {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.content.serialize(serializer)
    }
}
