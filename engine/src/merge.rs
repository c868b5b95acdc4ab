//! The smart-merge algorithm: field-level, entity-aware reconciliation of
//! two divergent JSON values.
//!
//! The generic rule starts from the remote value and pulls in local fields
//! that are provably newer, recursing into nested objects with a
//! dot-namespaced entity type so nested entity-specific rules apply. Two
//! namespaces carry hand-written rules:
//!
//! - `impact`: numeric fields are summed — impact metrics are additive
//!   across reconciled sessions, not competing edits.
//! - `collection` / `order`: line items are merged per item id, each item
//!   taking whichever side has the later per-item `updatedAt`.

use crate::Timestamp;
use serde_json::{Map, Value};

/// Identifier and immutable metadata fields never overwritten by a merge.
const IMMUTABLE_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// Name of the line-item array inside `collection` and `order` payloads.
const ITEMS_FIELD: &str = "items";

/// Name of the metadata block inside `collection` and `order` payloads.
const METADATA_FIELD: &str = "metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeRule {
    Additive,
    LineItems,
    Generic,
}

/// Entity-specific rules match on the final segment of the (possibly
/// dot-namespaced) entity type, so a nested `impact` object inside another
/// entity still sums.
fn rule_for(entity_type: &str) -> MergeRule {
    match entity_type.rsplit('.').next().unwrap_or(entity_type) {
        "impact" => MergeRule::Additive,
        "collection" | "order" => MergeRule::LineItems,
        _ => MergeRule::Generic,
    }
}

/// Merge a local and a remote value for the given entity type.
///
/// `local_ts` and `remote_ts` are the record-level modification timestamps;
/// scalars fall back to them when no finer-grained signal exists.
pub fn smart_merge(
    entity_type: &str,
    local: &Value,
    local_ts: Timestamp,
    remote: &Value,
    remote_ts: Timestamp,
) -> Value {
    let (Some(local_map), Some(remote_map)) = (local.as_object(), remote.as_object()) else {
        return pick_scalar(local, local_ts, remote, remote_ts);
    };

    match rule_for(entity_type) {
        MergeRule::Additive => {
            additive_merge(entity_type, local_map, local_ts, remote_map, remote_ts)
        }
        MergeRule::LineItems => {
            line_item_merge(entity_type, local_map, local_ts, remote_map, remote_ts)
        }
        MergeRule::Generic => Value::Object(generic_merge(
            entity_type, local_map, local_ts, remote_map, remote_ts,
        )),
    }
}

/// Record-level last-writer-wins for non-object values: strictly-greater
/// local timestamp keeps local, ties favor remote.
fn pick_scalar(local: &Value, local_ts: Timestamp, remote: &Value, remote_ts: Timestamp) -> Value {
    if local_ts > remote_ts {
        local.clone()
    } else {
        remote.clone()
    }
}

fn generic_merge(
    entity_type: &str,
    local: &Map<String, Value>,
    local_ts: Timestamp,
    remote: &Map<String, Value>,
    remote_ts: Timestamp,
) -> Map<String, Value> {
    let mut base = remote.clone();

    for (key, local_value) in local {
        if IMMUTABLE_FIELDS.contains(&key.as_str()) {
            continue;
        }

        match base.get(key) {
            None => {
                // Only the local side knows this field.
                base.insert(key.clone(), local_value.clone());
            }
            Some(remote_value) => {
                if local_value.is_object() && remote_value.is_object() {
                    let sub_type = format!("{entity_type}.{key}");
                    let merged =
                        smart_merge(&sub_type, local_value, local_ts, remote_value, remote_ts);
                    base.insert(key.clone(), merged);
                } else if local_value.is_array() {
                    // Arrays are not diffed at the generic level; the
                    // remote array stands.
                } else if local_ts > remote_ts {
                    base.insert(key.clone(), local_value.clone());
                }
            }
        }
    }

    base
}

/// Impact metrics: numeric fields on both sides are summed; everything else
/// follows the generic rule.
fn additive_merge(
    entity_type: &str,
    local: &Map<String, Value>,
    local_ts: Timestamp,
    remote: &Map<String, Value>,
    remote_ts: Timestamp,
) -> Value {
    let mut base = generic_merge(entity_type, local, local_ts, remote, remote_ts);

    for (key, local_value) in local {
        if IMMUTABLE_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if let Some(sum) = remote
            .get(key)
            .and_then(|remote_value| sum_numbers(local_value, remote_value))
        {
            base.insert(key.clone(), sum);
        }
    }

    Value::Object(base)
}

fn sum_numbers(a: &Value, b: &Value) -> Option<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(Value::from(x.saturating_add(y)));
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => serde_json::Number::from_f64(x + y).map(Value::Number),
        _ => None,
    }
}

/// Collections and orders: line items merged per item id, metadata block
/// taken from whichever side is newer overall, everything else generic.
fn line_item_merge(
    entity_type: &str,
    local: &Map<String, Value>,
    local_ts: Timestamp,
    remote: &Map<String, Value>,
    remote_ts: Timestamp,
) -> Value {
    let mut base = generic_merge(entity_type, local, local_ts, remote, remote_ts);

    if let (Some(Value::Array(local_items)), Some(Value::Array(remote_items))) =
        (local.get(ITEMS_FIELD), remote.get(ITEMS_FIELD))
    {
        base.insert(
            ITEMS_FIELD.to_string(),
            merge_items(local_items, remote_items),
        );
    }

    let newer = if local_ts > remote_ts { local } else { remote };
    if let Some(metadata) = newer.get(METADATA_FIELD) {
        base.insert(METADATA_FIELD.to_string(), metadata.clone());
    }

    Value::Object(base)
}

/// Merge two line-item arrays by item id.
///
/// Items present on one side only are kept. Items present on both sides
/// take whichever side has the later per-item `updatedAt`, ties favoring
/// remote. Remote item order is preserved; local-only items are appended.
fn merge_items(local_items: &[Value], remote_items: &[Value]) -> Value {
    let mut merged: Vec<Value> = Vec::with_capacity(remote_items.len());

    for remote_item in remote_items {
        let winner = item_id(remote_item)
            .and_then(|id| {
                local_items
                    .iter()
                    .find(|candidate| item_id(candidate) == Some(id))
            })
            .filter(|local_item| item_updated_at(local_item) > item_updated_at(remote_item))
            .unwrap_or(remote_item);
        merged.push(winner.clone());
    }

    for local_item in local_items {
        let matched = item_id(local_item)
            .map(|id| {
                remote_items
                    .iter()
                    .any(|candidate| item_id(candidate) == Some(id))
            })
            .unwrap_or(false);
        if !matched {
            merged.push(local_item.clone());
        }
    }

    Value::Array(merged)
}

fn item_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}

fn item_updated_at(item: &Value) -> u64 {
    item.get("updatedAt").and_then(Value::as_u64).unwrap_or(0)
}
