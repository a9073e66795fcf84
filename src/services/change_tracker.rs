//! Field-level change tracking.
//!
//! Mutations arrive as partial updates. For every proposed field the
//! tracker compares the current value with the proposed one and, when they
//! differ, records the transition and applies the new value in the same
//! pass. Compare-and-apply is deliberately one operation: a field can
//! never end up diffed but not applied, or applied but not diffed.
//!
//! Values are compared as [`serde_json::Value`]: scalar equality for
//! strings/numbers/enums, order-sensitive equality for arrays, deep
//! equality for objects. Both sides of a comparison must come from the
//! same typed representation so numeric encodings line up.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::error::{AppError, Result};

/// Marker stored in place of secret values in recorded diffs.
pub const REDACTED: &str = "[REDACTED]";

/// An entity whose fields can be snapshotted, compared and set by name.
pub trait TrackedFields {
    /// Snapshot of the diffable fields as a JSON map.
    fn field_bag(&self) -> Map<String, Value>;

    /// Set one field from its JSON representation.
    fn apply_field(&mut self, field: &str, value: &Value) -> Result<()>;

    /// Fields whose values are masked in recorded diffs.
    ///
    /// Masked fields still participate in equality so a re-submitted
    /// identical secret does not count as a change; only the recorded
    /// old/new pair is replaced with [`REDACTED`].
    fn redacted_fields() -> &'static [&'static str] {
        &[]
    }
}

/// Recorded transitions of one mutation, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    fields: BTreeMap<String, (Value, Value)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// The (old, new) pair recorded for a field, if any.
    pub fn get(&self, field: &str) -> Option<&(Value, Value)> {
        self.fields.get(field)
    }

    pub fn record(&mut self, field: &str, old: Value, new: Value) {
        self.fields.insert(field.to_string(), (old, new));
    }

    pub fn record_redacted(&mut self, field: &str) {
        self.record(field, json!(REDACTED), json!(REDACTED));
    }

    /// Ledger payload shape: `{"field": {"old": ..., "new": ...}}`.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for (field, (old, new)) in &self.fields {
            out.insert(field.clone(), json!({ "old": old, "new": new }));
        }
        Value::Object(out)
    }
}

/// Compare every proposed field against the entity and apply the ones
/// that differ. Returns the recorded transitions; an empty result means
/// the update was a no-op and nothing was applied.
pub fn diff_and_apply<E: TrackedFields>(
    entity: &mut E,
    proposed: &Map<String, Value>,
) -> Result<ChangeSet> {
    let current = entity.field_bag();
    let mut changes = ChangeSet::default();

    for (field, new_value) in proposed {
        let old_value = current
            .get(field)
            .ok_or_else(|| AppError::Validation(format!("Unknown field: {}", field)))?;

        if old_value == new_value {
            continue;
        }

        entity.apply_field(field, new_value)?;
        if E::redacted_fields().contains(&field.as_str()) {
            changes.record_redacted(field);
        } else {
            changes.record(field, old_value.clone(), new_value.clone());
        }
    }

    Ok(changes)
}
