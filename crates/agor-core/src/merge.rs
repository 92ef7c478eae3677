//! Structural deep-merge for entity patches.
//!
//! Every repository `update` is read-merge-write: the stored entity is
//! serialized to JSON, the patch is merged in, and the result is
//! deserialized back. Maps merge recursively; scalars and arrays from
//! the patch replace the base value; immutable fields are ignored.

use crate::error::CoreResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Fields an update patch may never change.
pub const IMMUTABLE_FIELDS: &[&str] = &["id", "repo_id", "created_at"];

/// Recursively deep-merge `overlay` into `base`.
///
/// - Objects merge recursively per-field.
/// - Scalars and arrays from the overlay **replace** the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                if let Some(base_val) = base_map.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_map.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

/// Apply a JSON patch to an entity, skipping [`IMMUTABLE_FIELDS`] at the
/// top level, and return the merged entity.
///
/// # Errors
///
/// Returns an error if the entity fails to round-trip through JSON or
/// the merged value no longer deserializes into `T`.
pub fn merge_entity_patch<T>(base: &T, patch: &Value) -> CoreResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(base)?;

    let mut patch = patch.clone();
    if let Value::Object(map) = &mut patch {
        for field in IMMUTABLE_FIELDS {
            map.remove(*field);
        }
    }

    deep_merge(&mut value, &patch);
    Ok(serde_json::from_value(value)?)
}
