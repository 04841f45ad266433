//! Dotted field paths inside a leaf value
//!
//! `"a.b.c"` walks nested objects; a numeric segment indexes into an array.

use serde_json::{Map, Value};

use crate::store::PendingChange;

/// Value at `path`, or the whole value when `path` is `None`
pub fn get_at_path<'a>(value: Option<&'a Value>, path: Option<&str>) -> Option<&'a Value> {
    let mut current = value?;
    let Some(path) = path else {
        return Some(current);
    };

    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `new_value` at `path`, creating intermediate objects as needed
///
/// A numeric segment indexes into an array, growing it with `null` when the
/// index is past the end. Other non-object values on the way are replaced
/// by objects.
pub fn set_at_path(target: &mut Value, path: &str, new_value: Value) {
    let mut current = target;

    for segment in path.split('.') {
        let index = segment.parse::<usize>().ok();
        if !(current.is_array() && index.is_some()) && !current.is_object() {
            *current = Value::Object(Map::new());
        }

        current = match (current, index) {
            (Value::Array(items), Some(index)) => {
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                &mut items[index]
            }
            (Value::Object(map), _) => map.entry(segment.to_string()).or_insert(Value::Null),
            _ => unreachable!("replaced by an object above"),
        };
    }

    *current = new_value;
}

/// Apply pending changes, in order, on top of a base leaf value
///
/// Conflicted changes are skipped. A change without a field path replaces
/// the whole value. Returns `None` when no change applies, in which case the
/// base itself is the effective value.
pub fn overlay(base: Option<&Value>, changes: &[PendingChange]) -> Option<Value> {
    let mut applicable = changes.iter().filter(|c| !c.has_conflict).peekable();
    applicable.peek()?;

    let mut effective = match base {
        Some(value) if !value.is_null() => value.clone(),
        _ => Value::Object(Map::new()),
    };

    for change in applicable {
        match change.field_path() {
            Some(path) => set_at_path(&mut effective, path, change.value.clone()),
            None => effective = change.value.clone(),
        }
    }

    Some(effective)
}
