//! Dotted-path access into JSON objects (`address.city`).

use serde_json::{Map, Value};

/// Value at `path`, descending through nested objects.
pub fn get_path<'a>(record: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(v) = record.get(path) {
        return Some(v);
    }
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = record.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Present and not `null`.
pub fn is_present(record: &Map<String, Value>, path: &str) -> bool {
    matches!(get_path(record, path), Some(v) if !v.is_null())
}

/// Set `path`, creating intermediate objects. A non-object in the way is
/// replaced.
pub fn set_path(record: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut current = record;
    for part in parts {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

/// Remove `path`, returning the old value.
pub fn remove_path(record: &mut Map<String, Value>, path: &str) -> Option<Value> {
    if let Some(v) = record.remove(path) {
        return Some(v);
    }
    let (parent, last) = path.rsplit_once('.')?;
    let mut current = record;
    for part in parent.split('.') {
        current = current.get_mut(part)?.as_object_mut()?;
    }
    current.remove(last)
}

/// Key form of a value: strings as-is, everything else as compact JSON.
pub fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn nested_get_and_set() {
        let mut rec = obj(json!({"user": {"address": {"city": "Oslo"}}}));
        assert_eq!(get_path(&rec, "user.address.city"), Some(&json!("Oslo")));
        assert_eq!(get_path(&rec, "user.zip"), None);

        set_path(&mut rec, "user.address.zip", json!("0150"));
        set_path(&mut rec, "meta.source", json!("crm"));
        assert_eq!(rec["user"]["address"]["zip"], json!("0150"));
        assert_eq!(rec["meta"]["source"], json!("crm"));
    }

    #[test]
    fn literal_dotted_key_wins() {
        let rec = obj(json!({"a.b": 1, "a": {"b": 2}}));
        assert_eq!(get_path(&rec, "a.b"), Some(&json!(1)));
    }

    #[test]
    fn remove_nested() {
        let mut rec = obj(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(remove_path(&mut rec, "a.b"), Some(json!(1)));
        assert_eq!(rec, obj(json!({"a": {"c": 2}})));
        assert_eq!(remove_path(&mut rec, "x.y"), None);
    }

    #[test]
    fn numeric_equality_across_representations() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(values_equal(&json!({"a": [1]}), &json!({"a": [1]})));
    }

    #[test]
    fn presence_ignores_null() {
        let rec = obj(json!({"a": null, "b": 0}));
        assert!(!is_present(&rec, "a"));
        assert!(is_present(&rec, "b"));
        assert!(!is_present(&rec, "c"));
    }
}
