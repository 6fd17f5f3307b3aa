//! Slash-separated addressing into a JSON document tree.
//!
//! Follows the realtime database's model: writing `null` deletes, and
//! objects left empty by a delete disappear along with their parents.

use serde_json::{Map, Value};

pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Joins two paths, ignoring stray slashes.
pub fn join(base: &str, child: &str) -> String {
    let mut parts = segments(base);
    parts.extend(segments(child));
    parts.join("/")
}

pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments(path) {
        node = node.as_object()?.get(segment)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Replaces the value at `path`. `Value::Null` removes it.
pub fn set(root: &mut Value, path: &str, value: Value) {
    let segments = segments(path);
    set_segments(root, &segments, value);
}

/// Applies each field of `fields` relative to `path`, like a multi-path update.
pub fn update(root: &mut Value, path: &str, fields: &Map<String, Value>) {
    for (key, value) in fields {
        set(root, &join(path, key), value.clone());
    }
}

fn set_segments(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = normalize(value);
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    let Value::Object(map) = node else {
        return;
    };

    let now_empty = {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        set_segments(child, rest, value);
        child.is_null()
    };
    if now_empty {
        map.remove(*first);
    }

    if map.is_empty() {
        *node = Value::Null;
    }
}

/// Drops nulls and empty objects, recursively.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if map.is_empty() {
                Value::Null
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get(".sv").and_then(Value::as_str) == Some("timestamp"))
}

/// Swaps every server timestamp placeholder for `now_ms`.
pub fn resolve_server_values(value: &mut Value, now_ms: u64) {
    if is_server_timestamp(value) {
        *value = Value::from(now_ms);
        return;
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| resolve_server_values(v, now_ms)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| resolve_server_values(v, now_ms)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_nested() {
        let mut root = Value::Null;
        set(&mut root, "users/a/profile", json!({"name": "Ana"}));

        assert_eq!(get(&root, "users/a/profile/name"), Some(&json!("Ana")));
        assert_eq!(get(&root, "/users/a/"), Some(&json!({"profile": {"name": "Ana"}})));
        assert_eq!(get(&root, "users/b"), None);
    }

    #[test]
    fn test_removing_last_child_prunes_parents() {
        let mut root = Value::Null;
        set(&mut root, "users/a/posts/p1/likes/v", json!(true));
        set(&mut root, "users/a/name", json!("Ana"));

        set(&mut root, "users/a/posts/p1/likes/v", Value::Null);
        assert_eq!(get(&root, "users/a/posts"), None);
        assert_eq!(get(&root, "users/a/name"), Some(&json!("Ana")));

        set(&mut root, "users/a/name", Value::Null);
        assert!(root.is_null());
    }

    #[test]
    fn test_removing_missing_path_is_noop() {
        let mut root = json!({"a": 1});
        set(&mut root, "b/c", Value::Null);
        assert_eq!(root, json!({"a": 1}));
    }

    #[test]
    fn test_update_merges_multi_path_fields() {
        let mut root = json!({"post": {"content": "hi", "likeCount": 0}});
        let fields = json!({"likeCount": 2, "media/0": "x"});
        update(&mut root, "post", fields.as_object().unwrap());

        assert_eq!(
            root,
            json!({"post": {"content": "hi", "likeCount": 2, "media": {"0": "x"}}})
        );
    }

    #[test]
    fn test_resolve_server_values() {
        let mut value = json!({
            "createdAt": {".sv": "timestamp"},
            "nested": [{"at": {".sv": "timestamp"}}],
            "other": {".sv": "increment"}
        });
        resolve_server_values(&mut value, 42);

        assert_eq!(value["createdAt"], json!(42));
        assert_eq!(value["nested"][0]["at"], json!(42));
        assert_eq!(value["other"], json!({".sv": "increment"}));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("users/a/", "/posts"), "users/a/posts");
        assert_eq!(join("", "x"), "x");
    }
}
