//! The deep-merge rule used for every job context mutation. Operators on
//! all parties observe this behavior, so it has to stay identical
//! everywhere: objects merge recursively, arrays and scalars are replaced
//! wholesale.

use serde_json::map::Entry;
use serde_json::Value;

pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.entry(key.clone()) {
                    Entry::Occupied(mut occupied)
                        if occupied.get().is_object() && overlay_value.is_object() =>
                    {
                        deep_merge(occupied.get_mut(), overlay_value)
                    }
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(overlay_value.clone());
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::merge::*;

    #[test]
    fn test_merge_recurses_into_objects() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "keep": true});
        deep_merge(&mut base, &json!({"a": {"c": 3, "d": 4}}));
        assert_eq!(json!({"a": {"b": 1, "c": 3, "d": 4}, "keep": true}), base);
    }

    #[test]
    fn test_merge_replaces_arrays_and_scalars() {
        let mut base = json!({"list": [1, 2, 3], "n": 1, "obj": {"x": 1}});
        deep_merge(&mut base, &json!({"list": [9], "n": "one", "obj": "flat"}));
        assert_eq!(json!({"list": [9], "n": "one", "obj": "flat"}), base);
    }

    #[test]
    fn test_merge_inserts_missing_keys() {
        let mut base = json!({});
        deep_merge(&mut base, &json!({"party_a": {"k": "v"}}));
        assert_eq!(json!({"party_a": {"k": "v"}}), base);
    }

    #[test]
    fn test_merge_idempotent_on_right_identity() {
        let a = json!({"a": {"b": 1}, "c": [1, 2]});
        let b = json!({"a": {"b": 2, "x": true}, "d": "s"});

        let mut once = a.clone();
        deep_merge(&mut once, &b);

        // deep_merge(a, deep_merge(a, b)) == deep_merge(a, b)
        let mut twice = a.clone();
        deep_merge(&mut twice, &once);
        assert_eq!(once, twice);
    }
}
