//! Identifier sanitizer for raw document dumps

use serde_json::Value;

/// Extended-JSON wrappers that carry an identifier as their only field
const IDENTIFIER_KEYS: &[&str] = &["$oid", "$uuid"];

/// Replace every identifier wrapper with its plain string form, at any depth.
pub fn stringify_identifiers(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some((key, Value::String(id))) = map.iter().next() {
                    if IDENTIFIER_KEYS.contains(&key.as_str()) {
                        return Value::String(id.clone());
                    }
                }
            }

            Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, stringify_identifiers(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(stringify_identifiers).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_identifier() {
        let doc = json!({"_id": {"$oid": "68e17c80dfee150e615381af"}, "title": "T"});
        assert_eq!(
            stringify_identifiers(doc),
            json!({"_id": "68e17c80dfee150e615381af", "title": "T"})
        );
    }

    #[test]
    fn test_nested_in_lists_and_subdocuments() {
        let doc = json!({
            "metadata": {
                "source": {"_id": {"$oid": "aaa"}},
                "refs": [{"$oid": "bbb"}, {"paper": {"$uuid": "ccc"}}, 3, "plain"],
            }
        });

        assert_eq!(
            stringify_identifiers(doc),
            json!({
                "metadata": {
                    "source": {"_id": "aaa"},
                    "refs": ["bbb", {"paper": "ccc"}, 3, "plain"],
                }
            })
        );
    }

    #[test]
    fn test_leaves_other_values_alone() {
        let doc = json!({
            "id": "0b6f3c52-6c1a-4a4c-9d2f-5b1d7e2f9a10",
            "year": 2020,
            "flags": [true, null],
            "not_an_id": {"$oid": "x", "extra": 1},
        });
        assert_eq!(stringify_identifiers(doc.clone()), doc);
    }
}
