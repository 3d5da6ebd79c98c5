//! Request fingerprinting for the dedup broadcaster (§3, §4.5): a stable
//! hash over the request body fields that determine its response, with map
//! keys canonicalised so field order in the client's JSON never matters.

use serde_json::Value;

/// Hex-encoded blake3 digest over `body`, canonicalised so that key order
/// never affects the result. Callers are responsible for narrowing `body`
/// down to the field subset that actually determines the upstream
/// response (model, messages, system, tools, `max_tokens`, `temperature`,
/// `stream`) before calling this — this function hashes whatever `Value`
/// it is given.
pub fn fingerprint(body: &Value) -> String {
    let canonical = canonicalize(body);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Recursively sorts object keys so two JSON documents that differ only in
/// key order hash identically. Arrays keep their order: element order in
/// `messages`/`content` is semantically meaningful.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (key, val) in sorted {
                out.insert(key.clone(), canonicalize(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let a = json!({"model": "claude-3", "stream": true, "max_tokens": 10});
        let b = json!({"stream": true, "max_tokens": 10, "model": "claude-3"});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn differing_bodies_hash_differently() {
        let a = json!({"model": "claude-3", "max_tokens": 10});
        let b = json!({"model": "claude-3", "max_tokens": 20});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({"messages": [{"role": "user"}, {"role": "assistant"}]});
        let b = json!({"messages": [{"role": "assistant"}, {"role": "user"}]});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
