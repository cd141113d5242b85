//! Canonicalization and encoding helpers
//!
//! Field names are written in camelCase by collaborators and rewritten to
//! snake_case on the wire. These helpers are only ever applied at build time.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

/// Rewrite a camelCase name to snake_case.
///
/// Every ASCII uppercase letter becomes `_` followed by its lowercase form,
/// then a single leading `_` produced by the rewrite is stripped.
///
/// ```rust
/// use tally_core::util::to_snake_case;
///
/// assert_eq!(to_snake_case("TestStringName"), "test_string_name");
/// assert_eq!(to_snake_case("pageView"), "page_view");
/// ```
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for ch in s.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }

    match out.strip_prefix('_') {
        Some(rest) => rest.to_string(),
        None => out,
    }
}

/// Snake-case every key of a JSON object, recursing into non-empty objects.
///
/// Arrays and scalar values are copied unchanged.
pub fn sanitize_property_names(dict: &Map<String, Value>) -> Map<String, Value> {
    let mut sanitized = Map::with_capacity(dict.len());

    for (key, value) in dict {
        let value = match value {
            Value::Object(child) if !child.is_empty() => {
                Value::Object(sanitize_property_names(child))
            }
            other => other.clone(),
        };
        sanitized.insert(to_snake_case(key), value);
    }

    sanitized
}

/// Base64-encode the UTF-8 bytes of `text` (standard alphabet, padded).
pub fn base64_encode(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Build a nested skeleton with `value` placed at the end of `path`.
///
/// `place_in_path(json!("x"), &["first", "second"])` yields
/// `{"first": {"second": "x"}}`. An empty path returns the value itself.
pub fn place_in_path(value: Value, path: &[&str]) -> Value {
    path.iter().rev().fold(value, |inner, key| {
        let mut wrapper = Map::new();
        wrapper.insert((*key).to_string(), inner);
        Value::Object(wrapper)
    })
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("TestStringName"), "test_string_name");
        assert_eq!(to_snake_case("clientTstamp"), "client_tstamp");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case(""), "");
    }

    #[test]
    fn test_to_snake_case_strips_only_one_leading_underscore() {
        assert_eq!(to_snake_case("_private"), "private");
        assert_eq!(to_snake_case("_Private"), "_private");
    }

    #[test]
    fn test_to_snake_case_ignores_non_ascii_uppercase() {
        assert_eq!(to_snake_case("naïveÉtat"), "naïveÉtat");
    }

    #[test]
    fn test_sanitize_property_names() {
        let dict = json!({
            "eventType": "page_view",
            "ctx": {
                "pageUrl": "www.test.com",
                "pageStats": {
                    "visitCount": 24,
                    "sessionLength": 42211
                }
            }
        });

        let expected = json!({
            "event_type": "page_view",
            "ctx": {
                "page_url": "www.test.com",
                "page_stats": {
                    "visit_count": 24,
                    "session_length": 42211
                }
            }
        });

        let sanitized = sanitize_property_names(dict.as_object().unwrap());
        assert_eq!(Value::Object(sanitized), expected);
    }

    #[test]
    fn test_sanitize_leaves_arrays_alone() {
        let dict = json!({"itemList": [{"skuCode": "a"}]});
        let sanitized = sanitize_property_names(dict.as_object().unwrap());
        assert_eq!(Value::Object(sanitized), json!({"item_list": [{"skuCode": "a"}]}));
    }

    #[test]
    fn test_base64_encode() {
        assert_eq!(base64_encode("my_string"), "bXlfc3RyaW5n");
        assert_eq!(base64_encode("™®字"), "4oSiwq7lrZc=");
        assert_eq!(base64_encode("a"), "YQ==");
        assert_eq!(base64_encode(""), "");
    }

    #[test]
    fn test_place_in_path() {
        assert_eq!(
            place_in_path(json!("test"), &["first", "second"]),
            json!({"first": {"second": "test"}})
        );
        assert_eq!(place_in_path(json!(1), &[]), json!(1));
    }
}
