//! Payload size estimate reported with `send_data`.
//!
//! The middleware expects the approximate length of the payload's JSON
//! rendering with `", "` and `": "` separators.

use serde_json::Value;

/// Estimate the rendered size of `value` in bytes.
pub fn calc_size(value: &Value) -> u64 {
    match value {
        Value::Object(map) => {
            let mut size = 2; // {}
            let mut sep = 0;
            for (key, value) in map {
                size += key.chars().count() as u64 + 2; // ""
                size += 2 + sep; // ": "
                size += calc_size(value);
                sep = 2; // ", "
            }
            size
        }
        Value::Array(items) => {
            let mut size = 2; // []
            let mut sep = 0;
            for item in items {
                size += calc_size(item) + sep;
                sep = 2;
            }
            size
        }
        Value::String(s) => s.chars().count() as u64 + 2,
        Value::Null => 4,
        Value::Bool(true) => 4,
        Value::Bool(false) => 5,
        Value::Number(n) => n.to_string().len() as u64,
    }
}
