//! Upstream payload unwrapping
//!
//! Upstream messages usually carry the packet record under a field of an
//! envelope object, either as a nested object or as string-encoded JSON:
//!
//! ```text
//! {"_index": "packets-2024", "_source": {"layers": {...}}}
//! {"_index": "packets-2024", "_source": "{\"layers\": {...}}"}
//! {"layers": {...}}
//! ```
//!
//! Shapes that cannot be resolved are passed through as raw text so the
//! framer can still pick objects out of them.

use std::borrow::Cow;

use serde_json::{Map, Value};

/// Key used when a field value is not an object
pub const RAW_VALUE_KEY: &str = "_source_raw";

/// Top-level key produced by packet dissectors
pub const LAYERS_KEY: &str = "layers";

/// Result of decoding one payload
#[derive(Debug, PartialEq)]
pub enum Decoded<'a> {
    /// Nothing but whitespace
    Empty,
    /// A resolved packet record
    Record(Value),
    /// Unresolved text, to be framed
    Text(Cow<'a, str>),
}

/// Unwraps packet records from envelope payloads
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
    field: String,
    rewrap: bool,
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        Self::new("_source", true)
    }
}

impl PayloadDecoder {
    /// Create a decoder for `field`
    ///
    /// With `rewrap`, the resolved record is emitted as `{field: record}`.
    pub fn new(field: impl Into<String>, rewrap: bool) -> Self {
        Self {
            field: field.into(),
            rewrap,
        }
    }

    /// Field this decoder looks for
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Decode one payload (invalid UTF-8 is replaced)
    pub fn decode<'a>(&self, payload: &'a [u8]) -> Decoded<'a> {
        let text = match String::from_utf8_lossy(payload) {
            Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
            Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
        };
        if text.is_empty() {
            return Decoded::Empty;
        }
        if !text.starts_with('{') {
            return Decoded::Text(text);
        }

        let Ok(Value::Object(mut envelope)) = serde_json::from_str::<Value>(&text) else {
            return Decoded::Text(text);
        };

        if let Some(inner) = envelope.remove(&self.field) {
            return Decoded::Record(self.wrap(unwrap_value(inner)));
        }
        // Dissector output: keep only the layers, not sibling envelope keys
        if let Some(layers) = envelope.remove(LAYERS_KEY) {
            let mut record = Map::with_capacity(1);
            record.insert(LAYERS_KEY.to_string(), layers);
            return Decoded::Record(self.wrap(record));
        }
        Decoded::Text(text)
    }

    fn wrap(&self, record: Map<String, Value>) -> Value {
        if self.rewrap {
            let mut outer = Map::with_capacity(1);
            outer.insert(self.field.clone(), Value::Object(record));
            Value::Object(outer)
        } else {
            Value::Object(record)
        }
    }
}

/// Resolve a field value to an object, decoding string-encoded JSON once
fn unwrap_value(value: Value) -> Map<String, Value> {
    let value = match value {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(s),
        },
        other => other,
    };

    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::with_capacity(1);
            map.insert(RAW_VALUE_KEY.to_string(), other);
            map
        }
    }
}
