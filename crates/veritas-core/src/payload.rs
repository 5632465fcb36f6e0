//! Structured tool payloads.
//!
//! Agents hand the recorder arbitrary JSON-like parameters and results.
//! Internally they are held as a closed tagged union so that the canonical
//! encoder can be total over every variant. On the wire a `Payload` is
//! plain JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A structured value recorded as a tool input or output.
///
/// Maps are `BTreeMap`s, so iteration (and therefore encoding) is always
/// in lexicographic key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// Only used for values above `i64::MAX`.
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<Payload>),
    Map(BTreeMap<String, Payload>),
}

impl Payload {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Look up a key when this payload is a map.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Build a map payload from key/value pairs.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Payload>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::UInt(u)
                } else {
                    // Rejected later by the encoder if it is not finite.
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<Payload> for serde_json::Value {
    fn from(payload: Payload) -> Self {
        use serde_json::Value;

        match payload {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(b),
            Payload::Int(i) => Value::from(i),
            Payload::UInt(u) => Value::from(u),
            Payload::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Payload::String(s) => Value::String(s),
            Payload::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Payload::Map(map) => Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Payload {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u64> for Payload {
    fn from(u: u64) -> Self {
        match i64::try_from(u) {
            Ok(i) => Self::Int(i),
            Err(_) => Self::UInt(u),
        }
    }
}

impl From<f64> for Payload {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl<T: Into<Payload>> From<Vec<T>> for Payload {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Payload>> for Payload {
    fn from(map: BTreeMap<String, Payload>) -> Self {
        Self::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_pick_narrowest_variant() {
        assert_eq!(Payload::from(json!(42)), Payload::Int(42));
        assert_eq!(Payload::from(json!(u64::MAX)), Payload::UInt(u64::MAX));
        assert_eq!(Payload::from(json!(1.5)), Payload::Float(1.5));
        assert_eq!(Payload::from(7u64), Payload::Int(7));
    }

    #[test]
    fn serializes_as_plain_json() {
        let payload = Payload::from(json!({"b": [1, true, null], "a": "x"}));
        let text = serde_json::to_string(&payload).unwrap();
        assert_eq!(text, r#"{"a":"x","b":[1,true,null]}"#);

        let back: Payload = serde_json::from_str(&text).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn map_helper_and_lookup() {
        let payload = Payload::map([("symbol", "ETH"), ("chain", "base")]);
        assert_eq!(payload.get("symbol").and_then(Payload::as_str), Some("ETH"));
        assert!(payload.get("missing").is_none());
        assert!(Payload::String("x".into()).get("symbol").is_none());
    }

    #[test]
    fn seventeen_digit_floats_round_trip_exactly() {
        for f in [
            0.000_363_264_674_491_786_83,
            0.119_778_828_988_776_65,
            0.001_883_208_131_484_651_4,
        ] {
            let json = serde_json::to_string(&Payload::Float(f)).unwrap();
            let back: Payload = serde_json::from_str(&json).unwrap();
            assert_eq!(back, Payload::Float(f), "{json}");
        }
    }
}
