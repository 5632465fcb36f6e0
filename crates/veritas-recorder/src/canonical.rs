//! Canonical byte encoding of log entries.
//!
//! The encoding is a pure function of field values: map keys are emitted
//! in lexicographic byte order, integers are widened to a single i128 form,
//! and floats are written as IEEE-754 bits with `-0.0` folded into `0.0`.
//! Every length is a big-endian u32 prefix, so no two distinct entries
//! share an encoding.
//!
//! Layout:
//! ```text
//! "veritas.entry.v1"
//! u64 sequence_id | u8 event_type | str tool_name
//! val input_params | val output_result
//! i64 seconds | u32 nanos
//! u8 basis flag [u64 basis_id]
//! ```

use chrono::{DateTime, Utc};

use veritas_core::{EncodingError, EntryDraft, EventType, LogEntry, Payload};

/// Domain tag prefixed to every encoded entry.
pub const ENTRY_DOMAIN: &[u8; 16] = b"veritas.entry.v1";

/// Deepest payload nesting the encoder accepts.
pub const MAX_PAYLOAD_DEPTH: usize = 64;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_ARRAY: u8 = 0x05;
const TAG_MAP: u8 = 0x06;

/// Borrowed view of every hashed field of an entry (everything except
/// `entry_hash`).
#[derive(Debug, Clone, Copy)]
pub struct EntryFields<'a> {
    pub sequence_id: u64,
    pub event_type: EventType,
    pub tool_name: &'a str,
    pub input_params: &'a Payload,
    pub output_result: &'a Payload,
    pub timestamp: &'a DateTime<Utc>,
    pub basis_id: Option<u64>,
}

impl<'a> EntryFields<'a> {
    pub fn from_draft(sequence_id: u64, draft: &'a EntryDraft) -> Self {
        Self {
            sequence_id,
            event_type: draft.event_type,
            tool_name: &draft.tool_name,
            input_params: &draft.input_params,
            output_result: &draft.output_result,
            timestamp: &draft.timestamp,
            basis_id: draft.basis_id,
        }
    }
}

impl<'a> From<&'a LogEntry> for EntryFields<'a> {
    fn from(entry: &'a LogEntry) -> Self {
        Self {
            sequence_id: entry.sequence_id,
            event_type: entry.event_type,
            tool_name: &entry.tool_name,
            input_params: &entry.input_params,
            output_result: &entry.output_result,
            timestamp: &entry.timestamp,
            basis_id: entry.basis_id,
        }
    }
}

/// Encode the hashed fields of an entry.
pub fn encode_entry(fields: &EntryFields<'_>) -> Result<Vec<u8>, EncodingError> {
    let mut enc = Encoder::default();
    enc.buf.extend_from_slice(ENTRY_DOMAIN);
    enc.buf.extend_from_slice(&fields.sequence_id.to_be_bytes());
    enc.buf.push(fields.event_type.tag());
    enc.str(fields.tool_name, "tool_name")?;

    let mut path = String::from("input_params");
    enc.value(fields.input_params, &mut path, 0)?;
    let mut path = String::from("output_result");
    enc.value(fields.output_result, &mut path, 0)?;

    enc.buf
        .extend_from_slice(&fields.timestamp.timestamp().to_be_bytes());
    enc.buf
        .extend_from_slice(&fields.timestamp.timestamp_subsec_nanos().to_be_bytes());

    match fields.basis_id {
        Some(id) => {
            enc.buf.push(1);
            enc.buf.extend_from_slice(&id.to_be_bytes());
        }
        None => enc.buf.push(0),
    }

    Ok(enc.buf)
}

/// Encode a standalone payload.
pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>, EncodingError> {
    let mut enc = Encoder::default();
    let mut path = String::from("$");
    enc.value(payload, &mut path, 0)?;
    Ok(enc.buf)
}

#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn len_prefix(&mut self, len: usize, path: &str) -> Result<(), EncodingError> {
        let len32 = u32::try_from(len).map_err(|_| EncodingError::TooLong {
            path: path.to_string(),
            len,
        })?;
        self.buf.extend_from_slice(&len32.to_be_bytes());
        Ok(())
    }

    fn str(&mut self, s: &str, path: &str) -> Result<(), EncodingError> {
        self.len_prefix(s.len(), path)?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn value(&mut self, value: &Payload, path: &mut String, depth: usize) -> Result<(), EncodingError> {
        if depth > MAX_PAYLOAD_DEPTH {
            return Err(EncodingError::TooDeep {
                path: path.clone(),
                max: MAX_PAYLOAD_DEPTH,
            });
        }

        match value {
            Payload::Null => self.buf.push(TAG_NULL),
            Payload::Bool(b) => {
                self.buf.push(TAG_BOOL);
                self.buf.push(u8::from(*b));
            }
            Payload::Int(i) => {
                self.buf.push(TAG_INT);
                self.buf.extend_from_slice(&i128::from(*i).to_be_bytes());
            }
            Payload::UInt(u) => {
                self.buf.push(TAG_INT);
                self.buf.extend_from_slice(&i128::from(*u).to_be_bytes());
            }
            Payload::Float(f) => {
                if !f.is_finite() {
                    return Err(EncodingError::NonFiniteFloat { path: path.clone() });
                }
                let normalized = if *f == 0.0 { 0.0f64 } else { *f };
                self.buf.push(TAG_FLOAT);
                self.buf.extend_from_slice(&normalized.to_bits().to_be_bytes());
            }
            Payload::String(s) => {
                self.buf.push(TAG_STRING);
                self.str(s, path)?;
            }
            Payload::Array(items) => {
                self.buf.push(TAG_ARRAY);
                self.len_prefix(items.len(), path)?;
                for (i, item) in items.iter().enumerate() {
                    let mark = path.len();
                    path.push_str(&format!("[{i}]"));
                    self.value(item, path, depth + 1)?;
                    path.truncate(mark);
                }
            }
            Payload::Map(map) => {
                self.buf.push(TAG_MAP);
                self.len_prefix(map.len(), path)?;
                // BTreeMap<String, _> iterates in byte-lexicographic key order.
                for (key, item) in map {
                    let mark = path.len();
                    path.push('.');
                    path.push_str(key);
                    self.str(key, path)?;
                    self.value(item, path, depth + 1)?;
                    path.truncate(mark);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 250).unwrap()
    }

    fn draft(output: Payload) -> EntryDraft {
        EntryDraft::observation("balance_check", json!({"address": "0xabc"}), output).at(ts())
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Payload = serde_json::from_str(r#"{"x": 1, "y": {"b": 2, "a": 3}}"#).unwrap();
        let b: Payload = serde_json::from_str(r#"{"y": {"a": 3, "b": 2}, "x": 1}"#).unwrap();
        assert_eq!(encode_payload(&a).unwrap(), encode_payload(&b).unwrap());
    }

    #[test]
    fn integer_width_does_not_matter() {
        assert_eq!(
            encode_payload(&Payload::Int(5)).unwrap(),
            encode_payload(&Payload::UInt(5)).unwrap()
        );
        assert_ne!(
            encode_payload(&Payload::Int(1)).unwrap(),
            encode_payload(&Payload::Float(1.0)).unwrap()
        );
    }

    #[test]
    fn negative_zero_is_normalized() {
        assert_eq!(
            encode_payload(&Payload::Float(-0.0)).unwrap(),
            encode_payload(&Payload::Float(0.0)).unwrap()
        );
    }

    #[test]
    fn non_finite_floats_are_rejected_with_path() {
        let payload = Payload::map([("quote", Payload::Array(vec![Payload::Float(f64::NAN)]))]);
        let err = encode_payload(&payload).unwrap_err();
        assert_eq!(
            err,
            EncodingError::NonFiniteFloat {
                path: "$.quote[0]".into()
            }
        );

        let entry_draft = draft(Payload::Float(f64::INFINITY));
        let err = encode_entry(&EntryFields::from_draft(0, &entry_draft)).unwrap_err();
        assert!(matches!(err, EncodingError::NonFiniteFloat { path } if path == "output_result"));
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut payload = Payload::Null;
        for _ in 0..=MAX_PAYLOAD_DEPTH + 1 {
            payload = Payload::Array(vec![payload]);
        }
        assert!(matches!(
            encode_payload(&payload),
            Err(EncodingError::TooDeep { .. })
        ));
    }

    #[test]
    fn every_field_affects_the_encoding() {
        let base_draft = draft("1.5 ETH".into());
        let base = encode_entry(&EntryFields::from_draft(0, &base_draft)).unwrap();
        assert!(base.starts_with(ENTRY_DOMAIN));

        let other_seq = encode_entry(&EntryFields::from_draft(1, &base_draft)).unwrap();
        assert_ne!(base, other_seq);

        let mut changed = base_draft.clone();
        changed.tool_name = "balance_check2".into();
        assert_ne!(base, encode_entry(&EntryFields::from_draft(0, &changed)).unwrap());

        let mut changed = base_draft.clone();
        changed.event_type = EventType::Thought;
        assert_ne!(base, encode_entry(&EntryFields::from_draft(0, &changed)).unwrap());

        let changed = base_draft.clone().at(Utc.timestamp_opt(1_700_000_000, 251).unwrap());
        assert_ne!(base, encode_entry(&EntryFields::from_draft(0, &changed)).unwrap());

        let changed = base_draft.clone().with_basis(0);
        assert_ne!(base, encode_entry(&EntryFields::from_draft(0, &changed)).unwrap());

        let changed = draft("1.6 ETH".into());
        assert_ne!(base, encode_entry(&EntryFields::from_draft(0, &changed)).unwrap());
    }

    #[test]
    fn adjacent_strings_cannot_collide() {
        let a = Payload::Array(vec!["ab".into(), "c".into()]);
        let b = Payload::Array(vec!["a".into(), "bc".into()]);
        assert_ne!(encode_payload(&a).unwrap(), encode_payload(&b).unwrap());
    }
}
