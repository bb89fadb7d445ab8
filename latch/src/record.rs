//! Value codec: serialized record format for stored values.
//!
//! Each persisted value is one self-contained JSON document:
//!
//! ```json
//! {"name":"temp.Kitchen","state":{"type":"number","value":21.5},"timestamp":"2025-01-07T08:30:00Z"}
//! ```
//!
//! Encoding is deterministic for a given value. Decoding is total: any
//! malformed or semantically invalid record — bad JSON, missing fields, an
//! empty `name` — comes back as `None`, never as an error. Corrupt records
//! must not take down a bulk read, so the failure is logged here at the
//! codec boundary and the service layer treats the value as absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::State;

/// A named, timestamped value — the unit exchanged between the codec and the
/// record table.
///
/// `name` is the storage key; storing a second value under the same name
/// replaces the first. `timestamp` records when the value was captured and is
/// advisory only (it is not part of the key and is overwritten on every
/// store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Identifier of the tracked item. Non-empty.
    pub name: String,
    /// The item's last known state.
    pub state: State,
    /// When the value was captured.
    pub timestamp: DateTime<Utc>,
}

impl StoredValue {
    /// Builds a value captured now.
    pub fn now(name: impl Into<String>, state: State) -> Self {
        Self {
            name: name.into(),
            state,
            timestamp: Utc::now(),
        }
    }

    /// A record is valid when all fields deserialized and `name` is
    /// non-empty. Partially valid records are treated as absent.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Serializes a value to its on-disk record text.
///
/// # Errors
///
/// Returns [`LatchError::Encode`](crate::error::LatchError::Encode) if JSON
/// serialization fails.
pub fn encode(value: &StoredValue) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Parses a record text back into a [`StoredValue`].
///
/// Returns `None` for malformed or invalid records. Pure and
/// side-effect-free apart from a `warn` log on rejection.
pub fn decode(text: &str) -> Option<StoredValue> {
    match serde_json::from_str::<StoredValue>(text) {
        Ok(value) if value.is_valid() => Some(value),
        Ok(value) => {
            tracing::warn!(record = text, "rejected record with empty name: {value:?}");
            None
        }
        Err(e) => {
            tracing::warn!(record = text, "rejected malformed record: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 7, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_round_trip_every_variant() {
        let states = [
            State::Number(21.5),
            State::Number(-0.25),
            State::Text("OPEN".to_string()),
            State::OnOff(true),
            State::OnOff(false),
            State::DateTime(ts()),
            State::Undefined,
        ];

        for state in states {
            let value = StoredValue {
                name: "temp.Kitchen".to_string(),
                state,
                timestamp: ts(),
            };
            let text = encode(&value).unwrap();
            let back = decode(&text).expect("round trip must succeed");
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_timestamp_sub_second_precision_survives() {
        let value = StoredValue {
            name: "x".to_string(),
            state: State::Number(1.0),
            timestamp: ts() + chrono::Duration::milliseconds(123),
        };
        let back = decode(&encode(&value).unwrap()).unwrap();
        assert_eq!(back.timestamp, value.timestamp);
    }

    #[test]
    fn test_decode_malformed_json() {
        assert!(decode("").is_none());
        assert!(decode("not json").is_none());
        assert!(decode("{\"name\":").is_none());
    }

    #[test]
    fn test_decode_missing_fields() {
        // No state
        assert!(decode(r#"{"name":"a","timestamp":"2025-01-07T08:30:00Z"}"#).is_none());
        // No timestamp
        assert!(decode(r#"{"name":"a","state":{"type":"number","value":1.0}}"#).is_none());
        // No name
        assert!(
            decode(r#"{"state":{"type":"number","value":1.0},"timestamp":"2025-01-07T08:30:00Z"}"#)
                .is_none()
        );
    }

    #[test]
    fn test_decode_empty_name() {
        let text = r#"{"name":"","state":{"type":"number","value":1.0},"timestamp":"2025-01-07T08:30:00Z"}"#;
        assert!(decode(text).is_none());
    }

    #[test]
    fn test_decode_unknown_state_tag() {
        let text = r#"{"name":"a","state":{"type":"color","value":"red"},"timestamp":"2025-01-07T08:30:00Z"}"#;
        assert!(decode(text).is_none());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let value = StoredValue {
            name: "door.Front".to_string(),
            state: State::Text("CLOSED".to_string()),
            timestamp: ts(),
        };
        assert_eq!(encode(&value).unwrap(), encode(&value).unwrap());
    }
}
