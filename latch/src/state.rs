//! Item state variants.
//!
//! A [`State`] is the typed reading of a tracked item. The set is closed and
//! every consumption site matches exhaustively; adding a variant is a format
//! change and bumps the record version.
//!
//! The serde representation is adjacently tagged so that variants can never
//! be confused on disk:
//!
//! ```json
//! {"type":"number","value":21.5}
//! {"type":"text","value":"OPEN"}
//! {"type":"on-off","value":true}
//! {"type":"date-time","value":"2025-01-07T08:30:00Z"}
//! {"type":"undefined"}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The last known state of a tracked item.
///
/// `Undefined` is the "no reading yet" sentinel. It participates in the codec
/// (a record carrying it round-trips) but the persistence service never
/// stores it — see
/// [`PersistenceService::store`](crate::service::PersistenceService::store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum State {
    /// A numeric reading (temperatures, dimmer percentages, counters).
    Number(f64),
    /// A string or enum-like reading (e.g. "OPEN", "PLAYING").
    Text(String),
    /// A binary on/off reading.
    OnOff(bool),
    /// A point-in-time reading.
    DateTime(DateTime<Utc>),
    /// No reading yet. Never persisted.
    Undefined,
}

impl State {
    /// Returns `true` for the [`State::Undefined`] sentinel.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::OnOff(true) => f.write_str("ON"),
            Self::OnOff(false) => f.write_str("OFF"),
            Self::DateTime(ts) => write!(f, "{}", ts.to_rfc3339()),
            Self::Undefined => f.write_str("UNDEF"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tagged_representation() {
        let json = serde_json::to_string(&State::Number(21.5)).unwrap();
        assert_eq!(json, r#"{"type":"number","value":21.5}"#);

        let json = serde_json::to_string(&State::OnOff(true)).unwrap();
        assert_eq!(json, r#"{"type":"on-off","value":true}"#);

        let json = serde_json::to_string(&State::Undefined).unwrap();
        assert_eq!(json, r#"{"type":"undefined"}"#);
    }

    #[test]
    fn test_variants_never_ambiguous() {
        // A numeric-looking text state must stay text through a round trip.
        let state = State::Text("21.5".to_string());
        let json = serde_json::to_string(&state).unwrap();
        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_ne!(back, State::Number(21.5));

        // Same for a boolean-looking text state.
        let state = State::Text("true".to_string());
        let json = serde_json::to_string(&state).unwrap();
        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_ne!(back, State::OnOff(true));
    }

    #[test]
    fn test_date_time_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 7, 8, 30, 0).unwrap();
        let state = State::DateTime(ts);
        let json = serde_json::to_string(&state).unwrap();
        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_display() {
        assert_eq!(State::Number(22.0).to_string(), "22");
        assert_eq!(State::Text("OPEN".to_string()).to_string(), "OPEN");
        assert_eq!(State::OnOff(true).to_string(), "ON");
        assert_eq!(State::OnOff(false).to_string(), "OFF");
        assert_eq!(State::Undefined.to_string(), "UNDEF");
    }

    #[test]
    fn test_is_undefined() {
        assert!(State::Undefined.is_undefined());
        assert!(!State::Number(0.0).is_undefined());
        assert!(!State::Text(String::new()).is_undefined());
    }
}
