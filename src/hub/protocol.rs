//! JSON message protocol between the broadcast hub and its subscribers.
//!
//! Messages travel as line-delimited JSON text frames over the loopback
//! socket. Every frame carries a `type` tag.

use crate::types::TranscriptionEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why the hub is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByeReason {
    Shutdown,
    IdleTimeout,
    SlowClient,
}

/// Frames sent by the hub to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// First frame after accept.
    Hello {
        session_id: String,
        started_at: DateTime<Utc>,
        privacy_mode: String,
    },
    /// Recent events replayed to a new subscriber, in id order.
    History { events: Vec<TranscriptionEvent> },
    /// A live transcription event, fields inline.
    Event {
        #[serde(flatten)]
        event: TranscriptionEvent,
    },
    /// Subscriber churn notification.
    Status { connected: bool, subscribers: usize },
    /// Connection is closing.
    Bye { reason: ByeReason },
}

impl HubMessage {
    /// Builds the hello frame; the hub always reports local-only privacy
    /// because it binds to loopback by contract.
    pub fn hello(session_id: &str, started_at: DateTime<Utc>) -> Self {
        Self::Hello {
            session_id: session_id.to_string(),
            started_at,
            privacy_mode: "local_only".to_string(),
        }
    }

    /// Serialize to a single-line JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transcription;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn event(id: u64) -> TranscriptionEvent {
        TranscriptionEvent::from_transcription(
            id,
            ts(),
            Transcription {
                text: "hello".to_string(),
                language: "en".to_string(),
                confidence: None,
            },
        )
    }

    #[test]
    fn test_hello_json_shape() {
        let msg = HubMessage::hello("20250601_120000", ts());
        let json = msg.to_json().unwrap();

        assert!(json.contains("\"type\":\"hello\""));
        assert!(json.contains("\"session_id\":\"20250601_120000\""));
        assert!(json.contains("\"started_at\":\"2025-06-01T12:00:00Z\""));
        assert!(json.contains("\"privacy_mode\":\"local_only\""));
    }

    #[test]
    fn test_event_fields_are_inline() {
        let msg = HubMessage::Event { event: event(7) };
        let json = msg.to_json().unwrap();

        // Flattened: no nested "event" object.
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"text\":\"hello\""));
        assert!(!json.contains("\"event\":{"));
    }

    #[test]
    fn test_history_wraps_events() {
        let msg = HubMessage::History {
            events: vec![event(1), event(2)],
        };
        let json = msg.to_json().unwrap();

        assert!(json.contains("\"type\":\"history\""));
        assert!(json.contains("\"events\":["));

        let back = HubMessage::from_json(&json).unwrap();
        match back {
            HubMessage::History { events } => {
                assert_eq!(events.len(), 2);
                assert_eq!(events[0].id, 1);
                assert_eq!(events[1].id, 2);
            }
            _ => panic!("Expected History"),
        }
    }

    #[test]
    fn test_status_json_shape() {
        let msg = HubMessage::Status {
            connected: true,
            subscribers: 3,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"connected\":true"));
        assert!(json.contains("\"subscribers\":3"));
    }

    #[test]
    fn test_bye_reasons_serialize_snake_case() {
        let shutdown = HubMessage::Bye {
            reason: ByeReason::Shutdown,
        };
        assert_eq!(
            shutdown.to_json().unwrap(),
            r#"{"type":"bye","reason":"shutdown"}"#
        );

        let idle = HubMessage::Bye {
            reason: ByeReason::IdleTimeout,
        };
        assert!(idle.to_json().unwrap().contains("\"idle_timeout\""));

        let slow = HubMessage::Bye {
            reason: ByeReason::SlowClient,
        };
        assert!(slow.to_json().unwrap().contains("\"slow_client\""));
    }

    #[test]
    fn test_all_variants_roundtrip() {
        let messages = vec![
            HubMessage::hello("s", ts()),
            HubMessage::History {
                events: vec![event(1)],
            },
            HubMessage::Event { event: event(2) },
            HubMessage::Status {
                connected: false,
                subscribers: 0,
            },
            HubMessage::Bye {
                reason: ByeReason::SlowClient,
            },
        ];

        for msg in messages {
            let json = msg.to_json().unwrap();
            let back = HubMessage::from_json(&json).unwrap();
            assert_eq!(back, msg, "roundtrip failed for {}", json);
        }
    }

    #[test]
    fn test_event_with_translation_roundtrips() {
        let mut e = event(3);
        e.translation = Some(crate::types::TranslationInfo {
            text: "olá".to_string(),
            language: "pt".to_string(),
            backend: "local_rest".to_string(),
        });
        let msg = HubMessage::Event { event: e.clone() };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"translation\":{"));

        match HubMessage::from_json(&json).unwrap() {
            HubMessage::Event { event } => assert_eq!(event, e),
            _ => panic!("Expected Event"),
        }
    }

    #[test]
    fn test_invalid_json_returns_error() {
        assert!(HubMessage::from_json(r#"{"type":"unknown_frame"}"#).is_err());
        assert!(HubMessage::from_json(r#"{"no":"type"}"#).is_err());
        assert!(HubMessage::from_json("not json at all").is_err());
    }
}
