//! Push protocol envelopes. Every server-to-client message carries a
//! `serverTimestamp` field; message kinds are typed enum variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::logger::LogEntry;
use crate::manager::keys::Permission;

/// Inbound client messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Authenticate {
        api_key: String,
    },
    Subscribe {
        subsystems: Vec<String>,
    },
    Unsubscribe {
        subsystems: Vec<String>,
    },
    SetFilters {
        #[serde(default)]
        filters: StreamFilters,
    },
    GetHistory {
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        start_date: Option<DateTime<Utc>>,
        #[serde(default)]
        end_date: Option<DateTime<Utc>>,
    },
    Ping,
}

/// Per-connection delivery filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamFilters {
    pub status_codes: Option<Vec<u16>>,
    pub methods: Option<Vec<String>>,
    pub client_ips: Option<Vec<String>>,
    /// Case-insensitive substring over the entry's searchable text
    pub text: Option<String>,
    /// Accepted and stored, not applied to delivery
    pub min_level: Option<String>,
}

/// Outbound server messages
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        connection_id: String,
    },
    Authenticated {
        name: String,
        permissions: Vec<Permission>,
        subsystems: Vec<String>,
    },
    Subscribed {
        subsystems: Vec<String>,
    },
    Unsubscribed {
        subsystems: Vec<String>,
    },
    FiltersUpdated,
    History {
        results: Vec<Arc<LogEntry>>,
        total: usize,
    },
    Entry {
        subsystem: String,
        entry: Arc<LogEntry>,
    },
    Pong,
    Error {
        code: &'static str,
        message: String,
    },
    Shutdown {
        message: String,
    },
}

/// Serialize a message with the envelope timestamp attached.
pub fn envelope(msg: &ServerMessage) -> String {
    match serde_json::to_value(msg) {
        Ok(mut value) => {
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "serverTimestamp".to_string(),
                    serde_json::json!(Utc::now()),
                );
            }
            value.to_string()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server message");
            format!(
                r#"{{"type":"error","code":"internal","message":"serialization failure","serverTimestamp":"{}"}}"#,
                Utc::now().to_rfc3339()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"authenticate","apiKey":"elg_abc"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Authenticate { api_key } if api_key == "elg_abc"));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","subsystems":["cache","proxy"]}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { subsystems } if subsystems.len() == 2));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_set_filters_accepts_min_level() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"setFilters","filters":{"statusCodes":[500],"minLevel":"error"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::SetFilters { filters } => {
                assert_eq!(filters.status_codes, Some(vec![500]));
                assert_eq!(filters.min_level, Some("error".to_string()));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"fhqwhgads"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_carries_timestamp_and_type() {
        let out = envelope(&ServerMessage::Pong);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value["serverTimestamp"].is_string());

        let out = envelope(&ServerMessage::Error {
            code: "rateLimited",
            message: "too many messages".to_string(),
        });
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "rateLimited");
    }
}
