//! Wire protocol types for the chat relay WebSocket.
//!
//! JSON events tagged by a `type` field, camelCase payload fields.

use serde::{Deserialize, Serialize};

use crate::models::StoredMessage;

/// Events sent FROM the client TO the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Bind this connection to a user identity
    Auth { user_id: i64 },
    /// Send a message to a peer
    Message { content: String, receiver_id: i64 },
}

/// Events sent FROM the server TO the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// The auth event was accepted and the identity is now routable
    AuthSuccess { user_id: i64 },
    /// Echo of a persisted message, sent to its sender
    MessageSent { message: StoredMessage },
    /// A persisted message addressed to this connection's identity
    NewMessage { message: StoredMessage },
    /// A recoverable fault scoped to this connection
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> StoredMessage {
        StoredMessage {
            id: 1,
            content: "hi".to_string(),
            sender_id: 1,
            receiver_id: 2,
            created_at: 1700000000,
        }
    }

    #[test]
    fn client_auth_serde() {
        let json = r#"{"type":"auth","userId":7}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::Auth { user_id } => assert_eq!(user_id, 7),
            _ => panic!("Expected Auth"),
        }
    }

    #[test]
    fn client_message_serde() {
        let json = r#"{"type":"message","content":"hello","receiverId":2}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::Message {
                content,
                receiver_id,
            } => {
                assert_eq!(content, "hello");
                assert_eq!(receiver_id, 2);
            }
            _ => panic!("Expected Message"),
        }
    }

    #[test]
    fn client_message_rejects_non_integer_receiver() {
        let json = r#"{"type":"message","content":"hello","receiverId":"x"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn client_auth_rejects_missing_user_id() {
        let json = r#"{"type":"auth"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn server_auth_success_serde() {
        let event = ServerEvent::AuthSuccess { user_id: 7 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "auth_success");
        assert_eq!(json["userId"], 7);
    }

    #[test]
    fn server_message_sent_serde() {
        let event = ServerEvent::MessageSent {
            message: sample_message(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_sent");
        assert_eq!(json["message"]["senderId"], 1);
        assert_eq!(json["message"]["receiverId"], 2);
        assert_eq!(json["message"]["createdAt"], 1700000000i64);
    }

    #[test]
    fn server_new_message_serde() {
        let event = ServerEvent::NewMessage {
            message: sample_message(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["message"]["content"], "hi");
    }

    #[test]
    fn server_error_serde() {
        let event = ServerEvent::Error {
            message: "bad input".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "bad input");
    }

    #[test]
    fn server_event_roundtrip_all_variants() {
        let variants = vec![
            ServerEvent::AuthSuccess { user_id: 1 },
            ServerEvent::MessageSent {
                message: sample_message(),
            },
            ServerEvent::NewMessage {
                message: sample_message(),
            },
            ServerEvent::Error {
                message: "e".to_string(),
            },
        ];
        for event in variants {
            let json = serde_json::to_string(&event).unwrap();
            let _: ServerEvent = serde_json::from_str(&json).unwrap();
        }
    }
}
