//! Classification of inbound client frames
//!
//! The server never rewrites a client frame; classification extracts just
//! what routing needs (the message type, control verbs, a unicast target)
//! and leaves the raw text untouched for fan-out.

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// `parsed.type`, or `custom` when absent or the payload is not JSON
    pub message_type: String,
    /// What the frame asks the server to do
    pub kind: InboundKind,
}

/// The routing-relevant shape of an inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// Handshake response; fields are optional so the engine can report
    /// missing ones precisely
    AuthResponse {
        /// 65-byte hex signature, `0x`-prefixed
        signature: Option<String>,
        /// Claimed wallet address, `0x`-prefixed
        address: Option<String>,
    },
    /// Join a room (absent roomId resolves through the default fallback)
    Join {
        /// Target room id
        room_id: Option<String>,
    },
    /// Leave the current room
    Leave,
    /// Any other JSON object; forwarded verbatim
    Message {
        /// Unicast target (`targetId`), when present
        target_id: Option<String>,
    },
    /// Not valid JSON; forwarded verbatim as an opaque custom payload
    Custom,
}

/// Classify a raw text frame
pub fn classify(raw: &str) -> Inbound {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            return Inbound {
                message_type: "custom".to_string(),
                kind: InboundKind::Custom,
            }
        }
    };

    let message_type = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("custom")
        .to_string();

    let string_field = |name: &str| {
        value
            .get(name)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };

    let kind = match message_type.as_str() {
        "auth-response" => InboundKind::AuthResponse {
            signature: string_field("signature"),
            address: string_field("address"),
        },
        "join" => InboundKind::Join {
            room_id: string_field("roomId"),
        },
        "leave" => InboundKind::Leave,
        _ => InboundKind::Message {
            target_id: string_field("targetId"),
        },
    };

    Inbound { message_type, kind }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_response() {
        let inbound = classify(r#"{"type":"auth-response","signature":"0xff","address":"0xaa"}"#);
        assert_eq!(inbound.message_type, "auth-response");
        assert_eq!(
            inbound.kind,
            InboundKind::AuthResponse {
                signature: Some("0xff".to_string()),
                address: Some("0xaa".to_string()),
            }
        );
    }

    #[test]
    fn test_classify_auth_response_missing_fields() {
        let inbound = classify(r#"{"type":"auth-response"}"#);
        assert_eq!(
            inbound.kind,
            InboundKind::AuthResponse {
                signature: None,
                address: None,
            }
        );
    }

    #[test]
    fn test_classify_join_and_leave() {
        let join = classify(r#"{"type":"join","roomId":"lobby"}"#);
        assert_eq!(
            join.kind,
            InboundKind::Join {
                room_id: Some("lobby".to_string())
            }
        );

        let leave = classify(r#"{"type":"leave"}"#);
        assert_eq!(leave.kind, InboundKind::Leave);
    }

    #[test]
    fn test_classify_offer_with_target() {
        let inbound = classify(r#"{"type":"offer","targetId":"0xaa_1","sdp":"v=0"}"#);
        assert_eq!(inbound.message_type, "offer");
        assert_eq!(
            inbound.kind,
            InboundKind::Message {
                target_id: Some("0xaa_1".to_string())
            }
        );
    }

    #[test]
    fn test_classify_json_without_type_is_custom() {
        let inbound = classify(r#"{"data":"hi"}"#);
        assert_eq!(inbound.message_type, "custom");
        assert_eq!(inbound.kind, InboundKind::Message { target_id: None });
    }

    #[test]
    fn test_classify_non_json_is_custom() {
        let inbound = classify("not json at all {{{");
        assert_eq!(inbound.message_type, "custom");
        assert_eq!(inbound.kind, InboundKind::Custom);
    }
}
