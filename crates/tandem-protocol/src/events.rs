//! Event types for the Tandem socket protocol.
//!
//! Every message on the wire is one event: a name plus an optional payload,
//! encoded as `{"event": "<name>", "data": <payload>}`. Each event name maps
//! to exactly one enum variant with a fixed schema, so malformed input is
//! rejected during decoding, before it reaches the session manager.

use serde::{Deserialize, Serialize};
use crate::payload::SignalPayload;
use crate::profile::{PartnerSummary, Profile, ProfilePayload};

/// Events sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Announce the client as browsing so others can send it requests.
    RegisterPresence(ProfilePayload),

    /// Enter opportunistic matchmaking.
    Join(ProfilePayload),

    /// Invite a specific browsing participant.
    SendMatchRequest {
        /// Requester snapshot; the registered profile is used when absent.
        #[serde(default)]
        from_user: Option<ProfilePayload>,
        /// Session the invite is addressed to.
        to_socket_id: String,
    },

    /// Accept an invite received from `from_socket_id`.
    AcceptMatchRequest {
        from_socket_id: String,
    },

    /// Decline an invite received from `from_socket_id`.
    DeclineMatchRequest {
        from_socket_id: String,
    },

    /// Session description offer, forwarded as-is.
    Offer {
        offer: SignalPayload,
    },

    /// Session description answer, forwarded as-is.
    Answer {
        answer: SignalPayload,
    },

    /// ICE candidate, forwarded as-is.
    IceCandidate {
        candidate: SignalPayload,
    },

    /// Chat text for the current partner.
    ChatMessage(String),

    /// Leave the current partner and look for the next one.
    Stop,

    /// Keepalive ping.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RegisterPresence(_) => "register-presence",
            ClientEvent::Join(_) => "join",
            ClientEvent::SendMatchRequest { .. } => "send-match-request",
            ClientEvent::AcceptMatchRequest { .. } => "accept-match-request",
            ClientEvent::DeclineMatchRequest { .. } => "decline-match-request",
            ClientEvent::Offer { .. } => "offer",
            ClientEvent::Answer { .. } => "answer",
            ClientEvent::IceCandidate { .. } => "ice-candidate",
            ClientEvent::ChatMessage(_) => "chat-message",
            ClientEvent::Stop => "stop",
            ClientEvent::Ping { .. } => "ping",
        }
    }

    /// Whether this event is forwarded to the partner by the relay.
    #[must_use]
    pub fn is_relayed(&self) -> bool {
        matches!(
            self,
            ClientEvent::Offer { .. }
                | ClientEvent::Answer { .. }
                | ClientEvent::IceCandidate { .. }
                | ClientEvent::ChatMessage(_)
        )
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Sent once after the socket is accepted.
    Connected {
        session_id: String,
        version: u8,
        /// Recommended keepalive interval in milliseconds.
        heartbeat: u32,
    },

    /// The client is queued at the given 1-based position.
    Waiting {
        queue_position: usize,
    },

    /// The client has been paired. Exactly one side is the initiator.
    Matched {
        partner: PartnerSummary,
        initiator: bool,
    },

    MatchRequestReceived {
        from: Profile,
        from_socket_id: String,
    },

    MatchRequestSent {
        to_socket_id: String,
    },

    MatchRequestFailed {
        to_socket_id: String,
        message: String,
    },

    /// Sent to the requester once its invite has been accepted.
    MatchRequestAccepted {
        partner: Profile,
        partner_socket_id: String,
        initiator: bool,
    },

    /// Sent to the requester; `from_socket_id` is the declining session.
    MatchRequestDeclined {
        from_socket_id: String,
    },

    /// Sent to a recipient whose pending invite was withdrawn.
    MatchRequestCancelled {
        from_socket_id: String,
    },

    PartnerDisconnected,

    Offer {
        offer: SignalPayload,
        from: String,
    },

    Answer {
        answer: SignalPayload,
        from: String,
    },

    IceCandidate {
        candidate: SignalPayload,
        from: String,
    },

    ChatMessage {
        message: String,
        /// Display name of the sender.
        from: String,
        /// Server time in milliseconds since the Unix epoch.
        timestamp: u64,
    },

    Error {
        message: String,
    },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::Waiting { .. } => "waiting",
            ServerEvent::Matched { .. } => "matched",
            ServerEvent::MatchRequestReceived { .. } => "match-request-received",
            ServerEvent::MatchRequestSent { .. } => "match-request-sent",
            ServerEvent::MatchRequestFailed { .. } => "match-request-failed",
            ServerEvent::MatchRequestAccepted { .. } => "match-request-accepted",
            ServerEvent::MatchRequestDeclined { .. } => "match-request-declined",
            ServerEvent::MatchRequestCancelled { .. } => "match-request-cancelled",
            ServerEvent::PartnerDisconnected => "partner-disconnected",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::IceCandidate { .. } => "ice-candidate",
            ServerEvent::ChatMessage { .. } => "chat-message",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }

    /// Create an error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_format() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send-match-request",
            "data": { "toSocketId": "s-2", "fromUser": { "name": "Alice" } }
        }))
        .unwrap();

        match event {
            ClientEvent::SendMatchRequest {
                from_user,
                to_socket_id,
            } => {
                assert_eq!(to_socket_id, "s-2");
                assert_eq!(from_user.unwrap().name.as_deref(), Some("Alice"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unit_and_newtype_events() {
        let stop: ClientEvent = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert_eq!(stop, ClientEvent::Stop);

        let chat: ClientEvent =
            serde_json::from_str(r#"{"event":"chat-message","data":"hello"}"#).unwrap();
        assert_eq!(chat, ClientEvent::ChatMessage("hello".into()));
        assert!(chat.is_relayed());
        assert!(!ClientEvent::Stop.is_relayed());
    }

    #[test]
    fn test_relayed_payload_is_verbatim() {
        let text = r#"{"event":"answer","data":{"answer":{"type":"answer","sdp":"v=0\r\n","n":1e2}}}"#;
        let event: ClientEvent = serde_json::from_str(text).unwrap();

        let ClientEvent::Answer { answer } = event else {
            panic!("unexpected event {:?}", event);
        };
        assert_eq!(answer.as_str(), r#"{"type":"answer","sdp":"v=0\r\n","n":1e2}"#);

        let forwarded = serde_json::to_string(&ServerEvent::Answer {
            answer,
            from: "s-1".into(),
        })
        .unwrap();
        assert_eq!(
            forwarded,
            r#"{"event":"answer","data":{"answer":{"type":"answer","sdp":"v=0\r\n","n":1e2},"from":"s-1"}}"#
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"teleport"}"#).is_err());
        assert!(
            serde_json::from_str::<ClientEvent>(r#"{"event":"accept-match-request","data":{}}"#)
                .is_err()
        );
    }

    #[test]
    fn test_server_event_wire_format() {
        let waiting = serde_json::to_value(ServerEvent::Waiting { queue_position: 3 }).unwrap();
        assert_eq!(
            waiting,
            json!({ "event": "waiting", "data": { "queuePosition": 3 } })
        );

        let gone = serde_json::to_value(ServerEvent::PartnerDisconnected).unwrap();
        assert_eq!(gone["event"], "partner-disconnected");
    }

    #[test]
    fn test_event_names_match_serde() {
        let event = ServerEvent::MatchRequestDeclined {
            from_socket_id: "s-1".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());
    }
}
