//! Signaling relay.
//!
//! Forwards negotiation payloads and chat text from a session to its current
//! partner. Offer, answer and ICE payloads are never inspected or re-encoded.

use crate::matches::MatchTable;
use crate::participant::SessionId;
use crate::registry::SessionRegistry;
use tandem_protocol::{ClientEvent, ServerEvent, SignalPayload};
use tracing::{trace, warn};

/// A relayable message.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(SignalPayload),
    Answer(SignalPayload),
    IceCandidate(SignalPayload),
    Chat(String),
}

impl Signal {
    /// Extract the relayable part of a client event.
    #[must_use]
    pub fn from_event(event: ClientEvent) -> Option<Self> {
        match event {
            ClientEvent::Offer { offer } => Some(Signal::Offer(offer)),
            ClientEvent::Answer { answer } => Some(Signal::Answer(answer)),
            ClientEvent::IceCandidate { candidate } => Some(Signal::IceCandidate(candidate)),
            ClientEvent::ChatMessage(text) => Some(Signal::Chat(text)),
            _ => None,
        }
    }

    /// Event name, used for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer(_) => "offer",
            Signal::Answer(_) => "answer",
            Signal::IceCandidate(_) => "ice-candidate",
            Signal::Chat(_) => "chat",
        }
    }
}

/// What happened to a relayed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Delivered to the partner's outbox.
    Forwarded { to: SessionId },
    /// Sender has no active session; a late message from an ended pairing.
    NoSession,
    /// Sender is paired but its registry record has no display name.
    Inconsistent,
    /// Partner's connection is already closing.
    PartnerUnreachable { to: SessionId },
}

/// Forward `signal` from `sender` to its partner.
///
/// `timestamp` is stamped on chat messages (milliseconds since the epoch).
pub fn route(
    registry: &SessionRegistry,
    matches: &MatchTable,
    sender: &SessionId,
    signal: Signal,
    timestamp: u64,
) -> RelayOutcome {
    let Some(partner) = matches.partner_of(sender) else {
        trace!(session = %sender, kind = signal.kind(), "Relay: no active session, dropped");
        return RelayOutcome::NoSession;
    };

    let from = sender.to_string();
    let event = match signal {
        Signal::Offer(offer) => ServerEvent::Offer { offer, from },
        Signal::Answer(answer) => ServerEvent::Answer { answer, from },
        Signal::IceCandidate(candidate) => ServerEvent::IceCandidate { candidate, from },
        Signal::Chat(message) => {
            let Some(name) = registry.lookup(sender).and_then(|p| p.display_name()) else {
                warn!(
                    session = %sender,
                    partner = %partner,
                    "Relay: paired session has no registry profile, chat dropped"
                );
                return RelayOutcome::Inconsistent;
            };
            ServerEvent::ChatMessage {
                message,
                from: name.to_string(),
                timestamp,
            }
        }
    };

    if registry.send(partner, event) {
        trace!(session = %sender, partner = %partner, "Relay: forwarded");
        RelayOutcome::Forwarded {
            to: partner.clone(),
        }
    } else {
        RelayOutcome::PartnerUnreachable {
            to: partner.clone(),
        }
    }
}
