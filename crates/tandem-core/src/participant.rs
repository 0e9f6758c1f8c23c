//! Participants: one record per live connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tandem_protocol::{Profile, ServerEvent};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Atomic counter keeping generated ids unique within one nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier assigned to a connection by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique session ID.
    #[must_use]
    pub fn generate() -> Self {
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("s_{:x}_{:x}", now_millis(), counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Matchmaking state of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Presence {
    /// Connected but no profile announced yet.
    Connected,
    /// Visible to others and able to receive invites.
    Browsing,
    /// Waiting in the matchmaking queue.
    Queued,
    /// Browsing with at least one invite sent or received.
    RequestPending,
    /// Paired with a partner.
    InSession,
}

impl Presence {
    /// Whether direct invites may be addressed to this participant.
    #[must_use]
    pub fn accepts_requests(self) -> bool {
        matches!(self, Presence::Browsing | Presence::RequestPending)
    }
}

/// Sender half of a connection's outbound event stream.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Pending deferred re-entry into matchmaking.
#[derive(Debug)]
pub(crate) struct ReentryTimer {
    pub(crate) generation: u64,
    pub(crate) handle: AbortHandle,
}

/// A connected client.
#[derive(Debug)]
pub struct Participant {
    id: SessionId,
    profile: Option<Profile>,
    presence: Presence,
    connected_at: u64,
    outbox: Outbox,
    pub(crate) reentry: Option<ReentryTimer>,
}

impl Participant {
    /// Create a participant for a new connection.
    #[must_use]
    pub fn new(id: SessionId, outbox: Outbox) -> Self {
        Self {
            id,
            profile: None,
            presence: Presence::Connected,
            connected_at: now_millis(),
            outbox,
            reentry: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The announced profile, if any.
    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Display name from the profile.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.profile.as_ref().map(|p| p.name.as_str())
    }

    #[must_use]
    pub fn presence(&self) -> Presence {
        self.presence
    }

    /// Connection time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    pub(crate) fn set_profile(&mut self, profile: Profile) {
        self.profile = Some(profile);
    }

    pub(crate) fn set_presence(&mut self, presence: Presence) {
        self.presence = presence;
    }

    /// Queue an event for the client. Returns `false` if the connection is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.outbox.send(event).is_ok()
    }

    /// Abort any scheduled re-entry. Returns `true` if one was pending.
    pub(crate) fn cancel_reentry(&mut self) -> bool {
        match self.reentry.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.cancel_reentry();
    }
}

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_generation() {
        let id1 = SessionId::generate();
        let id2 = SessionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("s_"));
    }

    #[test]
    fn test_new_participant_has_no_profile() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let participant = Participant::new("s-1".into(), tx);

        assert_eq!(participant.presence(), Presence::Connected);
        assert!(participant.display_name().is_none());
        assert!(participant.connected_at() <= now_millis());
        assert!(!participant.presence().accepts_requests());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let participant = Participant::new("s-1".into(), tx);

        assert!(participant.send(ServerEvent::PartnerDisconnected));
        drop(rx);
        assert!(!participant.send(ServerEvent::PartnerDisconnected));
    }
}
