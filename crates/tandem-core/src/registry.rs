//! Session registry: the owner of every [`Participant`].
//!
//! All other components refer to participants by [`SessionId`] only.

use crate::error::LobbyError;
use crate::participant::{Outbox, Participant, Presence, SessionId};
use std::collections::HashMap;
use tandem_protocol::{Profile, ServerEvent};
use tracing::debug;

/// Map of live connections keyed by session ID.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    participants: HashMap<SessionId, Participant>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Create the record for a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the session ID is already in use.
    pub fn connect(&mut self, id: SessionId, outbox: Outbox) -> Result<(), LobbyError> {
        if self.participants.contains_key(&id) {
            return Err(LobbyError::AlreadyConnected(id));
        }
        debug!(session = %id, "Registry: connected");
        self.participants
            .insert(id.clone(), Participant::new(id, outbox));
        Ok(())
    }

    /// Store a profile snapshot for a connected session.
    ///
    /// A session that had no profile yet becomes `Browsing`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected.
    pub fn register(&mut self, id: &SessionId, profile: Profile) -> Result<(), LobbyError> {
        let participant = self
            .participants
            .get_mut(id)
            .ok_or_else(|| LobbyError::NotConnected(id.clone()))?;

        debug!(session = %id, name = %profile.name, "Registry: profile registered");
        participant.set_profile(profile);
        if participant.presence() == Presence::Connected {
            participant.set_presence(Presence::Browsing);
        }
        Ok(())
    }

    /// Change a participant's presence.
    ///
    /// Returns `false` if the session is not connected.
    pub fn update_presence(&mut self, id: &SessionId, presence: Presence) -> bool {
        match self.participants.get_mut(id) {
            Some(participant) => {
                if participant.presence() != presence {
                    debug!(
                        session = %id,
                        from = ?participant.presence(),
                        to = ?presence,
                        "Registry: presence changed"
                    );
                    participant.set_presence(presence);
                }
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn lookup(&self, id: &SessionId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub(crate) fn lookup_mut(&mut self, id: &SessionId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    /// Presence of a session, if connected.
    #[must_use]
    pub fn presence(&self, id: &SessionId) -> Option<Presence> {
        self.participants.get(id).map(Participant::presence)
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.participants.contains_key(id)
    }

    /// Remove a participant record.
    ///
    /// Only the lobby calls this, from its disconnect path, which cascades
    /// the removal into the queue, pending requests and match table.
    pub(crate) fn remove(&mut self, id: &SessionId) -> Option<Participant> {
        let removed = self.participants.remove(id);
        if removed.is_some() {
            debug!(session = %id, "Registry: removed");
        }
        removed
    }

    /// Send an event to a session. Returns `false` if it is not reachable.
    pub fn send(&self, id: &SessionId, event: ServerEvent) -> bool {
        self.participants
            .get(id)
            .map(|p| p.send(event))
            .unwrap_or(false)
    }

    /// Count participants in the given presence state.
    #[must_use]
    pub fn count(&self, presence: Presence) -> usize {
        self.participants
            .values()
            .filter(|p| p.presence() == presence)
            .count()
    }

    /// Iterate over all participants.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }
}
