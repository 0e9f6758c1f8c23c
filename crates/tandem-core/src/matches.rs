//! Match session table: the source of truth for who is paired with whom.

use crate::error::LobbyError;
use crate::participant::SessionId;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

/// How a pairing came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchOrigin {
    /// Produced by the FIFO queue.
    Opportunistic,
    /// Produced by an accepted invite.
    RequestAccepted,
}

impl MatchOrigin {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOrigin::Opportunistic => "opportunistic",
            MatchOrigin::RequestAccepted => "request-accepted",
        }
    }
}

/// One side of a pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEntry {
    pub partner: SessionId,
    pub started_at: Instant,
    pub origin: MatchOrigin,
}

/// Symmetric pairing map. Every entry has a mirror pointing back at it;
/// both are inserted and removed together.
#[derive(Debug, Default)]
pub struct MatchTable {
    entries: HashMap<SessionId, MatchEntry>,
}

impl MatchTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair two sessions.
    ///
    /// # Errors
    ///
    /// Returns an error, inserting nothing, if either side is already paired.
    pub fn pair(
        &mut self,
        a: &SessionId,
        b: &SessionId,
        origin: MatchOrigin,
    ) -> Result<(), LobbyError> {
        if a == b {
            return Err(LobbyError::AlreadyPaired(a.clone()));
        }
        for id in [a, b] {
            if self.entries.contains_key(id) {
                return Err(LobbyError::AlreadyPaired(id.clone()));
            }
        }

        let started_at = Instant::now();
        self.entries.insert(
            a.clone(),
            MatchEntry {
                partner: b.clone(),
                started_at,
                origin,
            },
        );
        self.entries.insert(
            b.clone(),
            MatchEntry {
                partner: a.clone(),
                started_at,
                origin,
            },
        );
        Ok(())
    }

    /// Remove a pairing from either side. Returns the entry that was keyed
    /// by `id`; its mirror is removed as well.
    pub fn unpair(&mut self, id: &SessionId) -> Option<MatchEntry> {
        let entry = self.entries.remove(id)?;
        self.entries.remove(&entry.partner);
        Some(entry)
    }

    #[must_use]
    pub fn partner_of(&self, id: &SessionId) -> Option<&SessionId> {
        self.entries.get(id).map(|e| &e.partner)
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&MatchEntry> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of active pairings.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.entries.len() / 2
    }

    /// Whether every entry is mirrored by its partner.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        self.entries.iter().all(|(id, entry)| {
            self.entries
                .get(&entry.partner)
                .map(|mirror| &mirror.partner == id && mirror.origin == entry.origin)
                .unwrap_or(false)
        })
    }
}
