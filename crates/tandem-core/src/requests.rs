//! Direct request broker: pending invites between two specific sessions.

use crate::participant::SessionId;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tandem_protocol::Profile;
use tracing::debug;

/// An invite waiting for the recipient's answer.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub from: SessionId,
    pub to: SessionId,
    /// Requester profile at the time the invite was sent.
    pub requester: Profile,
    pub created_at: Instant,
}

impl PendingRequest {
    #[must_use]
    pub fn new(from: SessionId, to: SessionId, requester: Profile) -> Self {
        Self {
            from,
            to,
            requester,
            created_at: Instant::now(),
        }
    }

    /// Whether `id` is the sender or the recipient.
    #[must_use]
    pub fn involves(&self, id: &SessionId) -> bool {
        &self.from == id || &self.to == id
    }
}

/// Pending invites indexed by recipient and by sender.
#[derive(Debug, Default)]
pub struct RequestBroker {
    /// Recipient -> invites in arrival order.
    incoming: HashMap<SessionId, Vec<PendingRequest>>,
    /// Sender -> recipients with an outstanding invite.
    outgoing: HashMap<SessionId, HashSet<SessionId>>,
}

impl RequestBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an invite.
    ///
    /// Returns `false` if the same sender already has an invite outstanding
    /// to the same recipient; the stored snapshot is refreshed in that case.
    pub fn insert(&mut self, request: PendingRequest) -> bool {
        let list = self.incoming.entry(request.to.clone()).or_default();

        if let Some(existing) = list.iter_mut().find(|r| r.from == request.from) {
            debug!(from = %request.from, to = %request.to, "Broker: duplicate request");
            existing.requester = request.requester;
            return false;
        }

        debug!(from = %request.from, to = %request.to, "Broker: request stored");
        self.outgoing
            .entry(request.from.clone())
            .or_default()
            .insert(request.to.clone());
        list.push(request);
        true
    }

    /// Remove and return the invite from `from` to `to`.
    pub fn take(&mut self, from: &SessionId, to: &SessionId) -> Option<PendingRequest> {
        let list = self.incoming.get_mut(to)?;
        let index = list.iter().position(|r| &r.from == from)?;
        let request = list.remove(index);
        if list.is_empty() {
            self.incoming.remove(to);
        }
        self.unlink_outgoing(from, to);
        Some(request)
    }

    /// Whether an invite from `from` to `to` is pending.
    #[must_use]
    pub fn contains(&self, from: &SessionId, to: &SessionId) -> bool {
        self.outgoing
            .get(from)
            .map(|targets| targets.contains(to))
            .unwrap_or(false)
    }

    /// Remove every invite where `id` is sender or recipient.
    pub fn purge_involving(&mut self, id: &SessionId) -> Vec<PendingRequest> {
        let mut purged = Vec::new();

        if let Some(list) = self.incoming.remove(id) {
            for request in list {
                self.unlink_outgoing(&request.from, id);
                purged.push(request);
            }
        }

        if let Some(targets) = self.outgoing.remove(id) {
            for to in targets {
                if let Some(list) = self.incoming.get_mut(&to) {
                    if let Some(index) = list.iter().position(|r| &r.from == id) {
                        purged.push(list.remove(index));
                    }
                    if list.is_empty() {
                        self.incoming.remove(&to);
                    }
                }
            }
        }

        if !purged.is_empty() {
            debug!(session = %id, count = purged.len(), "Broker: purged requests");
        }
        purged
    }

    /// Whether `id` has any invite outstanding, sent or received.
    #[must_use]
    pub fn involves(&self, id: &SessionId) -> bool {
        self.incoming.contains_key(id) || self.outgoing.contains_key(id)
    }

    /// Remove invites older than `ttl`.
    pub fn expire(&mut self, ttl: Duration, now: Instant) -> Vec<PendingRequest> {
        let stale: Vec<(SessionId, SessionId)> = self
            .iter()
            .filter(|r| now.saturating_duration_since(r.created_at) >= ttl)
            .map(|r| (r.from.clone(), r.to.clone()))
            .collect();

        stale
            .into_iter()
            .filter_map(|(from, to)| self.take(&from, &to))
            .collect()
    }

    /// Total number of pending invites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.incoming.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.incoming.values().flatten()
    }

    fn unlink_outgoing(&mut self, from: &SessionId, to: &SessionId) {
        if let Some(targets) = self.outgoing.get_mut(from) {
            targets.remove(to);
            if targets.is_empty() {
                self.outgoing.remove(from);
            }
        }
    }
}
