//! Lifecycle controller.
//!
//! [`Lobby`] owns the registry, queue, request broker and match table and is
//! the only code that moves participants between presence states. Each public
//! method is one complete step: it reads and writes all four structures
//! without yielding, so running the lobby inside a single task (see
//! [`crate::manager`]) makes every inbound event atomic.

use crate::error::LobbyError;
use crate::matches::{MatchOrigin, MatchTable};
use crate::participant::{now_millis, Outbox, Presence, ReentryTimer, SessionId};
use crate::queue::MatchQueue;
use crate::registry::SessionRegistry;
use crate::relay::{self, RelayOutcome, Signal};
use crate::requests::{PendingRequest, RequestBroker};
use metrics::counter;
use serde::Serialize;
use std::time::{Duration, Instant};
use tandem_protocol::{ClientEvent, Profile, ProfilePayload, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lobby configuration.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Delay before a partner left behind is put back into matchmaking.
    pub grace_period: Duration,
    /// Age after which unanswered invites are dropped. `None` keeps them.
    pub request_ttl: Option<Duration>,
    /// Maximum chat message length in characters.
    pub max_chat_length: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(1000),
            request_ttl: Some(Duration::from_secs(60)),
            max_chat_length: 2000,
        }
    }
}

/// A grace-period timer that has fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReentryDue {
    pub session: SessionId,
    pub generation: u64,
}

/// Result of entering matchmaking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Paired immediately with the given session.
    Paired(SessionId),
    /// Queued at the given 1-based position.
    Waiting(usize),
}

/// Point-in-time counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStats {
    pub connections: usize,
    pub total_users: usize,
    pub browsing_users: usize,
    pub video_chat_users: usize,
    pub active_matches: usize,
    pub waiting_queue: usize,
    pub pending_requests: usize,
}

/// Public listing entry for a participant with a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub id: SessionId,
    #[serde(flatten)]
    pub profile: Profile,
    pub online: bool,
    pub status: &'static str,
}

/// The session manager state.
pub struct Lobby {
    registry: SessionRegistry,
    queue: MatchQueue,
    requests: RequestBroker,
    matches: MatchTable,
    config: LobbyConfig,
    timers: mpsc::UnboundedSender<ReentryDue>,
    next_generation: u64,
}

impl Lobby {
    /// Create a lobby. Grace-period timers report back through `timers`.
    #[must_use]
    pub fn new(config: LobbyConfig, timers: mpsc::UnboundedSender<ReentryDue>) -> Self {
        info!("Creating lobby with config: {:?}", config);
        Self {
            registry: SessionRegistry::new(),
            queue: MatchQueue::new(),
            requests: RequestBroker::new(),
            matches: MatchTable::new(),
            config,
            timers,
            next_generation: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn queue(&self) -> &MatchQueue {
        &self.queue
    }

    #[must_use]
    pub fn requests(&self) -> &RequestBroker {
        &self.requests
    }

    #[must_use]
    pub fn matches(&self) -> &MatchTable {
        &self.matches
    }

    /// Register a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the session ID is already connected.
    pub fn connect(&mut self, id: SessionId, outbox: Outbox) -> Result<(), LobbyError> {
        self.registry.connect(id, outbox)
    }

    /// Handle one client event, reporting failures back to the client.
    pub fn dispatch(&mut self, id: &SessionId, event: ClientEvent) {
        let result = match event {
            ClientEvent::RegisterPresence(payload) => payload
                .into_presence_profile()
                .map_err(LobbyError::from)
                .and_then(|profile| self.register_presence(id, profile)),

            ClientEvent::Join(payload) => payload
                .into_join_profile()
                .map_err(LobbyError::from)
                .and_then(|profile| self.join(id, profile).map(drop)),

            ClientEvent::SendMatchRequest {
                from_user,
                to_socket_id,
            } => {
                let to = SessionId::from(to_socket_id);
                let sent = from_user
                    .map(ProfilePayload::into_presence_profile)
                    .transpose()
                    .map_err(LobbyError::from)
                    .and_then(|snapshot| self.send_request(id, &to, snapshot));
                if let Err(e) = sent {
                    self.report_request_failure(id, &to, &e);
                }
                Ok(())
            }

            ClientEvent::AcceptMatchRequest { from_socket_id } => {
                let from = SessionId::from(from_socket_id);
                if let Err(e) = self.accept_request(id, &from) {
                    self.report_request_failure(id, &from, &e);
                }
                Ok(())
            }

            ClientEvent::DeclineMatchRequest { from_socket_id } => {
                self.decline_request(id, &SessionId::from(from_socket_id))
            }

            ClientEvent::Stop => self.stop(id).map(drop),

            ClientEvent::Ping { timestamp } => {
                self.registry.send(id, ServerEvent::Pong { timestamp });
                Ok(())
            }

            relayed => match Signal::from_event(relayed) {
                Some(signal) => self.relay(id, signal).map(drop),
                None => Ok(()),
            },
        };

        if let Err(e) = result {
            debug!(session = %id, error = %e, "Event rejected");
            self.registry.send(id, ServerEvent::error(e.to_string()));
        }
    }

    /// Announce a browsing profile.
    ///
    /// A queued session leaves the queue and becomes `Browsing`; a session in
    /// a call only has its snapshot updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected.
    pub fn register_presence(&mut self, id: &SessionId, profile: Profile) -> Result<(), LobbyError> {
        let presence = self
            .registry
            .presence(id)
            .ok_or_else(|| LobbyError::NotConnected(id.clone()))?;

        self.registry.register(id, profile)?;
        self.cancel_reentry(id);
        if presence == Presence::Queued {
            self.queue.remove(id);
            self.registry.update_presence(id, Presence::Browsing);
        }
        self.refresh_request_presence(id);
        debug!(session = %id, "Presence registered");
        Ok(())
    }

    /// Store the profile and enter matchmaking.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected.
    pub fn join(&mut self, id: &SessionId, profile: Profile) -> Result<JoinOutcome, LobbyError> {
        self.registry.register(id, profile)?;
        self.enqueue_or_pair(id)
    }

    /// Pair with the longest-waiting live session, or queue.
    ///
    /// A caller that is currently paired leaves its partner first.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or has no profile.
    pub fn enqueue_or_pair(&mut self, id: &SessionId) -> Result<JoinOutcome, LobbyError> {
        let participant = self
            .registry
            .lookup(id)
            .ok_or_else(|| LobbyError::NotConnected(id.clone()))?;
        if participant.profile().is_none() {
            return Err(LobbyError::ProfileRequired);
        }
        let presence = participant.presence();

        self.cancel_reentry(id);
        if presence == Presence::InSession {
            self.end_match(id);
        }
        self.queue.remove(id);

        while let Some(head) = self.queue.pop_front() {
            if !self.is_waiting(&head) {
                debug!(session = %id, stale = %head, "Skipping stale queue entry");
                continue;
            }
            self.commit_match(id, &head, MatchOrigin::Opportunistic)?;
            return Ok(JoinOutcome::Paired(head));
        }

        let position = self.queue.push(id.clone());
        self.registry.update_presence(id, Presence::Queued);
        self.registry.send(
            id,
            ServerEvent::Waiting {
                queue_position: position,
            },
        );
        debug!(session = %id, position, "Queued");
        Ok(JoinOutcome::Waiting(position))
    }

    /// Leave the current partner, if any, and re-enter matchmaking.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or has no profile.
    pub fn stop(&mut self, id: &SessionId) -> Result<JoinOutcome, LobbyError> {
        debug!(session = %id, "Stop requested");
        self.enqueue_or_pair(id)
    }

    /// Send an invite from `from` to `to`.
    ///
    /// `snapshot` overrides the requester profile shown to the recipient; a
    /// sender without a registered profile is registered with it. Returns
    /// `false` if an identical invite was already pending.
    ///
    /// # Errors
    ///
    /// Fails without changing state if the target is not browsing, the sender
    /// cannot send invites, or no requester profile is available.
    pub fn send_request(
        &mut self,
        from: &SessionId,
        to: &SessionId,
        snapshot: Option<Profile>,
    ) -> Result<bool, LobbyError> {
        if from == to {
            return Err(LobbyError::SelfRequest);
        }

        let sender = self
            .registry
            .lookup(from)
            .ok_or_else(|| LobbyError::NotConnected(from.clone()))?;
        let needs_registration = sender.profile().is_none();
        if !needs_registration && !sender.presence().accepts_requests() {
            return Err(LobbyError::SenderUnavailable);
        }
        let requester = snapshot
            .or_else(|| sender.profile().cloned())
            .ok_or(LobbyError::ProfileRequired)?;

        let available = self
            .registry
            .lookup(to)
            .map(|p| p.profile().is_some() && p.presence().accepts_requests())
            .unwrap_or(false);
        if !available {
            return Err(LobbyError::TargetUnavailable(to.clone()));
        }

        if needs_registration {
            self.registry.register(from, requester.clone())?;
        }
        // Inviting someone is an explicit choice to keep browsing.
        self.cancel_reentry(from);

        let fresh = self
            .requests
            .insert(PendingRequest::new(from.clone(), to.clone(), requester.clone()));
        if fresh {
            self.registry.send(
                to,
                ServerEvent::MatchRequestReceived {
                    from: requester,
                    from_socket_id: from.to_string(),
                },
            );
            info!(from = %from, to = %to, "Match request sent");
            counter!("tandem_match_requests_total", "outcome" => "sent").increment(1);
        }
        self.registry.send(
            from,
            ServerEvent::MatchRequestSent {
                to_socket_id: to.to_string(),
            },
        );

        self.refresh_request_presence(from);
        self.refresh_request_presence(to);
        Ok(fresh)
    }

    /// Accept the invite `from` sent to `acceptor` and pair them directly.
    ///
    /// Every other invite involving either side is withdrawn.
    ///
    /// # Errors
    ///
    /// Returns an error if no such invite is pending, the acceptor is already
    /// paired, or the requester is no longer available.
    pub fn accept_request(&mut self, acceptor: &SessionId, from: &SessionId) -> Result<(), LobbyError> {
        if !self.requests.contains(from, acceptor) {
            return Err(LobbyError::RequestNotFound {
                from: from.clone(),
                to: acceptor.clone(),
            });
        }
        match self.registry.presence(acceptor) {
            None => return Err(LobbyError::NotConnected(acceptor.clone())),
            Some(Presence::InSession) => return Err(LobbyError::AlreadyPaired(acceptor.clone())),
            Some(_) => {}
        }
        if matches!(self.registry.presence(from), None | Some(Presence::InSession)) {
            self.requests.take(from, acceptor);
            self.refresh_request_presence(acceptor);
            return Err(LobbyError::TargetUnavailable(from.clone()));
        }

        self.requests.take(from, acceptor);
        self.commit_match(from, acceptor, MatchOrigin::RequestAccepted)?;
        counter!("tandem_match_requests_total", "outcome" => "accepted").increment(1);

        if let Some(profile) = self.registry.lookup(acceptor).and_then(|p| p.profile()) {
            let event = ServerEvent::MatchRequestAccepted {
                partner: profile.clone(),
                partner_socket_id: acceptor.to_string(),
                initiator: true,
            };
            self.registry.send(from, event);
        }
        Ok(())
    }

    /// Decline the invite `from` sent to `acceptor`. Other invites are untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if no such invite is pending.
    pub fn decline_request(&mut self, acceptor: &SessionId, from: &SessionId) -> Result<(), LobbyError> {
        self.requests
            .take(from, acceptor)
            .ok_or_else(|| LobbyError::RequestNotFound {
                from: from.clone(),
                to: acceptor.clone(),
            })?;

        self.registry.send(
            from,
            ServerEvent::MatchRequestDeclined {
                from_socket_id: acceptor.to_string(),
            },
        );
        self.refresh_request_presence(from);
        self.refresh_request_presence(acceptor);
        debug!(from = %from, to = %acceptor, "Match request declined");
        counter!("tandem_match_requests_total", "outcome" => "declined").increment(1);
        Ok(())
    }

    /// Forward a signal to the sender's partner.
    ///
    /// # Errors
    ///
    /// Returns an error if a chat message exceeds the configured length.
    pub fn relay(&mut self, id: &SessionId, signal: Signal) -> Result<RelayOutcome, LobbyError> {
        if let Signal::Chat(text) = &signal {
            let len = text.chars().count();
            if len > self.config.max_chat_length {
                return Err(LobbyError::MessageTooLong {
                    len,
                    max: self.config.max_chat_length,
                });
            }
        }
        let kind = signal.kind();
        let outcome = relay::route(&self.registry, &self.matches, id, signal, now_millis());
        match &outcome {
            RelayOutcome::Forwarded { .. } => {
                counter!("tandem_relayed_messages_total", "kind" => kind).increment(1);
            }
            RelayOutcome::NoSession => {
                counter!("tandem_relay_dropped_total", "reason" => "no-session").increment(1);
            }
            RelayOutcome::Inconsistent => {
                counter!("tandem_relay_dropped_total", "reason" => "inconsistent").increment(1);
            }
            RelayOutcome::PartnerUnreachable { .. } => {
                counter!("tandem_relay_dropped_total", "reason" => "unreachable").increment(1);
            }
        }
        Ok(outcome)
    }

    /// Remove a disconnected session and everything that refers to it.
    ///
    /// This is the only path that deletes registry records. A partner left
    /// behind is notified and re-enters matchmaking after the grace period.
    /// Returns `false` if the session was not connected.
    pub fn remove_session(&mut self, id: &SessionId) -> bool {
        let Some(connected_at) = self.registry.lookup(id).map(|p| p.connected_at()) else {
            return false;
        };

        self.queue.remove(id);
        self.withdraw_requests(id, "User disconnected");
        self.end_match(id);
        self.registry.remove(id);

        info!(
            session = %id,
            connected_ms = now_millis().saturating_sub(connected_at),
            "Session removed"
        );
        true
    }

    /// Handle a fired grace-period timer.
    ///
    /// Does nothing if the timer was cancelled or superseded, the session is
    /// gone, or it was queued or paired since the timer was armed. Invites
    /// received in the meantime do not keep it out of matchmaking.
    pub fn on_reentry_due(&mut self, due: ReentryDue) -> Option<JoinOutcome> {
        let participant = self.registry.lookup_mut(&due.session)?;
        match &participant.reentry {
            Some(timer) if timer.generation == due.generation => {}
            _ => {
                debug!(session = %due.session, "Re-entry timer superseded");
                return None;
            }
        }
        participant.reentry = None;

        if !matches!(
            participant.presence(),
            Presence::Browsing | Presence::RequestPending
        ) {
            debug!(
                session = %due.session,
                presence = ?participant.presence(),
                "Re-entry skipped, state changed"
            );
            return None;
        }

        debug!(session = %due.session, "Grace period over, re-entering matchmaking");
        self.enqueue_or_pair(&due.session).ok()
    }

    /// Drop invites older than the configured TTL, notifying both sides.
    pub fn expire_requests(&mut self, now: Instant) -> usize {
        let Some(ttl) = self.config.request_ttl else {
            return 0;
        };

        let expired = self.requests.expire(ttl, now);
        for request in &expired {
            self.registry.send(
                &request.from,
                ServerEvent::MatchRequestFailed {
                    to_socket_id: request.to.to_string(),
                    message: "Match request expired".to_string(),
                },
            );
            self.registry.send(
                &request.to,
                ServerEvent::MatchRequestCancelled {
                    from_socket_id: request.from.to_string(),
                },
            );
            self.refresh_request_presence(&request.from);
            self.refresh_request_presence(&request.to);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired match requests");
            counter!("tandem_match_requests_total", "outcome" => "expired")
                .increment(expired.len() as u64);
        }
        expired.len()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> LobbyStats {
        let browsing = self.registry.count(Presence::Browsing)
            + self.registry.count(Presence::RequestPending);
        let chatting =
            self.registry.count(Presence::Queued) + self.registry.count(Presence::InSession);

        LobbyStats {
            connections: self.registry.len(),
            total_users: browsing + chatting,
            browsing_users: browsing,
            video_chat_users: chatting,
            active_matches: self.matches.pair_count(),
            waiting_queue: self.queue.len(),
            pending_requests: self.requests.len(),
        }
    }

    /// Every participant that has announced a profile.
    #[must_use]
    pub fn online_users(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = self
            .registry
            .iter()
            .filter_map(|p| {
                let status = match p.presence() {
                    Presence::Connected => return None,
                    Presence::Browsing | Presence::RequestPending => "browsing",
                    Presence::Queued | Presence::InSession => "in-chat",
                };
                p.profile().map(|profile| OnlineUser {
                    id: p.id().clone(),
                    profile: profile.clone(),
                    online: true,
                    status,
                })
            })
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    /// Pair two sessions and notify both. `initiator` starts negotiation.
    fn commit_match(
        &mut self,
        initiator: &SessionId,
        responder: &SessionId,
        origin: MatchOrigin,
    ) -> Result<(), LobbyError> {
        let profile_of = |id: &SessionId| {
            self.registry
                .lookup(id)
                .and_then(|p| p.profile())
                .map(Profile::summary)
                .ok_or(LobbyError::ProfileRequired)
        };
        let initiator_summary = profile_of(initiator)?;
        let responder_summary = profile_of(responder)?;

        self.matches.pair(initiator, responder, origin)?;

        // Invites between the two are settled by the pairing itself.
        self.requests.take(initiator, responder);
        self.requests.take(responder, initiator);

        for id in [initiator, responder] {
            self.queue.remove(id);
            self.cancel_reentry(id);
            self.registry.update_presence(id, Presence::InSession);
            self.withdraw_requests(id, "User is no longer available");
        }

        self.registry.send(
            initiator,
            ServerEvent::Matched {
                partner: responder_summary,
                initiator: true,
            },
        );
        self.registry.send(
            responder,
            ServerEvent::Matched {
                partner: initiator_summary,
                initiator: false,
            },
        );

        info!(
            initiator = %initiator,
            responder = %responder,
            origin = origin.as_str(),
            "Match created"
        );
        counter!("tandem_matches_total", "origin" => origin.as_str()).increment(1);
        Ok(())
    }

    /// Tear down the pairing of `id`, if any. The partner is told and its
    /// re-entry is scheduled. Returns the former partner.
    fn end_match(&mut self, id: &SessionId) -> Option<SessionId> {
        let entry = self.matches.unpair(id)?;
        let partner = entry.partner;

        self.registry.update_presence(id, Presence::Browsing);
        info!(
            session = %id,
            partner = %partner,
            duration_ms = entry.started_at.elapsed().as_millis() as u64,
            "Match ended"
        );

        if self.registry.contains(&partner) {
            self.registry.send(&partner, ServerEvent::PartnerDisconnected);
            self.registry.update_presence(&partner, Presence::Browsing);
            self.schedule_reentry(&partner);
        } else {
            warn!(session = %id, partner = %partner, "Match partner missing from registry");
        }
        Some(partner)
    }

    /// Arm the grace-period timer for `id`, replacing any pending one.
    fn schedule_reentry(&mut self, id: &SessionId) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let delay = self.config.grace_period;
        let deadline = tokio::time::Instant::now() + delay;
        let timers = self.timers.clone();
        let session = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = timers.send(ReentryDue {
                session,
                generation,
            });
        });

        match self.registry.lookup_mut(id) {
            Some(participant) => {
                participant.cancel_reentry();
                participant.reentry = Some(ReentryTimer {
                    generation,
                    handle: task.abort_handle(),
                });
                debug!(session = %id, generation, delay_ms = delay.as_millis() as u64, "Re-entry scheduled");
            }
            None => task.abort(),
        }
    }

    fn cancel_reentry(&mut self, id: &SessionId) {
        if let Some(participant) = self.registry.lookup_mut(id) {
            if participant.cancel_reentry() {
                debug!(session = %id, "Re-entry cancelled");
            }
        }
    }

    /// Remove every invite involving `id` and tell the other side.
    fn withdraw_requests(&mut self, id: &SessionId, reason: &str) {
        for request in self.requests.purge_involving(id) {
            let counterpart = if &request.from == id {
                self.registry.send(
                    &request.to,
                    ServerEvent::MatchRequestCancelled {
                        from_socket_id: id.to_string(),
                    },
                );
                request.to
            } else {
                self.registry.send(
                    &request.from,
                    ServerEvent::MatchRequestFailed {
                        to_socket_id: id.to_string(),
                        message: reason.to_string(),
                    },
                );
                request.from
            };
            self.refresh_request_presence(&counterpart);
        }
        self.refresh_request_presence(id);
    }

    /// Keep `Browsing` / `RequestPending` in step with the broker.
    fn refresh_request_presence(&mut self, id: &SessionId) {
        let involved = self.requests.involves(id);
        match self.registry.presence(id) {
            Some(Presence::Browsing) if involved => {
                self.registry.update_presence(id, Presence::RequestPending);
            }
            Some(Presence::RequestPending) if !involved => {
                self.registry.update_presence(id, Presence::Browsing);
            }
            _ => {}
        }
    }

    fn is_waiting(&self, id: &SessionId) -> bool {
        self.registry.presence(id) == Some(Presence::Queued) && !self.matches.contains(id)
    }

    fn report_request_failure(&self, id: &SessionId, target: &SessionId, error: &LobbyError) {
        debug!(session = %id, target = %target, error = %error, "Match request failed");
        counter!("tandem_match_requests_total", "outcome" => "failed").increment(1);
        self.registry.send(
            id,
            ServerEvent::MatchRequestFailed {
                to_socket_id: target.to_string(),
                message: error.to_string(),
            },
        );
    }
}
