//! Session manager actor.
//!
//! One task owns the [`Lobby`] and processes connection commands, fired
//! grace-period timers and the request expiry sweep one at a time. Every
//! other task talks to it through a cloneable [`ManagerHandle`].

use crate::error::LobbyError;
use crate::lobby::{Lobby, LobbyConfig, LobbyStats, OnlineUser, ReentryDue};
use crate::participant::{Outbox, SessionId};
use std::time::{Duration, Instant};
use tandem_protocol::ClientEvent;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Interval between request expiry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Errors returned by [`ManagerHandle`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    /// The actor task has stopped.
    #[error("session manager is not running")]
    Closed,

    #[error(transparent)]
    Lobby(#[from] LobbyError),
}

/// Work item for the actor.
#[derive(Debug)]
pub enum Command {
    Connect {
        session: SessionId,
        outbox: Outbox,
        reply: oneshot::Sender<Result<(), LobbyError>>,
    },
    Event {
        session: SessionId,
        event: ClientEvent,
    },
    Disconnect {
        session: SessionId,
    },
    Stats {
        reply: oneshot::Sender<LobbyStats>,
    },
    OnlineUsers {
        reply: oneshot::Sender<Vec<OnlineUser>>,
    },
}

/// Cloneable handle to a running [`SessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<Command>,
}

impl ManagerHandle {
    /// Register a connection. Server events for it are pushed to `outbox`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session ID is taken or the manager stopped.
    pub async fn connect(&self, session: SessionId, outbox: Outbox) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect {
            session,
            outbox,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ManagerError::Closed)??;
        Ok(())
    }

    /// Submit a client event. Outcomes arrive on the session's outbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager stopped.
    pub async fn dispatch(&self, session: SessionId, event: ClientEvent) -> Result<(), ManagerError> {
        self.send(Command::Event { session, event }).await
    }

    /// Report a closed connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager stopped.
    pub async fn disconnect(&self, session: SessionId) -> Result<(), ManagerError> {
        self.send(Command::Disconnect { session }).await
    }

    /// Snapshot of the lobby counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager stopped.
    pub async fn stats(&self) -> Result<LobbyStats, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| ManagerError::Closed)
    }

    /// Participants that have announced a profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager stopped.
    pub async fn online_users(&self) -> Result<Vec<OnlineUser>, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::OnlineUsers { reply }).await?;
        rx.await.map_err(|_| ManagerError::Closed)
    }

    async fn send(&self, command: Command) -> Result<(), ManagerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ManagerError::Closed)
    }
}

/// The actor owning all matchmaking state.
pub struct SessionManager {
    lobby: Lobby,
    commands: mpsc::Receiver<Command>,
    timers: mpsc::UnboundedReceiver<ReentryDue>,
}

impl SessionManager {
    /// Start the actor on the current runtime.
    ///
    /// `buffer` bounds the command channel. The task exits once every
    /// [`ManagerHandle`] has been dropped.
    #[must_use]
    pub fn spawn(config: LobbyConfig, buffer: usize) -> (ManagerHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::channel(buffer.max(1));
        let (timers_tx, timers) = mpsc::unbounded_channel();

        let manager = Self {
            lobby: Lobby::new(config, timers_tx),
            commands,
            timers,
        };
        let task = tokio::spawn(manager.run());

        (
            ManagerHandle {
                commands: commands_tx,
            },
            task,
        )
    }

    async fn run(mut self) {
        info!("Session manager started");

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                Some(due) = self.timers.recv() => {
                    self.lobby.on_reentry_due(due);
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },

                _ = sweep.tick() => {
                    self.lobby.expire_requests(Instant::now());
                }
            }
        }

        info!("Session manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                session,
                outbox,
                reply,
            } => {
                let result = self.lobby.connect(session, outbox);
                if let Err(e) = &result {
                    warn!(error = %e, "Connect rejected");
                }
                let _ = reply.send(result);
            }
            Command::Event { session, event } => {
                if event.is_relayed() {
                    trace!(session = %session, event = event.name(), "Relay event");
                } else {
                    debug!(session = %session, event = event.name(), "Event");
                }
                self.lobby.dispatch(&session, event);
            }
            Command::Disconnect { session } => {
                self.lobby.remove_session(&session);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.lobby.stats());
            }
            Command::OnlineUsers { reply } => {
                let _ = reply.send(self.lobby.online_users());
            }
        }
    }
}
