//! # tandem-core
//!
//! Matchmaking and signaling-relay state for Tandem.
//!
//! This crate provides the building blocks of the session manager:
//!
//! - **Registry** - One participant record per live connection
//! - **Queue** - FIFO of sessions waiting for an opportunistic partner
//! - **Requests** - Direct invites between two browsing sessions
//! - **Matches** - Symmetric table of active pairings
//! - **Relay** - Forwards offer/answer/ICE and chat to the current partner
//! - **Lobby** - Lifecycle controller tying the above together
//! - **Manager** - Actor task that owns the lobby
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  Command   ┌─────────────────────────────────────────┐
//! │  Connection │──────────▶│ SessionManager (one task)               │
//! └─────────────┘            │                                         │
//!        ▲                   │  Lobby ─┬─ SessionRegistry              │
//!        │   ServerEvent     │         ├─ MatchQueue                   │
//!        └───────────────────│         ├─ RequestBroker                │
//!           (outbox)         │         └─ MatchTable ──▶ relay::route  │
//!                            │                                         │
//!                            │  ◀── ReentryDue (grace-period timers)   │
//!                            └─────────────────────────────────────────┘
//! ```

pub mod error;
pub mod lobby;
pub mod manager;
pub mod matches;
pub mod participant;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod requests;

pub use error::LobbyError;
pub use lobby::{JoinOutcome, Lobby, LobbyConfig, LobbyStats, OnlineUser, ReentryDue};
pub use manager::{Command, ManagerError, ManagerHandle, SessionManager};
pub use matches::{MatchEntry, MatchOrigin, MatchTable};
pub use participant::{now_millis, Outbox, Participant, Presence, SessionId};
pub use queue::MatchQueue;
pub use registry::SessionRegistry;
pub use relay::{RelayOutcome, Signal};
pub use requests::{PendingRequest, RequestBroker};
