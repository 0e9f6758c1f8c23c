//! # tandem-protocol
//!
//! Socket event protocol for the Tandem matchmaking and signaling server.
//!
//! This crate defines the events exchanged between browser clients and the
//! server, the profile payloads they carry, and the codecs used on the wire.
//!
//! ## Events
//!
//! - `register-presence` / `join` - Announce a profile, browse or queue
//! - `send-match-request` / `accept-match-request` / `decline-match-request` - Direct invites
//! - `offer` / `answer` / `ice-candidate` / `chat-message` - Relayed to the partner
//! - `waiting` / `matched` / `partner-disconnected` - Matchmaking progress
//!
//! ## Example
//!
//! ```rust
//! use tandem_protocol::{codec, ClientEvent, ProfilePayload};
//!
//! let event = ClientEvent::Join(ProfilePayload::new("Alice", 27, "female"));
//!
//! let text = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&text).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod payload;
pub mod profile;

pub use codec::{decode, encode, ProtocolError};
pub use events::{ClientEvent, ServerEvent};
pub use payload::SignalPayload;
pub use profile::{Mode, PartnerSummary, Profile, ProfilePayload, ValidationError};

/// Protocol version announced in the `connected` event.
pub const PROTOCOL_VERSION: u8 = 1;
