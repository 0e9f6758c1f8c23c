//! Session manager errors.

use crate::participant::SessionId;
use tandem_protocol::ValidationError;
use thiserror::Error;

/// Errors returned by lobby operations.
///
/// An operation that fails leaves the registry, queue and match table as they
/// were. The one exception is accepting an invite whose sender has since
/// paired elsewhere: that invite is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LobbyError {
    /// Payload failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No connection with this ID.
    #[error("Session not connected: {0}")]
    NotConnected(SessionId),

    /// Session is already registered.
    #[error("Session already connected: {0}")]
    AlreadyConnected(SessionId),

    /// The operation needs a profile and none was announced.
    #[error("Profile required; send register-presence or join first")]
    ProfileRequired,

    /// Invite target is not browsing.
    #[error("User is not available")]
    TargetUnavailable(SessionId),

    /// Invite sender cannot send invites in its current state.
    #[error("You cannot send match requests right now")]
    SenderUnavailable,

    /// Invite addressed to oneself.
    #[error("Cannot send a match request to yourself")]
    SelfRequest,

    /// No pending invite between these sessions.
    #[error("No pending match request from {from}")]
    RequestNotFound {
        /// Requester.
        from: SessionId,
        /// Recipient.
        to: SessionId,
    },

    /// Session already has a partner.
    #[error("Session already paired: {0}")]
    AlreadyPaired(SessionId),

    /// Chat text exceeds the configured limit.
    #[error("Message too long: {len} characters (max {max})")]
    MessageTooLong {
        /// Length of the rejected message.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}
