//! Client error types.

use thiserror::Error;
use voxlink_net::{NetError, TransportError};

/// The server assigned an identifier different from the one this client
/// already uses. The session cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("server assigned client id `{assigned}` but this client is already `{local}`")]
pub struct IdentityConflictError {
    /// Identifier the client already had.
    pub local: String,
    /// Identifier the server sent.
    pub assigned: String,
}

/// Errors surfaced by [`crate::Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Fatal identifier mismatch.
    #[error(transparent)]
    IdentityConflict(#[from] IdentityConflictError),
    /// Connecting failed (reconnection disabled or bad endpoint).
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Sending a message failed.
    #[error(transparent)]
    Send(#[from] NetError),
}
