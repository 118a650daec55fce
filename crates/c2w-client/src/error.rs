//! Client error types.

use std::io;

use thiserror::Error;

use crate::session::ClientState;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol/framing error.
    #[error("protocol error: {0}")]
    Protocol(#[from] c2w_protocol::ProtocolError),

    /// Error raised by the embedded server.
    #[error(transparent)]
    Server(#[from] c2w_server::ServerError),

    /// Connection to server failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation not allowed in the current session state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ClientState,
    },

    /// Movie title not in the catalog.
    #[error("no movie titled {0:?} in the catalog")]
    UnknownMovie(String),

    /// User name cannot be sent.
    #[error("invalid user name {name:?}: {reason}")]
    InvalidUserName { name: String, reason: &'static str },

    /// The connection task has stopped.
    #[error("client connection is closed")]
    Closed,
}

impl ClientError {
    pub(crate) fn invalid_state(operation: &'static str, state: ClientState) -> Self {
        Self::InvalidState { operation, state }
    }
}
