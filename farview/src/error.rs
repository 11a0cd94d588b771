use std::io;

use thiserror::Error;

/// Fatal failure of a channel
///
/// Channels never recover in place; every variant means the connection is
/// gone and a fresh one must be made.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying socket failed
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// The protocol was violated or authentication failed
    #[error(transparent)]
    Protocol(#[from] proto::Error),
    /// The connection was closed, locally or by the peer
    #[error("connection closed")]
    Closed,
}

impl ChannelError {
    /// Whether this is an orderly close rather than a failure
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
