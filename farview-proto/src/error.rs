use thiserror::Error;

use crate::frame::FrameType;

/// Reasons a channel is torn down
///
/// Every variant is fatal to the connection it occurred on. The protocol has
/// no mid-handshake recovery; the peer retries by reconnecting, which yields
/// fresh ephemeral keys. None of this detail crosses the wire during key
/// exchange - the peer sees a bare `SESSION_REJECT`.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum Error {
    /// A frame header declared a payload longer than the configured maximum
    #[error("frame of {len} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Length the peer declared
        len: usize,
        /// Configured maximum
        limit: usize,
    },
    /// A frame payload could not be parsed as the message its tag names
    #[error("malformed frame")]
    MalformedFrame,
    /// A message arrived outside the phase that expects it
    #[error("unexpected {0} message")]
    UnexpectedMessage(FrameType),
    /// The peer sent a degenerate public key exchange value
    #[error("invalid ephemeral key")]
    InvalidEphemeral,
    /// The peer's proof of the session key did not match ours
    #[error("authentication proof mismatch")]
    ProofMismatch,
    /// The peer offered no key exchange group we support
    #[error("no mutually supported key exchange group")]
    NoCommonGroup,
    /// The account is at its concurrent session cap
    #[error("session limit exceeded")]
    SessionLimitExceeded,
    /// The peer reported a generic authentication failure
    #[error("authentication rejected by peer")]
    Rejected,
    /// An established channel failed to authenticate an inbound frame
    #[error("channel corrupted")]
    ChannelCorrupted,
}
