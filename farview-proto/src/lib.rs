//! Protocol logic for the farview secure channel
//!
//! farview-proto contains a fully deterministic implementation of the
//! channel protocol: length-prefixed framing, the SRP-6a key exchange run
//! between a connecting client and an accepting host, the credential store
//! consulted during that exchange, and the authenticated encryption applied
//! to every frame afterwards. It contains no networking code and never
//! blocks; most users want the tokio-based farview API instead.
//!
//! The important types are [`FrameCodec`], which turns a raw byte stream
//! into discrete frames, [`Authenticator`], which owns a connection's
//! unauthenticated phase for one of the two roles, [`UserStore`], the one
//! piece of state shared between connections, and [`ChannelCrypto`], the
//! per-direction cipher state installed once an exchange completes.

#![warn(missing_docs)]
#![cfg_attr(test, allow(dead_code))]

use std::{fmt, ops};

mod coding;
mod constant_time;

pub mod auth;
pub use auth::{AuthOutcome, AuthStep, Authenticator, ClientAuthenticator, HostAuthenticator,
    SessionGuard, SessionHandoff};

pub mod crypto;
pub use crypto::{srp::SrpGroup, ChannelCrypto, InboundFrame, SessionKey};

mod error;
pub use error::Error;

mod frame;
pub use frame::{Frame, FrameCodec, FrameType, HEADER_SIZE};

pub mod handshake;
pub use handshake::SessionKind;

mod users;
pub use users::{Account, AccountFlags, AccountView, UserStore, SEED_LEN};


/// Default cap on a single frame's payload, in bytes
///
/// Large enough for an encoded desktop region or a file-transfer block,
/// small enough that a hostile peer cannot balloon the receive buffer.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Whether an endpoint accepted or initiated its connection
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Side {
    /// The accepting side, which verifies connecting peers
    Host = 0,
    /// The initiating side, which proves an account password
    Client = 1,
}

impl Side {
    #[inline]
    /// Shorthand for `self == Side::Host`
    pub fn is_host(self) -> bool {
        self == Side::Host
    }

    #[inline]
    /// Shorthand for `self == Side::Client`
    pub fn is_client(self) -> bool {
        self == Side::Client
    }
}

impl ops::Not for Side {
    type Output = Side;
    fn not(self) -> Side {
        match self {
            Side::Host => Side::Client,
            Side::Client => Side::Host,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            Side::Host => "host",
            Side::Client => "client",
        })
    }
}
