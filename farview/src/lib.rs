//! Secure channel for the farview remote-access platform
//!
//! A farview host listens on a TCP port and admits clients only after a
//! zero-knowledge password-authenticated key exchange (SRP-6a); everything
//! after that - desktop control, file transfer, system-info queries - rides
//! on encrypted, authenticated frames under keys derived from the exchange.
//! This crate provides the tokio-based channel; the protocol logic itself
//! lives in farview-proto and runs the same under any event loop.
//!
//! The entry points are [`HostEndpoint`] on the accepting side and
//! [`connect`] on the initiating side. Both yield a [`SecureChannel`]: a
//! plain message-in/message-out pipe whose encryption, keepalive and
//! session accounting are handled underneath.
//!
//! ```no_run
//! use std::sync::Arc;
//! use farview::{ChannelConfig, HostEndpoint};
//! use farview::proto::{Account, SrpGroup, UserStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(UserStore::new(
//!     [Account::enroll("operator", "correct horse", SrpGroup::modp_2048())],
//!     UserStore::generate_seed(),
//! ));
//! let endpoint = HostEndpoint::bind("0.0.0.0:8050", store, ChannelConfig::default()).await?;
//! loop {
//!     let connecting = endpoint.accept().await?;
//!     tokio::spawn(async move {
//!         if let Ok(mut channel) = connecting.authenticate().await {
//!             while let Ok(message) = channel.recv().await {
//!                 // hand off to the desktop / file-transfer layer
//!                 let _ = message;
//!             }
//!         }
//!     });
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

mod channel;
mod config;
mod endpoint;
mod error;

pub use proto;
pub use proto::{Account, AccountFlags, SessionKind, Side, SrpGroup, UserStore};

pub use crate::channel::SecureChannel;
pub use crate::config::ChannelConfig;
pub use crate::endpoint::{connect, Connecting, HostEndpoint};
pub use crate::error::ChannelError;
