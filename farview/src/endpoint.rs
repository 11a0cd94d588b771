use std::{io, net::SocketAddr, sync::Arc};

use proto::{SessionKind, UserStore};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::{ChannelConfig, ChannelError, SecureChannel};

/// Host-side listener handing out authenticated channels
///
/// Owns the user store for the lifetime of the process; every accepted
/// connection authenticates against it before the caller ever sees a
/// channel. Accepting returns before the handshake runs so one slow or
/// hostile peer cannot stall the listener; spawn
/// [`Connecting::authenticate`] per connection.
pub struct HostEndpoint {
    listener: TcpListener,
    store: Arc<UserStore>,
    config: ChannelConfig,
}

impl HostEndpoint {
    /// Bind a listener and associate it with a user store
    pub async fn bind(
        addr: impl ToSocketAddrs,
        store: Arc<UserStore>,
        config: ChannelConfig,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            store,
            config,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Wait for the next incoming connection
    pub async fn accept(&self) -> io::Result<Connecting> {
        let (stream, remote) = self.listener.accept().await?;
        debug!(%remote, "connection accepted");
        stream.set_nodelay(true)?;
        Ok(Connecting {
            stream,
            remote,
            store: self.store.clone(),
            config: self.config.clone(),
        })
    }

    /// The store this endpoint authenticates against
    pub fn store(&self) -> &Arc<UserStore> {
        &self.store
    }
}

/// An accepted connection that has not yet authenticated
pub struct Connecting {
    stream: TcpStream,
    remote: SocketAddr,
    store: Arc<UserStore>,
    config: ChannelConfig,
}

impl Connecting {
    /// Peer address of the pending connection
    pub fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    /// Run the key exchange; yields an established channel or the reason
    /// the peer was turned away
    pub async fn authenticate(self) -> Result<SecureChannel, ChannelError> {
        SecureChannel::accept(self.stream, self.store, self.config).await
    }
}

/// Connect to a host and authenticate as `username`
pub async fn connect(
    addr: impl ToSocketAddrs,
    username: &str,
    password: &str,
    session_kind: SessionKind,
    config: ChannelConfig,
) -> Result<SecureChannel, ChannelError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    SecureChannel::connect(stream, username, password, session_kind, config).await
}
