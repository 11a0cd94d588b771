use std::{sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use proto::{
    AuthOutcome, Authenticator, ChannelCrypto, ClientAuthenticator, Frame, FrameCodec,
    HostAuthenticator, InboundFrame, SessionGuard, SessionHandoff, SessionKind, UserStore,
};
use tokio::{
    io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{mpsc, Notify},
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info_span, trace, Instrument};

use crate::{ChannelConfig, ChannelError};

/// Bytes pulled off the socket per read
const READ_CHUNK: usize = 64 * 1024;

/// Frames buffered in each direction before backpressure
const BACKLOG: usize = 64;

/// An authenticated, encrypted message channel over a stream transport
///
/// A channel starts unauthenticated: inbound frames are routed exclusively
/// to the role's handshake driver and nothing else may be sent. Once the
/// key exchange completes the channel is established, every outbound
/// message is sealed and every inbound frame opened before delivery, and
/// the upper layer sees nothing but plaintext messages and a final close
/// reason. There is no way back: any failure, including a single corrupted
/// frame, closes the channel for good.
///
/// Each channel owns its socket, its receive buffer and (while it lasts)
/// its handshake state; nothing is shared between connections except the
/// [`UserStore`] the host consults.
#[derive(Debug)]
pub struct SecureChannel {
    outbound: mpsc::Sender<Bytes>,
    events: mpsc::Receiver<Event>,
    shutdown: Arc<Notify>,
    username: String,
    session_kind: SessionKind,
}

enum Event {
    Message(Bytes),
    Closed(ChannelError),
}

impl SecureChannel {
    /// Authenticate a freshly accepted connection (host role)
    ///
    /// Runs the full key exchange against `store` before returning; on any
    /// failure the peer has already received a generic reject and the
    /// connection is dead.
    pub async fn accept<S>(
        stream: S,
        store: Arc<UserStore>,
        config: ChannelConfig,
    ) -> Result<Self, ChannelError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let auth = Authenticator::Host(HostAuthenticator::new(store));
        Self::establish(stream, auth, config).await
    }

    /// Authenticate against a host (client role)
    pub async fn connect<S>(
        stream: S,
        username: &str,
        password: &str,
        session_kind: SessionKind,
        config: ChannelConfig,
    ) -> Result<Self, ChannelError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let auth =
            Authenticator::Client(ClientAuthenticator::new(username, password, session_kind));
        Self::establish(stream, auth, config).await
    }

    async fn establish<S>(
        mut stream: S,
        auth: Authenticator,
        config: ChannelConfig,
    ) -> Result<Self, ChannelError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let side = auth.side();
        let mut codec = FrameCodec::new(config.max_frame_size);
        let handoff = run_handshake(&mut stream, &mut codec, auth).await?;
        let SessionHandoff {
            username,
            session_kind,
            key,
            session,
        } = handoff;
        let crypto = ChannelCrypto::new(&key, side);
        drop(key);

        let (event_tx, event_rx) = mpsc::channel(BACKLOG);
        let (outbound_tx, outbound_rx) = mpsc::channel(BACKLOG);
        let shutdown = Arc::new(Notify::new());
        let (read, write) = split(stream);
        let driver = Driver {
            read,
            write,
            codec,
            crypto,
            events: event_tx,
            outbound: outbound_rx,
            shutdown: shutdown.clone(),
            keepalive: config.keepalive_interval,
            _session: session,
        };
        let span = info_span!("channel", %side, username = %username);
        tokio::spawn(driver.run().instrument(span));

        Ok(Self {
            outbound: outbound_tx,
            events: event_rx,
            shutdown,
            username,
            session_kind,
        })
    }

    /// Seal and transmit one application message
    ///
    /// Applies backpressure once the outbound queue is full.
    pub async fn send(&self, message: Bytes) -> Result<(), ChannelError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Receive the next decrypted application message
    ///
    /// Fails with the close reason once the channel is gone; keepalive
    /// traffic is handled internally and never shows up here.
    pub async fn recv(&mut self) -> Result<Bytes, ChannelError> {
        match self.events.recv().await {
            Some(Event::Message(message)) => Ok(message),
            Some(Event::Closed(reason)) => Err(reason),
            None => Err(ChannelError::Closed),
        }
    }

    /// Close the channel
    ///
    /// Idempotent: closing an already-closed channel does nothing. The
    /// account's session slot is released as part of teardown.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Authenticated account name: the peer's on the host side, our own on
    /// the client side
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Service the client asked for during the handshake
    pub fn session_kind(&self) -> SessionKind {
        self.session_kind
    }
}

/// Drive the handshake to a terminal state over an unsplit stream
async fn run_handshake<S>(
    stream: &mut S,
    codec: &mut FrameCodec,
    mut auth: Authenticator,
) -> Result<SessionHandoff, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let opening = auth.start();
    debug_assert!(opening.outcome.is_none());
    send_frames(stream, &opening.send).await?;

    let mut chunk = vec![0; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ChannelError::Closed);
        }
        codec.push_bytes(&chunk[..n]);
        while let Some(frame) = codec.next_frame()? {
            let step = auth.handle_frame(&frame);
            // Replies (including a generic reject) go out before we act on
            // the outcome
            send_frames(stream, &step.send).await?;
            match step.outcome {
                Some(AuthOutcome::Established(handoff)) => return Ok(handoff),
                Some(AuthOutcome::Rejected(error)) => return Err(error.into()),
                None => {}
            }
        }
    }
}

async fn send_frames<S: AsyncWrite + Unpin>(
    stream: &mut S,
    frames: &[Frame],
) -> Result<(), ChannelError> {
    if frames.is_empty() {
        return Ok(());
    }
    let mut buf = BytesMut::new();
    for frame in frames {
        FrameCodec::encode(frame, &mut buf);
    }
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

async fn write_frame<W: AsyncWrite + Unpin>(
    write: &mut W,
    frame: &Frame,
) -> Result<(), ChannelError> {
    let mut buf = BytesMut::new();
    FrameCodec::encode(frame, &mut buf);
    write.write_all(&buf).await?;
    write.flush().await?;
    Ok(())
}

/// Owns the socket and all per-connection state after establishment
struct Driver<S> {
    read: ReadHalf<S>,
    write: WriteHalf<S>,
    codec: FrameCodec,
    crypto: ChannelCrypto,
    events: mpsc::Sender<Event>,
    outbound: mpsc::Receiver<Bytes>,
    shutdown: Arc<Notify>,
    keepalive: Option<Duration>,
    /// Releases the account's session slot when the driver dies
    _session: SessionGuard,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn run(mut self) {
        let reason = match self.pump().await {
            Ok(()) => ChannelError::Closed,
            Err(error) => error,
        };
        debug!(%reason, "channel closed");
        let _ = self.events.send(Event::Closed(reason)).await;
    }

    async fn pump(&mut self) -> Result<(), ChannelError> {
        let Self {
            read,
            write,
            codec,
            crypto,
            events,
            outbound,
            shutdown,
            keepalive,
            _session,
        } = self;
        let mut ping = keepalive.map(keepalive_timer);
        let mut chunk = vec![0; READ_CHUNK];
        loop {
            tokio::select! {
                _ = shutdown.notified() => return Ok(()),
                message = outbound.recv() => {
                    let message = match message {
                        Some(message) => message,
                        // Handle dropped: orderly local close
                        None => return Ok(()),
                    };
                    let frame = crypto.seal_frame(&message)?;
                    write_frame(write, &frame).await?;
                }
                _ = tick(ping.as_mut()) => {
                    write_frame(write, &Frame::ping()).await?;
                }
                n = read.read(&mut chunk) => {
                    let n = n?;
                    if n == 0 {
                        return Err(ChannelError::Closed);
                    }
                    codec.push_bytes(&chunk[..n]);
                    while let Some(frame) = codec.next_frame()? {
                        match crypto.open_frame(&frame)? {
                            InboundFrame::Message(payload) => {
                                if events.send(Event::Message(payload.into())).await.is_err() {
                                    return Ok(());
                                }
                            }
                            InboundFrame::Ping => write_frame(write, &Frame::pong()).await?,
                            InboundFrame::Pong => trace!("keepalive answered"),
                        }
                    }
                }
            }
        }
    }
}

fn keepalive_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
