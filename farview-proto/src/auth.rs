//! Handshake state machines for both channel roles
//!
//! A channel in the unauthenticated state owns exactly one driver: the host
//! variant verifies a connecting peer against the user store, the client
//! variant proves knowledge of an account password. Drivers are fed whole
//! frames and answer with frames to transmit plus, eventually, a terminal
//! outcome. No phase may be skipped or repeated; any out-of-phase message
//! is fatal. Whatever the local cause, the peer only ever sees a bare
//! `SESSION_REJECT`.

use std::{mem, sync::Arc};

use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::{
    crypto::{
        srp::{ClientExchange, ServerExchange, SessionSecrets, SrpGroup},
        SessionKey,
    },
    error::Error,
    frame::Frame,
    handshake::{
        ClientHello, ClientKeyExchange, HandshakeMessage, Hello, Identify, ServerKeyExchange,
        SessionConfirm, SessionKind, SessionResponse,
    },
    users::UserStore,
    Side,
};

/// Progress made by feeding one frame to a handshake driver
pub struct AuthStep {
    /// Frames to transmit to the peer, in order
    pub send: Vec<Frame>,
    /// Present once the driver reached a terminal state
    pub outcome: Option<AuthOutcome>,
}

impl AuthStep {
    fn pending(send: Vec<Frame>) -> Self {
        Self {
            send,
            outcome: None,
        }
    }
}

/// Terminal result of a handshake
pub enum AuthOutcome {
    /// Key exchange succeeded; the channel installs the session key
    Established(SessionHandoff),
    /// Key exchange failed; the connection must be closed
    Rejected(Error),
}

/// Everything the channel needs to enter the established state
pub struct SessionHandoff {
    /// Authenticated account name
    pub username: String,
    /// Service the client asked for
    pub session_kind: SessionKind,
    /// Agreed session key
    pub key: SessionKey,
    /// Releases the account's session slot when dropped
    pub session: SessionGuard,
}

/// Releases an account's session slot exactly once
///
/// Bound by the host driver at the moment the handshake completes and held
/// by the channel from then on; every close path ends in its drop, so a
/// slot can neither leak nor be released twice.
pub struct SessionGuard {
    store: Option<Arc<UserStore>>,
    name: String,
}

impl SessionGuard {
    fn bound(store: Arc<UserStore>, name: String) -> Self {
        Self {
            store: Some(store),
            name,
        }
    }

    fn unbound() -> Self {
        Self {
            store: None,
            name: String::new(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            store.end_session(&self.name);
        }
    }
}

/// Host-side handshake driver
pub struct HostAuthenticator {
    store: Arc<UserStore>,
    supported: Vec<SrpGroup>,
    state: HostState,
}

enum HostState {
    AwaitClientHello,
    AwaitIdentify {
        session_kind: SessionKind,
        group: SrpGroup,
    },
    AwaitClientKeyExchange {
        session_kind: SessionKind,
        username: String,
        fabricated: bool,
        exchange: ServerExchange,
    },
    AwaitSessionConfirm {
        session_kind: SessionKind,
        username: String,
        fabricated: bool,
        secrets: SessionSecrets,
    },
    Done,
    Failed,
}

impl HostAuthenticator {
    /// Create a driver for one freshly accepted connection
    pub fn new(store: Arc<UserStore>) -> Self {
        Self {
            store,
            supported: SrpGroup::default_set(),
            state: HostState::AwaitClientHello,
        }
    }

    fn fail(&mut self, error: Error) -> AuthStep {
        debug!(%error, "key exchange failed");
        self.state = HostState::Failed;
        AuthStep {
            send: vec![HandshakeMessage::SessionReject.into_frame()],
            outcome: Some(AuthOutcome::Rejected(error)),
        }
    }

    /// Feed one inbound frame to the state machine
    pub fn handle_frame(&mut self, frame: &Frame) -> AuthStep {
        trace!(ty = %frame.ty, "handshake frame");
        let message = match HandshakeMessage::decode(frame) {
            Ok(message) => message,
            Err(error) => return self.fail(error),
        };
        // Secrets held by the replaced state are wiped on drop
        let state = mem::replace(&mut self.state, HostState::Failed);
        match (state, message) {
            (HostState::AwaitClientHello, HandshakeMessage::ClientHello(hello)) => {
                let chosen = hello
                    .groups
                    .iter()
                    .filter(|&group| self.supported.contains(group))
                    .max_by_key(|group| group.bits())
                    .cloned();
                let group = match chosen {
                    Some(group) => group,
                    None => return self.fail(Error::NoCommonGroup),
                };
                trace!(bits = group.bits(), "group negotiated");
                self.state = HostState::AwaitIdentify {
                    session_kind: hello.session_kind,
                    group: group.clone(),
                };
                AuthStep::pending(vec![HandshakeMessage::Hello(Hello { group }).into_frame()])
            }
            (
                HostState::AwaitIdentify {
                    session_kind,
                    group,
                },
                HandshakeMessage::Identify(Identify { username }),
            ) => {
                debug!(%username, "peer identified");
                let view = self.store.lookup(&username, &group);
                let fabricated = view.is_fabricated();
                let exchange =
                    ServerExchange::new(group, username.clone(), view.salt.clone(), &view.verifier);
                let reply = ServerKeyExchange {
                    salt: view.salt,
                    server_public: exchange.public_key(),
                };
                self.state = HostState::AwaitClientKeyExchange {
                    session_kind,
                    username,
                    fabricated,
                    exchange,
                };
                AuthStep::pending(vec![HandshakeMessage::ServerKeyExchange(reply).into_frame()])
            }
            (
                HostState::AwaitClientKeyExchange {
                    session_kind,
                    username,
                    fabricated,
                    exchange,
                },
                HandshakeMessage::ClientKeyExchange(ClientKeyExchange { client_public }),
            ) => match exchange.complete(&client_public) {
                Ok(secrets) => {
                    self.state = HostState::AwaitSessionConfirm {
                        session_kind,
                        username,
                        fabricated,
                        secrets,
                    };
                    AuthStep::pending(Vec::new())
                }
                Err(error) => self.fail(error),
            },
            (
                HostState::AwaitSessionConfirm {
                    session_kind,
                    username,
                    fabricated,
                    secrets,
                },
                HandshakeMessage::SessionResponse(SessionResponse { client_proof }),
            ) => {
                if fabricated || !secrets.peer_proof_matches(&client_proof) {
                    return self.fail(Error::ProofMismatch);
                }
                if let Err(error) = self.store.begin_session(&username) {
                    return self.fail(error);
                }
                debug!(%username, "key exchange finished");
                let confirm = SessionConfirm {
                    server_proof: secrets.own_proof().to_vec(),
                };
                self.state = HostState::Done;
                AuthStep {
                    send: vec![HandshakeMessage::SessionConfirm(confirm).into_frame()],
                    outcome: Some(AuthOutcome::Established(SessionHandoff {
                        session: SessionGuard::bound(self.store.clone(), username.clone()),
                        username,
                        session_kind,
                        key: secrets.into_key(),
                    })),
                }
            }
            (_, message) => self.fail(Error::UnexpectedMessage(message.ty())),
        }
    }
}

/// Client-side handshake driver
pub struct ClientAuthenticator {
    username: String,
    session_kind: SessionKind,
    groups: Vec<SrpGroup>,
    state: ClientState,
}

enum ClientState {
    Start {
        password: Zeroizing<String>,
    },
    AwaitHello {
        password: Zeroizing<String>,
    },
    AwaitServerKeyExchange {
        password: Zeroizing<String>,
        group: SrpGroup,
    },
    AwaitSessionConfirm {
        secrets: SessionSecrets,
    },
    Done,
    Failed,
}

impl ClientAuthenticator {
    /// Create a driver for a connection about to authenticate
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        session_kind: SessionKind,
    ) -> Self {
        Self {
            username: username.into(),
            session_kind,
            groups: SrpGroup::default_set(),
            state: ClientState::Start {
                password: Zeroizing::new(password.into()),
            },
        }
    }

    fn fail(&mut self, error: Error) -> AuthStep {
        debug!(%error, "key exchange failed");
        self.state = ClientState::Failed;
        AuthStep {
            send: Vec::new(),
            outcome: Some(AuthOutcome::Rejected(error)),
        }
    }

    /// Open the exchange; the client speaks first
    pub fn start(&mut self) -> AuthStep {
        let state = mem::replace(&mut self.state, ClientState::Failed);
        match state {
            ClientState::Start { password } => {
                let hello = ClientHello {
                    session_kind: self.session_kind,
                    groups: self.groups.clone(),
                };
                self.state = ClientState::AwaitHello { password };
                AuthStep::pending(vec![HandshakeMessage::ClientHello(hello).into_frame()])
            }
            _ => self.fail(Error::UnexpectedMessage(crate::frame::FrameType::CLIENT_HELLO)),
        }
    }

    /// Feed one inbound frame to the state machine
    pub fn handle_frame(&mut self, frame: &Frame) -> AuthStep {
        trace!(ty = %frame.ty, "handshake frame");
        let message = match HandshakeMessage::decode(frame) {
            Ok(message) => message,
            Err(error) => return self.fail(error),
        };
        if let HandshakeMessage::SessionReject = message {
            return self.fail(Error::Rejected);
        }
        let state = mem::replace(&mut self.state, ClientState::Failed);
        match (state, message) {
            (ClientState::AwaitHello { password }, HandshakeMessage::Hello(Hello { group })) => {
                if !self.groups.contains(&group) {
                    return self.fail(Error::NoCommonGroup);
                }
                let identify = Identify {
                    username: self.username.clone(),
                };
                self.state = ClientState::AwaitServerKeyExchange { password, group };
                AuthStep::pending(vec![HandshakeMessage::Identify(identify).into_frame()])
            }
            (
                ClientState::AwaitServerKeyExchange { password, group },
                HandshakeMessage::ServerKeyExchange(ServerKeyExchange {
                    salt,
                    server_public,
                }),
            ) => {
                let exchange = ClientExchange::new(group, self.username.clone(), password);
                let public = exchange.public_key();
                let secrets = match exchange.complete(&salt, &server_public) {
                    Ok(secrets) => secrets,
                    Err(error) => return self.fail(error),
                };
                let key_exchange = ClientKeyExchange {
                    client_public: public,
                };
                let response = SessionResponse {
                    client_proof: secrets.own_proof().to_vec(),
                };
                self.state = ClientState::AwaitSessionConfirm { secrets };
                AuthStep::pending(vec![
                    HandshakeMessage::ClientKeyExchange(key_exchange).into_frame(),
                    HandshakeMessage::SessionResponse(response).into_frame(),
                ])
            }
            (
                ClientState::AwaitSessionConfirm { secrets },
                HandshakeMessage::SessionConfirm(SessionConfirm { server_proof }),
            ) => {
                if !secrets.peer_proof_matches(&server_proof) {
                    return self.fail(Error::ProofMismatch);
                }
                debug!(username = %self.username, "key exchange finished");
                self.state = ClientState::Done;
                AuthStep {
                    send: Vec::new(),
                    outcome: Some(AuthOutcome::Established(SessionHandoff {
                        username: self.username.clone(),
                        session_kind: self.session_kind,
                        key: secrets.into_key(),
                        session: SessionGuard::unbound(),
                    })),
                }
            }
            (_, message) => self.fail(Error::UnexpectedMessage(message.ty())),
        }
    }
}

/// Role-specific owner of a channel's unauthenticated phase
pub enum Authenticator {
    /// Accepting side
    Host(HostAuthenticator),
    /// Connecting side
    Client(ClientAuthenticator),
}

impl Authenticator {
    /// Which side of the exchange this driver plays
    pub fn side(&self) -> Side {
        match self {
            Self::Host(_) => Side::Host,
            Self::Client(_) => Side::Client,
        }
    }

    /// Frames to send before any are received; empty for the host
    pub fn start(&mut self) -> AuthStep {
        match self {
            Self::Host(_) => AuthStep::pending(Vec::new()),
            Self::Client(client) => client.start(),
        }
    }

    /// Feed one inbound frame to the active driver
    pub fn handle_frame(&mut self, frame: &Frame) -> AuthStep {
        match self {
            Self::Host(host) => host.handle_frame(frame),
            Self::Client(client) => client.handle_frame(frame),
        }
    }
}
