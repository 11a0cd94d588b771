//! Wire messages exchanged during key exchange
//!
//! Five messages flow before any application data: the client offers its
//! supported groups and the service it wants, the host picks a group, the
//! client names an account, the host answers with salt and its public
//! ephemeral, and the two sides then trade proofs. Everything here is plain
//! encoding; the ordering rules live in [`auth`](crate::auth).

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    coding::{BufExt, BufMutExt, Codec, CodecError},
    crypto::srp::SrpGroup,
    error::Error,
    frame::{Frame, FrameType},
};

/// Application service a connecting client is asking for
///
/// Recorded during key exchange and reported to the accept layer alongside
/// the authenticated username; the channel core does not interpret it
/// further.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SessionKind {
    /// Full desktop control
    DesktopManage,
    /// View-only desktop streaming
    DesktopView,
    /// File transfer
    FileTransfer,
    /// System information queries
    SystemInfo,
}

impl SessionKind {
    fn from_u8(x: u8) -> Option<Self> {
        Some(match x {
            1 => Self::DesktopManage,
            2 => Self::DesktopView,
            3 => Self::FileTransfer,
            4 => Self::SystemInfo,
            _ => return None,
        })
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::DesktopManage => 1,
            Self::DesktopView => 2,
            Self::FileTransfer => 3,
            Self::SystemInfo => 4,
        }
    }
}

impl Codec for SessionKind {
    fn decode<B: Buf>(buf: &mut B) -> crate::coding::Result<Self> {
        Self::from_u8(buf.get::<u8>()?).ok_or(CodecError::IllegalValue)
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write(self.as_u8());
    }
}

/// Opens the exchange: desired service and supported group parameters
#[derive(Debug)]
pub struct ClientHello {
    /// Service the client wants once authenticated
    pub session_kind: SessionKind,
    /// Groups the client can work in, weakest first
    pub groups: Vec<SrpGroup>,
}

/// Host's answer: the group the rest of the exchange runs in
#[derive(Debug)]
pub struct Hello {
    /// Chosen group, drawn from the client's offer
    pub group: SrpGroup,
}

/// Claimed identity; fixed for the rest of the attempt
#[derive(Debug)]
pub struct Identify {
    /// Account name, case-sensitive
    pub username: String,
}

/// Host's credential material: account salt and public ephemeral
#[derive(Debug)]
pub struct ServerKeyExchange {
    /// Salt of the (real or fabricated) account
    pub salt: Vec<u8>,
    /// `B`, padded to the group's key length
    pub server_public: Vec<u8>,
}

/// Client's public ephemeral
#[derive(Debug)]
pub struct ClientKeyExchange {
    /// `A`, padded to the group's key length
    pub client_public: Vec<u8>,
}

/// Client's proof of the session key
#[derive(Debug)]
pub struct SessionResponse {
    /// `M1` over the exchange transcript
    pub client_proof: Vec<u8>,
}

/// Host's counter-proof, completing mutual authentication
#[derive(Debug)]
pub struct SessionConfirm {
    /// `M2` over the client proof and session key
    pub server_proof: Vec<u8>,
}

impl Codec for ClientHello {
    fn decode<B: Buf>(buf: &mut B) -> crate::coding::Result<Self> {
        let session_kind = buf.get()?;
        let count = buf.get::<u8>()? as usize;
        if count == 0 {
            return Err(CodecError::IllegalValue);
        }
        let mut groups = Vec::with_capacity(count);
        for _ in 0..count {
            groups.push(buf.get()?);
        }
        Ok(Self {
            session_kind,
            groups,
        })
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        debug_assert!(!self.groups.is_empty() && self.groups.len() <= usize::from(u8::MAX));
        self.session_kind.encode(buf);
        buf.write(self.groups.len() as u8);
        for group in &self.groups {
            group.encode(buf);
        }
    }
}

impl Codec for Hello {
    fn decode<B: Buf>(buf: &mut B) -> crate::coding::Result<Self> {
        Ok(Self { group: buf.get()? })
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.group.encode(buf);
    }
}

impl Codec for Identify {
    fn decode<B: Buf>(buf: &mut B) -> crate::coding::Result<Self> {
        let username = buf.get_str()?;
        if username.is_empty() {
            return Err(CodecError::IllegalValue);
        }
        Ok(Self { username })
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write_bytes(self.username.as_bytes());
    }
}

impl Codec for ServerKeyExchange {
    fn decode<B: Buf>(buf: &mut B) -> crate::coding::Result<Self> {
        Ok(Self {
            salt: buf.get_bytes()?,
            server_public: buf.get_bytes()?,
        })
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write_bytes(&self.salt);
        buf.write_bytes(&self.server_public);
    }
}

impl Codec for ClientKeyExchange {
    fn decode<B: Buf>(buf: &mut B) -> crate::coding::Result<Self> {
        Ok(Self {
            client_public: buf.get_bytes()?,
        })
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write_bytes(&self.client_public);
    }
}

impl Codec for SessionResponse {
    fn decode<B: Buf>(buf: &mut B) -> crate::coding::Result<Self> {
        Ok(Self {
            client_proof: buf.get_bytes()?,
        })
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write_bytes(&self.client_proof);
    }
}

impl Codec for SessionConfirm {
    fn decode<B: Buf>(buf: &mut B) -> crate::coding::Result<Self> {
        Ok(Self {
            server_proof: buf.get_bytes()?,
        })
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write_bytes(&self.server_proof);
    }
}

/// Any message legal during key exchange
#[derive(Debug)]
#[allow(missing_docs)]
pub enum HandshakeMessage {
    ClientHello(ClientHello),
    Hello(Hello),
    Identify(Identify),
    ServerKeyExchange(ServerKeyExchange),
    ClientKeyExchange(ClientKeyExchange),
    SessionResponse(SessionResponse),
    SessionConfirm(SessionConfirm),
    /// Generic failure; carries no reason
    SessionReject,
}

impl HandshakeMessage {
    /// Frame tag this message travels under
    pub fn ty(&self) -> FrameType {
        use HandshakeMessage::*;
        match self {
            ClientHello(_) => FrameType::CLIENT_HELLO,
            Hello(_) => FrameType::HELLO,
            Identify(_) => FrameType::IDENTIFY,
            ServerKeyExchange(_) => FrameType::SERVER_KEY_EXCHANGE,
            ClientKeyExchange(_) => FrameType::CLIENT_KEY_EXCHANGE,
            SessionResponse(_) => FrameType::SESSION_RESPONSE,
            SessionConfirm(_) => FrameType::SESSION_CONFIRM,
            SessionReject => FrameType::SESSION_REJECT,
        }
    }

    /// Parse a frame into a handshake message
    ///
    /// Trailing bytes after the message body are as malformed as missing
    /// ones. Tags outside the handshake range fail `UnexpectedMessage`.
    pub fn decode(frame: &Frame) -> Result<Self, Error> {
        let buf = &mut &frame.payload[..];
        let message = match frame.ty {
            FrameType::CLIENT_HELLO => Self::ClientHello(buf.get()?),
            FrameType::HELLO => Self::Hello(buf.get()?),
            FrameType::IDENTIFY => Self::Identify(buf.get()?),
            FrameType::SERVER_KEY_EXCHANGE => Self::ServerKeyExchange(buf.get()?),
            FrameType::CLIENT_KEY_EXCHANGE => Self::ClientKeyExchange(buf.get()?),
            FrameType::SESSION_RESPONSE => Self::SessionResponse(buf.get()?),
            FrameType::SESSION_CONFIRM => Self::SessionConfirm(buf.get()?),
            FrameType::SESSION_REJECT => Self::SessionReject,
            ty => return Err(Error::UnexpectedMessage(ty)),
        };
        if buf.has_remaining() {
            return Err(Error::MalformedFrame);
        }
        Ok(message)
    }

    /// Encode into a ready-to-send frame
    pub fn into_frame(self) -> Frame {
        use HandshakeMessage::*;
        let ty = self.ty();
        let mut payload = BytesMut::new();
        match &self {
            ClientHello(x) => x.encode(&mut payload),
            Hello(x) => x.encode(&mut payload),
            Identify(x) => x.encode(&mut payload),
            ServerKeyExchange(x) => x.encode(&mut payload),
            ClientKeyExchange(x) => x.encode(&mut payload),
            SessionResponse(x) => x.encode(&mut payload),
            SessionConfirm(x) => x.encode(&mut payload),
            SessionReject => {}
        }
        Frame::new(ty, payload.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: HandshakeMessage) -> HandshakeMessage {
        let frame = message.into_frame();
        HandshakeMessage::decode(&frame).unwrap()
    }

    #[test]
    fn client_hello_round_trip() {
        let got = round_trip(HandshakeMessage::ClientHello(ClientHello {
            session_kind: SessionKind::FileTransfer,
            groups: SrpGroup::default_set(),
        }));
        match got {
            HandshakeMessage::ClientHello(hello) => {
                assert_eq!(hello.session_kind, SessionKind::FileTransfer);
                assert_eq!(hello.groups, SrpGroup::default_set());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn identify_round_trip() {
        let got = round_trip(HandshakeMessage::Identify(Identify {
            username: "ada lovelace".into(),
        }));
        match got {
            HandshakeMessage::Identify(id) => assert_eq!(id.username, "ada lovelace"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn empty_username_rejected() {
        let frame = HandshakeMessage::Identify(Identify {
            username: String::new(),
        })
        .into_frame();
        assert_eq!(
            HandshakeMessage::decode(&frame).unwrap_err(),
            Error::MalformedFrame
        );
    }

    #[test]
    fn empty_group_offer_rejected() {
        // Hand-built: the encoder refuses to produce this
        let frame = Frame::new(FrameType::CLIENT_HELLO, &[1u8, 0][..]);
        assert_eq!(
            HandshakeMessage::decode(&frame).unwrap_err(),
            Error::MalformedFrame
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut payload = BytesMut::new();
        SessionResponse {
            client_proof: vec![7; 32],
        }
        .encode(&mut payload);
        payload.extend_from_slice(&[0]);
        let frame = Frame::new(FrameType::SESSION_RESPONSE, payload.freeze());
        assert_eq!(
            HandshakeMessage::decode(&frame).unwrap_err(),
            Error::MalformedFrame
        );
    }

    #[test]
    fn non_handshake_tag_is_unexpected() {
        let frame = Frame::new(FrameType::SEALED, &b""[..]);
        assert_eq!(
            HandshakeMessage::decode(&frame).unwrap_err(),
            Error::UnexpectedMessage(FrameType::SEALED)
        );
    }
}
