//! Session key handling for established channels
//!
//! The 32-byte key agreed during the SRP exchange is never used directly:
//! it is expanded into two direction-bound AEAD keys so that a frame sealed
//! by the host can never be replayed back to it as client traffic. Frames
//! are protected with ChaCha20-Poly1305 under a per-direction counter
//! nonce; the transport is ordered and lossless, so both ends advance their
//! counters in lockstep and no nonce travels on the wire.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    error::Error,
    frame::{Frame, FrameType},
    Side,
};

pub mod srp;

/// Bytes in a session key and in each derived directional key
pub const KEY_LEN: usize = 32;

/// Bytes the authentication tag adds to each sealed payload
pub const TAG_LEN: usize = 16;

const HOST_TO_CLIENT: &[u8] = b"farview host to client v1";
const CLIENT_TO_HOST: &[u8] = b"farview client to host v1";

/// Shared secret produced by a completed key exchange
///
/// Wiped on drop; never logged, persisted, or exposed outside the
/// authenticator and the channel that installs it.
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Directional cipher state for one side of an established channel
pub struct ChannelCrypto {
    seal: ChaCha20Poly1305,
    open: ChaCha20Poly1305,
    seal_counter: u64,
    open_counter: u64,
}

impl ChannelCrypto {
    /// Expand `key` into distinct keys for each direction of `side`
    pub fn new(key: &SessionKey, side: Side) -> Self {
        let hk = Hkdf::<Sha256>::new(None, &key.0);
        let mut host_key = Zeroizing::new([0u8; KEY_LEN]);
        let mut client_key = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(HOST_TO_CLIENT, &mut *host_key)
            .expect("32 bytes is a valid HKDF output length");
        hk.expand(CLIENT_TO_HOST, &mut *client_key)
            .expect("32 bytes is a valid HKDF output length");

        let (seal_key, open_key) = match side {
            Side::Host => (&host_key, &client_key),
            Side::Client => (&client_key, &host_key),
        };
        Self {
            seal: ChaCha20Poly1305::new(Key::from_slice(&**seal_key)),
            open: ChaCha20Poly1305::new(Key::from_slice(&**open_key)),
            seal_counter: 0,
            open_counter: 0,
        }
    }

    /// Encrypt and authenticate an outbound payload
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = nonce_for(self.seal_counter);
        self.seal_counter += 1;
        self.seal
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::ChannelCorrupted)
    }

    /// Decrypt and verify an inbound payload
    ///
    /// Failure means corruption or tampering and is fatal to the channel;
    /// the counter still advances so a torn-down channel cannot be coaxed
    /// into reusing a nonce.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = nonce_for(self.open_counter);
        self.open_counter += 1;
        self.open
            .decrypt(&nonce, ciphertext)
            .map_err(|_| Error::ChannelCorrupted)
    }

    /// Seal an application message into a ready-to-send frame
    pub fn seal_frame(&mut self, plaintext: &[u8]) -> Result<Frame, Error> {
        Ok(Frame::new(FrameType::SEALED, self.seal(plaintext)?))
    }

    /// Interpret a frame received on an established channel
    ///
    /// Handshake tags are protocol violations once the channel is up.
    pub fn open_frame(&mut self, frame: &Frame) -> Result<InboundFrame, Error> {
        match frame.ty {
            FrameType::SEALED => Ok(InboundFrame::Message(self.open(&frame.payload)?)),
            FrameType::PING => Ok(InboundFrame::Ping),
            FrameType::PONG => Ok(InboundFrame::Pong),
            ty => Err(Error::UnexpectedMessage(ty)),
        }
    }
}

/// Content of a frame received on an established channel
#[derive(Debug)]
pub enum InboundFrame {
    /// Decrypted application message for the upper-layer consumer
    Message(Vec<u8>),
    /// Keepalive probe; the channel answers with a pong itself
    Ping,
    /// Answer to an earlier keepalive probe
    Pong,
}

fn nonce_for(counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..].copy_from_slice(&counter.to_be_bytes());
    Nonce::from(bytes)
}
