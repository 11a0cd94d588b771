use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    coding::{self, Codec, CodecError},
    error::Error,
};

/// Tag identifying what a frame carries
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FrameType(u8);

macro_rules! frame_types {
    {$($name:ident = $val:expr,)*} => {
        impl FrameType {
            $(pub(crate) const $name: FrameType = FrameType($val);)*
        }

        impl fmt::Debug for FrameType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => f.write_str(stringify!($name)),)*
                    _ => write!(f, "Type({:02x})", self.0),
                }
            }
        }

        impl fmt::Display for FrameType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => f.write_str(stringify!($name)),)*
                    _ => write!(f, "<unknown {:02x}>", self.0),
                }
            }
        }
    }
}

frame_types! {
    CLIENT_HELLO = 0x01,
    HELLO = 0x02,
    IDENTIFY = 0x03,
    SERVER_KEY_EXCHANGE = 0x04,
    CLIENT_KEY_EXCHANGE = 0x05,
    SESSION_RESPONSE = 0x06,
    SESSION_CONFIRM = 0x07,
    SESSION_REJECT = 0x08,
    SEALED = 0x10,
    PING = 0x11,
    PONG = 0x12,
}

impl Codec for FrameType {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        if buf.remaining() < 1 {
            return Err(CodecError::UnexpectedEnd);
        }
        Ok(Self(buf.get_u8()))
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.0);
    }
}

/// One length-delimited, type-tagged unit of the wire protocol
///
/// Frames are atomic: a consumer never observes a partial frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// What the payload contains
    pub ty: FrameType,
    /// Payload bytes, exactly as declared by the header
    pub payload: Bytes,
}

impl Frame {
    pub(crate) fn new(ty: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            ty,
            payload: payload.into(),
        }
    }

    /// Keepalive probe
    pub fn ping() -> Self {
        Self::new(FrameType::PING, Bytes::new())
    }

    /// Answer to a keepalive probe
    pub fn pong() -> Self {
        Self::new(FrameType::PONG, Bytes::new())
    }
}

/// Bytes occupied by a frame header: one tag byte and a 32-bit length
pub const HEADER_SIZE: usize = 5;

/// Turns a raw byte stream into discrete frames and back
///
/// Bytes read from the transport are appended with [`push_bytes`] and
/// complete frames drained with [`next_frame`]; the sequence is lazy and
/// restartable, so a frame split across any number of reads is reassembled
/// without the caller tracking boundaries. A declared length above the
/// configured maximum fails before any payload is buffered, bounding memory
/// against a hostile peer. No cryptographic or session knowledge lives here.
///
/// [`push_bytes`]: FrameCodec::push_bytes
/// [`next_frame`]: FrameCodec::next_frame
#[derive(Debug)]
pub struct FrameCodec {
    recv: BytesMut,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec rejecting payloads above `max_frame_size` bytes
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            recv: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append bytes received from the transport
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.recv.extend_from_slice(bytes);
    }

    /// Yield the next complete frame, if one has fully arrived
    ///
    /// Returning `Ok(None)` means more bytes are needed. `FrameTooLarge` is
    /// fatal; the connection must be closed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        if self.recv.len() < HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.recv[1], self.recv[2], self.recv[3], self.recv[4]])
            as usize;
        if len > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                len,
                limit: self.max_frame_size,
            });
        }
        if self.recv.len() < HEADER_SIZE + len {
            return Ok(None);
        }
        let ty = FrameType(self.recv[0]);
        self.recv.advance(HEADER_SIZE);
        let payload = self.recv.split_to(len).freeze();
        Ok(Some(Frame { ty, payload }))
    }

    /// Produce the exact byte sequence that transfers `frame`
    pub fn encode(frame: &Frame, out: &mut BytesMut) {
        debug_assert!(frame.payload.len() <= u32::MAX as usize);
        out.reserve(HEADER_SIZE + frame.payload.len());
        frame.ty.encode(out);
        out.put_u32(frame.payload.len() as u32);
        out.put_slice(&frame.payload);
    }
}
