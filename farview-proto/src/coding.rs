use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::error::Error;

/// Failure to decode a value from a buffer
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum CodecError {
    /// The buffer ended before the value was complete
    #[error("unexpected end of buffer")]
    UnexpectedEnd,
    /// The bytes present do not form a legal value
    #[error("illegal value")]
    IllegalValue,
}

impl From<CodecError> for Error {
    fn from(_: CodecError) -> Self {
        Self::MalformedFrame
    }
}

pub type Result<T> = ::std::result::Result<T, CodecError>;

/// Infallible encoding and structured decoding of wire values
pub trait Codec: Sized {
    /// Decode a value from the front of `buf`
    fn decode<B: Buf>(buf: &mut B) -> Result<Self>;
    /// Append this value to `buf`
    fn encode<B: BufMut>(&self, buf: &mut B);
}

impl Codec for u8 {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 1 {
            return Err(CodecError::UnexpectedEnd);
        }
        Ok(buf.get_u8())
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(*self);
    }
}

impl Codec for u16 {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(CodecError::UnexpectedEnd);
        }
        Ok(buf.get_u16())
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(*self);
    }
}

impl Codec for u32 {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(CodecError::UnexpectedEnd);
        }
        Ok(buf.get_u32())
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(*self);
    }
}

pub trait BufExt {
    fn get<T: Codec>(&mut self) -> Result<T>;
    /// Read a 16-bit-length-prefixed byte string
    fn get_bytes(&mut self) -> Result<Vec<u8>>;
    /// Read a 16-bit-length-prefixed UTF-8 string
    fn get_str(&mut self) -> Result<String>;
}

impl<T: Buf> BufExt for T {
    fn get<U: Codec>(&mut self) -> Result<U> {
        U::decode(self)
    }

    fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get::<u16>()? as usize;
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEnd);
        }
        let mut out = vec![0; len];
        self.copy_to_slice(&mut out);
        Ok(out)
    }

    fn get_str(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes).map_err(|_| CodecError::IllegalValue)
    }
}

pub trait BufMutExt {
    fn write<T: Codec>(&mut self, x: T);
    /// Write a 16-bit-length-prefixed byte string; `x` must be under 64 KiB
    fn write_bytes(&mut self, x: &[u8]);
}

impl<T: BufMut> BufMutExt for T {
    fn write<U: Codec>(&mut self, x: U) {
        x.encode(self);
    }

    fn write_bytes(&mut self, x: &[u8]) {
        debug_assert!(x.len() <= usize::from(u16::MAX));
        self.write(x.len() as u16);
        self.put_slice(x);
    }
}
