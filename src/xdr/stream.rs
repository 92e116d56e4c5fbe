//! XDR stream lifecycle over a [`ByteBuffer`].
//!
//! An [`XdrStream`] owns its buffer for the duration of one message. It is
//! created idle; [`begin_encoding`](XdrStream::begin_encoding) or
//! [`begin_decoding`](XdrStream::begin_decoding) makes it active in one
//! role, and the matching `end_*` call returns it to idle, flipping the
//! buffer cursors so an encoded message is ready for transmission.

use std::io::{Read, Write};

use crate::buffer::ByteBuffer;
use crate::xdr::{deserialize, invalid_data, Deserialize, Serialize};

/// Direction a stream is operating in while active.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamRole {
    Encoding,
    Decoding,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Active(StreamRole),
}

/// Decode policy knobs.
#[derive(Copy, Clone, Debug, Default)]
pub struct XdrConfig {
    /// Reject boolean wire values outside {0, 1}. Off by default; deployed
    /// peers emit non-{0,1} booleans and RFC-strict checking breaks them.
    pub strict_bool: bool,
}

/// A byte buffer plus a role and a lifecycle flag.
#[derive(Debug)]
pub struct XdrStream {
    buffer: ByteBuffer,
    state: Lifecycle,
    config: XdrConfig,
}

impl XdrStream {
    /// Creates an idle stream over an empty growable buffer.
    pub fn new() -> Self {
        Self::with_buffer(ByteBuffer::new())
    }

    /// Creates an idle stream over the given buffer.
    pub fn with_buffer(buffer: ByteBuffer) -> Self {
        XdrStream { buffer, state: Lifecycle::Idle, config: XdrConfig::default() }
    }

    /// Creates an idle stream over received octets, ready for
    /// [`begin_decoding`](XdrStream::begin_decoding).
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::with_buffer(ByteBuffer::from_vec(data))
    }

    /// Replaces the decode policy.
    pub fn with_config(mut self, config: XdrConfig) -> Self {
        self.config = config;
        self
    }

    /// Transitions idle → active for encoding. The buffer is cleared.
    pub fn begin_encoding(&mut self) -> std::io::Result<()> {
        self.activate(StreamRole::Encoding)?;
        self.buffer.clear();
        Ok(())
    }

    /// Transitions active → idle after encoding and flips the buffer so the
    /// encoded message is readable from the start.
    pub fn end_encoding(&mut self) -> std::io::Result<()> {
        self.deactivate(StreamRole::Encoding)?;
        self.buffer.flip();
        Ok(())
    }

    /// Transitions idle → active for decoding what the buffer holds.
    pub fn begin_decoding(&mut self) -> std::io::Result<()> {
        self.activate(StreamRole::Decoding)
    }

    /// Transitions active → idle after decoding.
    pub fn end_decoding(&mut self) -> std::io::Result<()> {
        self.deactivate(StreamRole::Decoding)
    }

    /// Serializes one value into the stream.
    pub fn encode<T: Serialize>(&mut self, value: &T) -> std::io::Result<()> {
        self.expect(StreamRole::Encoding)?;
        value.serialize(&mut self.buffer)
    }

    /// Deserializes one value from the stream.
    pub fn decode<T: Deserialize + Default>(&mut self) -> std::io::Result<T> {
        self.expect(StreamRole::Decoding)?;
        deserialize::<T>(&mut self.buffer)
    }

    /// Deserializes a boolean, applying [`XdrConfig::strict_bool`].
    pub fn decode_bool(&mut self) -> std::io::Result<bool> {
        self.expect(StreamRole::Decoding)?;
        let raw = deserialize::<u32>(&mut self.buffer)?;
        if self.config.strict_bool && raw > 1 {
            return Err(invalid_data(format!("boolean wire value {raw} is not 0 or 1")));
        }
        Ok(raw > 0)
    }

    /// Octets left to decode.
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    /// Consumes the stream and returns the readable region of its buffer,
    /// i.e. the encoded message after [`end_encoding`](XdrStream::end_encoding).
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    fn activate(&mut self, role: StreamRole) -> std::io::Result<()> {
        match self.state {
            Lifecycle::Idle => {
                self.state = Lifecycle::Active(role);
                Ok(())
            }
            Lifecycle::Active(r) => {
                Err(invalid_data(format!("stream is already active ({r:?})")))
            }
        }
    }

    fn deactivate(&mut self, role: StreamRole) -> std::io::Result<()> {
        match self.state {
            Lifecycle::Active(r) if r == role => {
                self.state = Lifecycle::Idle;
                Ok(())
            }
            Lifecycle::Active(r) => {
                Err(invalid_data(format!("stream is active as {r:?}, not {role:?}")))
            }
            Lifecycle::Idle => Err(invalid_data("stream is idle")),
        }
    }

    fn expect(&self, role: StreamRole) -> std::io::Result<()> {
        match self.state {
            Lifecycle::Active(r) if r == role => Ok(()),
            _ => Err(invalid_data(format!("stream is not active for {role:?}"))),
        }
    }
}

impl Default for XdrStream {
    fn default() -> Self {
        XdrStream::new()
    }
}

/// Handlers read their arguments straight off the stream with the codec
/// traits; reads are only valid while decoding.
impl Read for XdrStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.expect(StreamRole::Decoding)?;
        self.buffer.read(buf)
    }
}

/// Handlers write their reply body the same way; writes are only valid
/// while encoding.
impl Write for XdrStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.expect(StreamRole::Encoding)?;
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
