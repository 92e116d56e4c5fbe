//! Record marking for RPC over TCP (RFC 5531 §11).
//!
//! A record is one or more fragments, each prefixed by a 4-octet header:
//! the high bit flags the last fragment of the record and the low 31 bits
//! carry the fragment length. The assembler below is a push-based state
//! machine fed raw chunks in whatever sizes the socket produces; it buffers
//! partial fragments across reads and hands back complete records.

use std::mem;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Fragment-header bit flagging the final fragment of a record.
const LAST_FRAGMENT: u32 = 1 << 31;

/// Largest payload a single fragment can carry.
pub const MAX_FRAGMENT_SIZE: usize = (1 << 31) - 1;

/// Framing violations. Both are fatal to the connection that produced them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The record under assembly grew past the configured ceiling.
    #[error("RPC record length {length} exceeds max {limit}")]
    RecordTooLarge {
        /// Bytes the record would occupy with the current fragment included.
        length: usize,
        /// The configured ceiling.
        limit: usize,
    },
}

#[derive(Debug)]
enum FrameState {
    /// Accumulating the 4 header octets.
    AwaitHeader { header: [u8; 4], filled: usize },
    /// Accumulating `remaining` payload octets of the current fragment.
    AwaitPayload { remaining: usize, last: bool },
}

/// Reassembles records from an arbitrary partition of the TCP byte stream.
#[derive(Debug)]
pub struct RecordAssembler {
    state: FrameState,
    record: Vec<u8>,
    max_record_size: usize,
}

impl RecordAssembler {
    /// Creates an assembler enforcing the given record-size ceiling.
    pub fn new(max_record_size: usize) -> Self {
        RecordAssembler {
            state: FrameState::AwaitHeader { header: [0; 4], filled: 0 },
            record: Vec::new(),
            max_record_size,
        }
    }

    /// Consumes a chunk of stream bytes, appending any records completed by
    /// it to `complete`. State carries over between calls, so the chunking
    /// of the stream never affects the assembled records.
    pub fn push(
        &mut self,
        mut chunk: &[u8],
        complete: &mut Vec<Vec<u8>>,
    ) -> Result<(), FramingError> {
        while !chunk.is_empty() {
            match &mut self.state {
                FrameState::AwaitHeader { header, filled } => {
                    let n = chunk.len().min(4 - *filled);
                    header[*filled..*filled + n].copy_from_slice(&chunk[..n]);
                    *filled += n;
                    chunk = &chunk[n..];
                    if *filled < 4 {
                        continue;
                    }
                    let raw = u32::from_be_bytes(*header);
                    let last = raw & LAST_FRAGMENT != 0;
                    let length = (raw & !LAST_FRAGMENT) as usize;
                    trace!("fragment header length:{} last:{}", length, last);
                    let assembled = self.record.len().saturating_add(length);
                    if assembled > self.max_record_size {
                        return Err(FramingError::RecordTooLarge {
                            length: assembled,
                            limit: self.max_record_size,
                        });
                    }
                    if length == 0 {
                        // Zero-length fragment; only meaningful when it
                        // terminates the record.
                        if last {
                            complete.push(mem::take(&mut self.record));
                        }
                        self.state = FrameState::AwaitHeader { header: [0; 4], filled: 0 };
                    } else {
                        self.state = FrameState::AwaitPayload { remaining: length, last };
                    }
                }
                FrameState::AwaitPayload { remaining, last } => {
                    let n = chunk.len().min(*remaining);
                    self.record.extend_from_slice(&chunk[..n]);
                    *remaining -= n;
                    chunk = &chunk[n..];
                    if *remaining == 0 {
                        if *last {
                            trace!("record complete, {} bytes", self.record.len());
                            complete.push(mem::take(&mut self.record));
                        }
                        self.state = FrameState::AwaitHeader { header: [0; 4], filled: 0 };
                    }
                }
            }
        }
        Ok(())
    }

    /// Bytes buffered for the record currently under assembly.
    pub fn pending_len(&self) -> usize {
        self.record.len()
    }
}

/// Writes one record, splitting it into multiple fragments when the payload
/// exceeds `max_fragment`; only the final fragment carries the last flag.
pub async fn write_record<W: AsyncWrite + Unpin>(
    socket: &mut W,
    buf: &[u8],
    max_fragment: usize,
) -> Result<(), anyhow::Error> {
    let max_fragment = max_fragment.min(MAX_FRAGMENT_SIZE).max(1);
    let mut offset = 0;
    loop {
        let remaining = buf.len() - offset;
        let fragment_size = remaining.min(max_fragment);
        let is_last = offset + fragment_size >= buf.len();

        let header = if is_last {
            fragment_size as u32 | LAST_FRAGMENT
        } else {
            fragment_size as u32
        };
        socket.write_all(&header.to_be_bytes()).await?;
        trace!("writing fragment length:{} last:{}", fragment_size, is_last);
        socket.write_all(&buf[offset..offset + fragment_size]).await?;

        offset += fragment_size;
        if is_last {
            break;
        }
    }
    Ok(())
}
