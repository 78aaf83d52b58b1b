//! Wire envelope and stream framing.
//!
//! Every message on the transport is a `(topic, payload)` envelope encoded with
//! `bincode` and prefixed with its length as a big-endian `u32`. Stream sockets
//! may hand over partial frames (read timeouts, small buffers), so the receiving
//! side accumulates bytes in a [`FrameDecoder`] and pops complete envelopes.

use bincode::{Decode, Encode};
use strum_macros::{Display, EnumString};

use crate::error::FeedError;
use crate::result::Result;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Length prefix size.
const HEADER_LEN: usize = 4;

/// Message kinds carried by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Encode, Decode)]
pub enum Topic {
    /// Serialized [`crate::quote::QuoteMessage`].
    #[strum(serialize = "quote-update")]
    QuoteUpdate,
    /// Broker order event, passed through unmodified.
    #[strum(serialize = "order-update")]
    OrderUpdate,
}

/// One transport message.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Envelope {
    /// Message kind.
    pub topic: Topic,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope.
    pub fn new(topic: Topic, payload: Vec<u8>) -> Self {
        Self { topic, payload }
    }

    /// Encodes the envelope as a length-prefixed frame.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let body = bincode::encode_to_vec(self, bincode::config::standard())?;
        if body.len() > MAX_FRAME_LEN {
            return Err(FeedError::FrameTooLarge(body.len()));
        }
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decodes a frame body (without the length prefix).
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let (envelope, _) = bincode::decode_from_slice(body, bincode::config::standard())?;
        Ok(envelope)
    }
}

/// Reassembles envelopes from a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete envelope.
    ///
    /// Returns `Ok(None)` while the frame is incomplete. A body that fails to
    /// decode is consumed and reported, so the caller can drop it and keep going.
    /// An oversized length prefix means the stream is out of sync and is
    /// returned as [`FeedError::FrameTooLarge`].
    pub fn next_envelope(&mut self) -> Result<Option<Envelope>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FeedError::FrameTooLarge(len));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let body: Vec<u8> = self.buf.drain(..HEADER_LEN + len).skip(HEADER_LEN).collect();
        Envelope::from_body(&body).map(Some)
    }

    /// Number of buffered bytes not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
