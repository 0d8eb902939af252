//! Frame codec and JSON helpers.
//!
//! Each frame is a 4-byte big-endian length followed by one JSON document.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::ProtoError;

/// Maximum frame size (4MB).
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

/// Byte stream usable as a call transport (TCP or Unix socket).
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A transport wrapped in the frame codec.
pub type MessageStream<S> = Framed<S, LengthDelimitedCodec>;

/// Wrap a transport in the frame codec.
pub fn framed<S: Transport>(io: S) -> MessageStream<S> {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_framed(io)
}

/// Serialize a message into a frame payload.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, ProtoError> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Deserialize a frame payload.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, ProtoError> {
    Ok(serde_json::from_slice(frame)?)
}
