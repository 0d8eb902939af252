//! Wire protocol for the TamDB query service.
//!
//! Calls travel as length-delimited frames holding one JSON document each.
//! A [`Request`] carries a caller-chosen id that the matching [`Response`]
//! echoes back, so a client can detect a reply that belongs to another call.
//!
//! # Modules
//!
//! - [`address`]: `tcp://` / `unix://` bind and connect addresses
//! - [`codec`]: frame codec and JSON encode/decode helpers
//! - [`message`]: request and reply types

pub mod address;
pub mod codec;
pub mod message;

pub use address::BindAddress;
pub use codec::{decode, encode, framed, MessageStream, Transport, MAX_FRAME_LENGTH};
pub use message::{Call, QueryReply, QueryRequest, Reply, Request, Response};

use thiserror::Error;

/// Error type for protocol operations.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Split a `name:key` pair on its first colon.
///
/// Without a colon the whole string serves as both name and key, so
/// `"cpu"` addresses field `cpu` of table `cpu`.
pub fn split_name_key(pair: &str) -> (&str, &str) {
    pair.split_once(':').unwrap_or((pair, pair))
}
