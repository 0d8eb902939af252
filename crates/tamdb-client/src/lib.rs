//! Client library for the TamDB query service.
//!
//! Used by `tamdbctl` and by the server's integration tests.
//!
//! ```no_run
//! # async fn demo() -> Result<(), tamdb_client::ClientError> {
//! let mut client = tamdb_client::TamClient::connect("tcp://127.0.0.1:9999").await?;
//! let reply = client.query("metrics", "host", "cpu").await?;
//! for (time, mean) in reply.points() {
//!     println!("{time} {mean}");
//! }
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use std::io;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tamdb_proto::{
    decode, encode, framed, BindAddress, Call, MessageStream, ProtoError, QueryRequest, Reply,
    Request, Response, Transport,
};
use thiserror::Error;
use tokio::net::TcpStream;

pub use tamdb_proto::{split_name_key, QueryReply};

/// Error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] ProtoError),

    #[error("failed to connect to {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Remote(String),
}

/// A connection to a TamDB server.
///
/// Calls are issued one at a time; each carries a fresh id that the reply
/// must echo.
pub struct TamClient {
    messages: MessageStream<Box<dyn Transport>>,
    address: BindAddress,
    next_id: u64,
}

impl TamClient {
    /// Connect to `address` (`tcp://host:port`, `unix:///path`, or a bare
    /// form of either).
    pub async fn connect(address: &str) -> Result<Self, ClientError> {
        let address: BindAddress = address.parse()?;
        Self::connect_to(address).await
    }

    /// Connect to an already parsed address.
    pub async fn connect_to(address: BindAddress) -> Result<Self, ClientError> {
        let connection_error = |source| ClientError::Connection {
            address: address.to_string(),
            source,
        };

        let stream: Box<dyn Transport> = match &address {
            BindAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str())
                    .await
                    .map_err(connection_error)?;
                stream.set_nodelay(true).map_err(connection_error)?;
                Box::new(stream)
            }
            #[cfg(unix)]
            BindAddress::Unix(path) => Box::new(
                tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(connection_error)?,
            ),
            #[cfg(not(unix))]
            BindAddress::Unix(_) => {
                return Err(connection_error(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are not supported on this platform",
                )))
            }
        };

        tracing::debug!(address = %address, "Connected");
        Ok(Self {
            messages: framed(stream),
            address,
            next_id: 1,
        })
    }

    pub fn address(&self) -> &BindAddress {
        &self.address
    }

    /// Per-bucket means of `field` in `table` of `database`.
    pub async fn query(
        &mut self,
        database: &str,
        table: &str,
        field: &str,
    ) -> Result<QueryReply, ClientError> {
        let call = Call::Query(QueryRequest::new(database, table, field));
        match self.call(call).await? {
            Reply::Query(reply) => Ok(reply),
            Reply::Error { message } => Err(ClientError::Remote(message)),
        }
    }

    /// Flush and shut the connection down.
    pub async fn close(mut self) -> Result<(), ClientError> {
        SinkExt::<Bytes>::close(&mut self.messages)
            .await
            .map_err(ClientError::Transport)
    }

    async fn call(&mut self, call: Call) -> Result<Reply, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let payload = encode(&Request { id, call }).map_err(|e| ClientError::Protocol(e.to_string()))?;
        self.messages
            .send(payload)
            .await
            .map_err(ClientError::Transport)?;

        let frame = match self.messages.next().await {
            Some(frame) => frame.map_err(ClientError::Transport)?,
            None => {
                return Err(ClientError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )))
            }
        };

        let response: Response =
            decode(&frame).map_err(|e| ClientError::Protocol(e.to_string()))?;
        if response.id != id {
            return Err(ClientError::Protocol(format!(
                "reply id {} does not match request id {id}",
                response.id
            )));
        }
        Ok(response.reply)
    }
}
