//! Framed TCP connections.
//!
//! A [`Connection`] wraps a TCP stream with the frame codec and a receive
//! deadline. Receive timeouts are recoverable: the caller closes the
//! connection, re-opens it, and surfaces the failure to whoever retries.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::codec::{read_frame, write_frame};
use crate::error::ProtocolError;

/// Default receive deadline. No request has a longer deadline than this.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A framed, bidirectional connection to one peer.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    timeout: Duration,
}

impl Connection {
    /// Dial a peer.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            timeout: RECV_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one message as a frame.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        write_frame(&mut self.stream, message).await
    }

    /// Receive one message, bounded by the receive deadline.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        match tokio::time::timeout(self.timeout, read_frame(&mut self.stream)).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(self.timeout)),
        }
    }

    /// Receive one message with no deadline.
    ///
    /// For server loops that sit idle between requests; request/response
    /// exchanges use [`Connection::recv`].
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        read_frame(&mut self.stream).await
    }

    /// One request/response round trip.
    pub async fn call<Req, Resp>(&mut self, request: &Req) -> Result<Resp, ProtocolError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.send(request).await?;
        self.recv().await
    }
}
