//! Wire protocol for the shopping-list cluster.
//!
//! This crate provides the message types and transport plumbing shared by
//! the router, workers, and clients:
//! - JSON message definitions (requests, responses, heartbeats, envelopes)
//! - Length-prefixed frame codec over any async byte stream
//! - A framed TCP connection with a receive deadline

pub mod codec;
pub mod error;
pub mod message;
pub mod transport;

pub use error::ProtocolError;
pub use message::{
    Heartbeat, HeartbeatAck, ListPayload, Request, RequestEnvelope, Response, ResponseEnvelope,
    Status, WorkerHello,
};
pub use transport::{Connection, RECV_TIMEOUT};
