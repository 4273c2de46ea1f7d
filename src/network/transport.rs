//! Core transport abstractions for network communication.
//!
//! A transport owns one inbound queue of [`Rpc`]s and a routing table of
//! peers it can deliver to. The node consumes the queue and sends through
//! the table; it never looks at how delivery happens.

use crate::network::rpc::Rpc;
use crate::types::bytes::Bytes;
use ledger_derive::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

/// A boxed, pinned, send-safe future, so [`Transport`] stays object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("peer not found: {0}")]
    PeerNotFound(String),
    #[error("peer {0} is unreachable")]
    Unreachable(String),
    #[error("peer {0} inbox is full, message dropped")]
    PeerBusy(String),
    #[error("inbound queue was already consumed")]
    AlreadyConsumed,
}

pub trait Transport: Send + Sync {
    /// Hands out the inbound queue. Only the first call succeeds.
    fn consume(&self) -> BoxFuture<'_, Result<Receiver<Rpc>, TransportError>>;

    /// Adds `peer` to this transport's routing table. One-directional.
    fn connect(&self, peer: Arc<dyn Transport>) -> Result<(), TransportError>;

    /// Sends `payload` to the peer registered under `to`.
    ///
    /// # Errors
    /// `PeerNotFound` if `to` is not in the routing table, `PeerBusy` or
    /// `Unreachable` if the peer could not take the message.
    fn send(&self, to: String, payload: Bytes) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Best-effort send to every peer except this transport itself. All peers
    /// are attempted; the last failure, if any, is returned.
    fn broadcast(&self, payload: Bytes) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Queues `rpc` on this transport's inbound queue without waiting.
    fn deliver(&self, rpc: Rpc) -> Result<(), TransportError>;

    fn address(&self) -> String;
}
