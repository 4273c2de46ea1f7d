//! In-memory transport for single-process networks and tests.

use crate::network::rpc::Rpc;
use crate::network::transport::{BoxFuture, Transport, TransportError};
use crate::types::bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender, channel};

/// Capacity of each transport's inbound queue.
pub const INBOX_CAPACITY: usize = 1024;

/// Routes messages between transports through bounded channels.
///
/// Delivery never waits: a peer whose inbox is full loses the message, so a
/// slow consumer cannot stall the sender.
pub struct LocalTransport {
    address: String,
    peers: DashMap<String, Arc<dyn Transport>>,
    tx: Sender<Rpc>,
    rx: Mutex<Option<Receiver<Rpc>>>,
}

impl LocalTransport {
    pub fn new(address: &str) -> Arc<LocalTransport> {
        Self::with_capacity(address, INBOX_CAPACITY)
    }

    pub fn with_capacity(address: &str, capacity: usize) -> Arc<LocalTransport> {
        let (tx, rx) = channel(capacity);

        Arc::new(LocalTransport {
            address: address.to_string(),
            peers: DashMap::new(),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Addresses currently in the routing table.
    pub fn peers(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn peer(&self, address: &str) -> Option<Arc<dyn Transport>> {
        self.peers.get(address).map(|entry| entry.value().clone())
    }
}

impl Transport for LocalTransport {
    fn consume(&self) -> BoxFuture<'_, Result<Receiver<Rpc>, TransportError>> {
        Box::pin(async move { self.rx.lock().await.take().ok_or(TransportError::AlreadyConsumed) })
    }

    fn connect(&self, peer: Arc<dyn Transport>) -> Result<(), TransportError> {
        self.peers.insert(peer.address(), peer);
        Ok(())
    }

    fn send(&self, to: String, payload: Bytes) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let peer = self.peer(&to).ok_or(TransportError::PeerNotFound(to))?;
            peer.deliver(Rpc::new(self.address.clone(), payload))
        })
    }

    fn broadcast(&self, payload: Bytes) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            // Snapshot first so no map guard is held while delivering.
            let peers: Vec<Arc<dyn Transport>> =
                self.peers.iter().map(|entry| entry.value().clone()).collect();

            let mut last_error = None;
            for peer in peers {
                if peer.address() == self.address {
                    continue;
                }
                if let Err(err) = peer.deliver(Rpc::new(self.address.clone(), payload.clone())) {
                    last_error = Some(err);
                }
            }

            match last_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn deliver(&self, rpc: Rpc) -> Result<(), TransportError> {
        self.tx.try_send(rpc).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::PeerBusy(self.address.clone()),
            TrySendError::Closed(_) => TransportError::Unreachable(self.address.clone()),
        })
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}
