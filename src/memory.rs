//! In-Memory Transport - Loopback broker for tests and demos
//!
//! `MemoryNetwork` routes connections between endpoints registered on the same
//! broker, entirely in-process. Frames are JSON-encoded exactly as a real
//! transport would carry them, so everything above this layer behaves the same
//! over loopback as over a network.
//!
//! Identity semantics mirror a live broker: a name is held while its endpoint
//! is alive and becomes claimable again once the endpoint is dropped.

use crate::identity::PeerId;
use crate::message::{ConnectMetadata, WireMessage};
use crate::transport::{Connection, Endpoint, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

type AcceptSender = mpsc::UnboundedSender<Arc<MemoryConnection>>;

/// Shared loopback broker - implements [`Transport`] for every endpoint
/// registered on it.
#[derive(Default)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<HashMap<PeerId, AcceptSender>>>,
}

impl MemoryNetwork {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn register(&self, id: PeerId) -> Result<Box<dyn Endpoint>, TransportError> {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        {
            let mut registry = self.registry.lock();
            // A closed sender is a dropped endpoint; sweeping here keeps the
            // map bounded by the number of live identities.
            registry.retain(|_, tx| !tx.is_closed());
            if registry.contains_key(&id) {
                return Err(TransportError::IdentityTaken(id));
            }
            registry.insert(id.clone(), accept_tx);
        }

        Ok(Box::new(MemoryEndpoint {
            id,
            registry: self.registry.clone(),
            accept_rx: AsyncMutex::new(accept_rx),
        }))
    }
}

/// One registered identity on a [`MemoryNetwork`].
pub struct MemoryEndpoint {
    id: PeerId,
    registry: Arc<Mutex<HashMap<PeerId, AcceptSender>>>,
    accept_rx: AsyncMutex<mpsc::UnboundedReceiver<Arc<MemoryConnection>>>,
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    async fn connect(
        &self,
        remote: &PeerId,
        metadata: ConnectMetadata,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        let accept_tx = self
            .registry
            .lock()
            .get(remote)
            .filter(|tx| !tx.is_closed())
            .cloned()
            .ok_or_else(|| TransportError::PeerUnreachable(remote.clone()))?;

        // Two crossed frame pipes make up one logical channel.
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let local = Arc::new(MemoryConnection {
            remote_id: remote.clone(),
            metadata: metadata.clone(),
            tx: out_tx,
            rx: AsyncMutex::new(in_rx),
        });
        let far = Arc::new(MemoryConnection {
            remote_id: self.id.clone(),
            metadata,
            tx: in_tx,
            rx: AsyncMutex::new(out_rx),
        });

        accept_tx
            .send(far)
            .map_err(|_| TransportError::PeerUnreachable(remote.clone()))?;

        Ok(local)
    }

    async fn accept(&self) -> Option<Arc<dyn Connection>> {
        let conn = self.accept_rx.lock().await.recv().await?;
        Some(conn as Arc<dyn Connection>)
    }
}

/// One half of a loopback channel.
pub struct MemoryConnection {
    remote_id: PeerId,
    metadata: ConnectMetadata,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn remote_id(&self) -> &PeerId {
        &self.remote_id
    }

    fn metadata(&self) -> &ConnectMetadata {
        &self.metadata
    }

    async fn ready(&self) -> Result<(), TransportError> {
        // Loopback channels are usable the moment they are handed out.
        Ok(())
    }

    async fn send(&self, msg: &WireMessage) -> Result<(), TransportError> {
        let frame = msg
            .to_json()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<WireMessage, TransportError> {
        let frame = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)?;
        WireMessage::from_json(&frame).map_err(|e| TransportError::Serialization(e.to_string()))
    }
}
