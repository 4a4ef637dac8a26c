//! Transport Abstraction - Seam between the mesh core and the wire
//!
//! The mesh core is transport-agnostic: any layer able to register a named
//! identity, dial another identity by name, and move small structured frames
//! can host a mesh. Real deployments sit on a data-channel stack; tests and
//! the demo binary use the in-memory loopback in [`crate::memory`].
//!
//! Lifecycle mapping:
//! - registration `open`/`error` -> [`Transport::register`] returning Ok/Err
//! - connection `open`           -> [`Connection::ready`] resolving Ok
//! - connection `data`           -> [`Connection::recv`] resolving Ok
//! - connection `close`/`error`  -> [`Connection::recv`] resolving Err
//!
//! Connections are handed out as `Arc<dyn Connection>` with `&self` methods so
//! one handle can sit in a connection set while another drives the receive
//! loop. Dropping every handle closes the channel.

use crate::identity::PeerId;
use crate::message::{ConnectMetadata, WireMessage};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Transport trait - Registers local identities onto the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Claim `id` as a live endpoint.
    ///
    /// Fails with [`TransportError::IdentityTaken`] while another live
    /// endpoint holds the same identity.
    async fn register(&self, id: PeerId) -> Result<Box<dyn Endpoint>, TransportError>;
}

/// A registered identity: the local side of the mesh wire.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The identity this endpoint was registered under.
    fn local_id(&self) -> &PeerId;

    /// Dial a remote identity, delivering `metadata` to the accepting side.
    async fn connect(
        &self,
        remote: &PeerId,
        metadata: ConnectMetadata,
    ) -> Result<Arc<dyn Connection>, TransportError>;

    /// Wait for the next inbound connection; None once the endpoint is closed.
    async fn accept(&self) -> Option<Arc<dyn Connection>>;
}

/// A bidirectional logical channel to exactly one remote identity.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identity of the other side.
    fn remote_id(&self) -> &PeerId;

    /// Metadata the dialing side attached to this connection.
    fn metadata(&self) -> &ConnectMetadata;

    /// Resolves once the channel is usable, or with the error that killed it
    /// before it ever opened.
    async fn ready(&self) -> Result<(), TransportError>;

    /// Send one structured message over the open channel.
    async fn send(&self, msg: &WireMessage) -> Result<(), TransportError>;

    /// Receive the next structured message.
    ///
    /// An Err is the channel's close/error event; no further messages follow.
    async fn recv(&self) -> Result<WireMessage, TransportError>;
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Another live endpoint already holds the identity.
    #[error("identity `{0}` is already taken")]
    IdentityTaken(PeerId),

    /// The dialed identity is not registered on the transport.
    #[error("peer `{0}` is unreachable")]
    PeerUnreachable(PeerId),

    /// The channel closed; equivalent to the remote's close or error event.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Anything else the underlying transport reports.
    #[error("transport failure: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let taken = TransportError::IdentityTaken("meshchat-seed-alice".into());
        assert_eq!(
            taken.to_string(),
            "identity `meshchat-seed-alice` is already taken"
        );

        let gone = TransportError::PeerUnreachable("meshchat-seed".into());
        assert_eq!(gone.to_string(), "peer `meshchat-seed` is unreachable");
    }
}
