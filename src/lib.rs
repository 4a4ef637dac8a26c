//! Meshchat Core - Gossip mesh membership and replicated chat log
//!
//! This crate provides the peer, protocol, and transport traits for a small
//! peer-to-peer chat mesh. There is no central server: one well-known seed
//! peer bootstraps the mesh, and every other peer gossips its way to a full
//! mesh from there. Each connection is greeted with the complete peer list
//! and chat history, chat lines fan out to every open connection, and
//! author-minted line ids make the replication idempotent.
//!
//! # Core Components
//!
//! - [`identity`]: Peer identities derived from display names
//! - [`message`]: Chat lines, the deduplicating log, and the wire format
//! - [`transport`]: Abstraction over registration, dialing, and channels
//! - [`memory`]: In-process loopback transport for tests and demos
//! - [`peer`]: The mesh peer itself
//!
//! # Example
//!
//! ```rust,ignore
//! use meshchat_core::prelude::*;
//! use std::sync::Arc;
//!
//! // One broker shared by every peer in the process.
//! let network = Arc::new(MemoryNetwork::new());
//!
//! // The seed comes up first; named peers bootstrap through it.
//! let seed = MeshPeer::new(None, network.clone());
//! let alice = MeshPeer::new(Some("Alice"), network.clone());
//!
//! // Redraw on every observable change.
//! let sub = alice.subscribe(|| println!("something changed"));
//!
//! alice.send_message("hello, mesh!")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod identity;
pub mod memory;
pub mod message;
pub mod peer;
pub mod transport;

// Re-export commonly used types
pub use identity::{slug, PeerId, MIN_NAME_SLUG_LEN, SEED_IDENTITY};
pub use memory::{MemoryConnection, MemoryEndpoint, MemoryNetwork};
pub use message::{ChatLine, ChatLog, ConnectMetadata, WireMessage};
pub use peer::{MeshConfig, MeshError, MeshPeer, NotReadyError, Subscription};
pub use transport::{Connection, Endpoint, Transport, TransportError};

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient imports for common use cases
    pub use crate::identity::PeerId;
    pub use crate::memory::MemoryNetwork;
    pub use crate::message::ChatLine;
    pub use crate::peer::{MeshConfig, MeshError, MeshPeer};
    pub use crate::transport::Transport;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_exports() {
        // Just verify exports compile
        let _: PeerId = PeerId::seed();
        let line: ChatLine = ChatLine::new("alice", "hi");
        let _: WireMessage = WireMessage::Chat { lines: vec![line] };
    }

    /// Give every spawned task a generous number of turns on the current
    /// thread runtime.
    async fn settle() {
        for _ in 0..200 {
            tokio::task::yield_now().await;
        }
    }

    /// Every peer is connected to every other peer, cleanly.
    fn assert_full_mesh(peers: &[&MeshPeer]) {
        for peer in peers {
            assert_eq!(peer.current_error(), None, "{} hit an error", peer.id());
            assert!(!peer.is_loading(), "{} still loading", peer.id());
            let connected = peer.connected_peers();
            assert_eq!(
                connected.len(),
                peers.len() - 1,
                "{} sees {:?}",
                peer.id(),
                connected
            );
            assert!(
                !connected.contains(&peer.id()),
                "{} connected to itself",
                peer.id()
            );
        }
    }

    /// Same lines everywhere, each exactly once, field for field.
    fn assert_same_log(peers: &[&MeshPeer], expected_len: usize) {
        let mut logs: Vec<Vec<ChatLine>> = peers
            .iter()
            .map(|peer| {
                let mut log = peer.chat_log();
                let ids: HashSet<String> = log.iter().map(|line| line.id.clone()).collect();
                assert_eq!(ids.len(), log.len(), "{} has duplicates", peer.id());
                log.sort_by(|a, b| a.id.cmp(&b.id));
                log
            })
            .collect();
        let reference = logs.pop().unwrap();
        assert_eq!(reference.len(), expected_len);
        for log in logs {
            assert_eq!(log, reference);
        }
    }

    #[tokio::test]
    async fn test_staggered_joins_converge_to_full_mesh() {
        let net = Arc::new(MemoryNetwork::new());

        let seed = MeshPeer::new(None, net.clone());
        settle().await;
        let alice = MeshPeer::new(Some("alice"), net.clone());
        settle().await;
        let bob = MeshPeer::new(Some("bob"), net.clone());
        settle().await;
        let carol = MeshPeer::new(Some("carol"), net.clone());
        settle().await;

        assert_full_mesh(&[&seed, &alice, &bob, &carol]);
    }

    #[tokio::test]
    async fn test_simultaneous_joins_converge_to_full_mesh() {
        let net = Arc::new(MemoryNetwork::new());

        let seed = MeshPeer::new(None, net.clone());
        let alice = MeshPeer::new(Some("alice"), net.clone());
        let bob = MeshPeer::new(Some("bob"), net.clone());
        let carol = MeshPeer::new(Some("carol"), net.clone());
        settle().await;

        assert_full_mesh(&[&seed, &alice, &bob, &carol]);
    }

    #[tokio::test]
    async fn test_history_and_live_lines_replicate_everywhere() {
        let net = Arc::new(MemoryNetwork::new());

        let seed = MeshPeer::new(None, net.clone());
        let alice = MeshPeer::new(Some("alice"), net.clone());
        settle().await;

        // Said before bob exists, so bob can only get them from history.
        alice.send_message("first").unwrap();
        alice.send_message("second").unwrap();
        settle().await;

        let bob = MeshPeer::new(Some("bob"), net.clone());
        settle().await;
        bob.send_message("third").unwrap();
        settle().await;

        assert_full_mesh(&[&seed, &alice, &bob]);
        assert_same_log(&[&seed, &alice, &bob], 3);

        let log = bob.chat_log();
        assert!(log
            .iter()
            .any(|line| line.sender == "alice" && line.content == "first"));
        assert!(log
            .iter()
            .any(|line| line.sender == "bob" && line.content == "third"));
    }

    #[tokio::test]
    async fn test_departed_peer_is_forgotten_and_identity_reusable() {
        let net = Arc::new(MemoryNetwork::new());

        let seed = MeshPeer::new(None, net.clone());
        let alice = MeshPeer::new(Some("alice"), net.clone());
        let bob = MeshPeer::new(Some("bob"), net.clone());
        settle().await;
        assert_full_mesh(&[&seed, &alice, &bob]);

        seed.send_message("for the record").unwrap();
        settle().await;

        let alice_id = alice.id();
        drop(alice);
        settle().await;

        assert!(!seed.connected_peers().contains(&alice_id));
        assert!(!bob.connected_peers().contains(&alice_id));

        // The identity is free again, and the rejoiner inherits the history.
        let alice_again = MeshPeer::new(Some("alice"), net.clone());
        settle().await;

        assert_eq!(alice_again.current_error(), None);
        assert_full_mesh(&[&seed, &alice_again, &bob]);
        assert_same_log(&[&seed, &alice_again, &bob], 1);
    }
}
