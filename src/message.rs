//! Wire Messages - Gossip payloads and the replicated chat log
//!
//! Two message kinds travel between peers: `seeds` (the sender's known peer
//! identities, driving mesh convergence) and `chat` (one or more chat lines,
//! driving history replication). Both are plain JSON so any transport able to
//! move small structured frames can carry them.
//!
//! The chat log is append-only and deduplicated by line id. Merge order is
//! receipt order: lines are appended as they arrive, whether typed locally or
//! received from a peer, and no cross-peer ordering is reconstructed.

use crate::identity::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A single immutable chat entry.
///
/// The id is minted by the author and is the mesh-wide deduplication key;
/// sender is the author's display name (or `"seed"` for the seed instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    /// Unique line id, generated by the author.
    pub id: String,
    /// Author's display name.
    pub sender: String,
    /// Message text.
    pub content: String,
}

impl ChatLine {
    /// Create a new line authored locally, with a fresh unique id.
    pub fn new(sender: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
        }
    }
}

/// Append-only chat history, deduplicated by line id.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    lines: Vec<ChatLine>,
    seen: HashSet<String>,
}

impl ChatLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line unless its id is already present.
    ///
    /// Returns true if the line was inserted.
    pub fn insert(&mut self, line: ChatLine) -> bool {
        if !self.seen.insert(line.id.clone()) {
            return false;
        }
        self.lines.push(line);
        true
    }

    /// Merge remotely received lines in their received order.
    ///
    /// Returns how many lines were new.
    pub fn merge(&mut self, lines: Vec<ChatLine>) -> usize {
        let mut added = 0;
        for line in lines {
            if self.insert(line) {
                added += 1;
            }
        }
        added
    }

    /// The log contents in receipt order.
    pub fn lines(&self) -> &[ChatLine] {
        &self.lines
    }

    /// Number of distinct lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Wire-level unit of gossip, exchanged only over open connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    /// Peer identities known to the sender.
    #[serde(rename_all = "camelCase")]
    Seeds { peer_ids: Vec<PeerId> },
    /// Chat lines: a single fresh line, or a whole log when greeting a new peer.
    Chat { lines: Vec<ChatLine> },
}

impl WireMessage {
    /// Serialize to a JSON frame.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from a JSON frame.
    pub fn from_json(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }
}

/// Metadata a dialing peer attaches to its connection attempt.
///
/// Carries the dialer's known peer identities so the accepting side can start
/// connecting to the rest of the mesh before any gossip message arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectMetadata {
    /// Peer identities known to the dialer.
    pub peer_ids: Vec<PeerId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_line_ids_are_unique() {
        let a = ChatLine::new("alice", "hello");
        let b = ChatLine::new("alice", "hello");
        assert_ne!(a.id, b.id);
        assert_eq!(a.sender, b.sender);
        assert_eq!(a.content, b.content);
    }

    #[test]
    fn test_log_deduplicates_by_id() {
        let mut log = ChatLog::new();
        let line = ChatLine::new("bob", "hi");

        assert!(log.insert(line.clone()));
        assert!(!log.insert(line.clone()));
        assert_eq!(log.len(), 1);

        // Same id with different content is still a duplicate.
        let mut forged = line;
        forged.content = "edited".to_string();
        assert!(!log.insert(forged));
        assert_eq!(log.lines()[0].content, "hi");
    }

    #[test]
    fn test_merge_preserves_receipt_order() {
        let mut log = ChatLog::new();
        let first = ChatLine::new("alice", "one");
        let second = ChatLine::new("bob", "two");
        let third = ChatLine::new("alice", "three");

        log.insert(first.clone());
        let added = log.merge(vec![second.clone(), first.clone(), third.clone()]);

        assert_eq!(added, 2);
        let contents: Vec<_> = log.lines().iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    #[test]
    fn test_seeds_wire_shape() {
        let msg = WireMessage::Seeds {
            peer_ids: vec!["meshchat-seed".into(), "meshchat-seed-alice".into()],
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "seeds",
                "peerIds": ["meshchat-seed", "meshchat-seed-alice"],
            })
        );
    }

    #[test]
    fn test_chat_wire_shape() {
        let msg = WireMessage::Chat {
            lines: vec![ChatLine {
                id: "line-1".to_string(),
                sender: "alice".to_string(),
                content: "hello mesh".to_string(),
            }],
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "chat",
                "lines": [{"id": "line-1", "sender": "alice", "content": "hello mesh"}],
            })
        );
    }

    #[test]
    fn test_wire_frame_parsing() {
        let frame = br#"{"type":"seeds","peerIds":["meshchat-seed"]}"#;
        let msg = WireMessage::from_json(frame).unwrap();
        assert_eq!(
            msg,
            WireMessage::Seeds {
                peer_ids: vec!["meshchat-seed".into()],
            }
        );

        assert!(WireMessage::from_json(b"{\"type\":\"unknown\"}").is_err());
    }

    #[test]
    fn test_connect_metadata_shape() {
        let meta = ConnectMetadata {
            peer_ids: vec!["meshchat-seed-bob".into()],
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value, json!({"peerIds": ["meshchat-seed-bob"]}));
    }
}
