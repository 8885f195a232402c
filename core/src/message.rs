//! Wire types exchanged over the broker.
//!
//! All messages are UTF-8 JSON. Field names are part of the protocol and
//! must stay stable across peers running different builds.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sync message schema version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Kind of filesystem change carried by a [`FileChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEvent {
	Created,
	Modified,
	Deleted,
	Renamed,
}

impl FileEvent {
	/// Capitalized label used in commit messages ("Created", "Modified", ...).
	pub fn label(&self) -> &'static str {
		match self {
			Self::Created => "Created",
			Self::Modified => "Modified",
			Self::Deleted => "Deleted",
			Self::Renamed => "Renamed",
		}
	}
}

impl fmt::Display for FileEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Created => "created",
			Self::Modified => "modified",
			Self::Deleted => "deleted",
			Self::Renamed => "renamed",
		};
		f.write_str(s)
	}
}

/// One path within a sync batch.
///
/// Deletions carry neither a commit hash nor a patch: the consumer removes
/// the path directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
	/// Path relative to the working-tree root, POSIX separators.
	pub file: String,
	pub event: FileEvent,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub commit_hash: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub patch: Option<String>,
}

/// A batch of changes published on the team channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
	pub version: u32,
	/// Unix seconds at publish time. Informational only; never used for
	/// ordering.
	pub timestamp: i64,
	/// The sender's display name. Receivers drop messages whose peer ID
	/// matches their own name (self-echo suppression).
	pub peer_id: String,
	pub changes: Vec<FileChange>,
}

impl SyncMessage {
	pub fn new(peer_id: impl Into<String>, changes: Vec<FileChange>) -> Self {
		Self {
			version: PROTOCOL_VERSION,
			timestamp: Utc::now().timestamp(),
			peer_id: peer_id.into(),
			changes,
		}
	}
}

/// Lifecycle phase of a presence message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
	Announce,
	Heartbeat,
	Goodbye,
}

/// Presence message published on the presence channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceMessage {
	#[serde(rename = "type")]
	pub kind: PresenceKind,
	pub node_id: String,
	pub username: String,
	pub ip_address: String,
	pub timestamp: i64,
}

/// Online/offline state, derived at read time from last-seen age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
	Online,
	Offline,
}

impl fmt::Display for PresenceStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Online => f.write_str("online"),
			Self::Offline => f.write_str("offline"),
		}
	}
}

/// Roster value stored per node ID in the broker hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
	pub username: String,
	pub status: PresenceStatus,
	pub last_seen: i64,
	pub ip_address: String,
	pub node_id: String,
}

/// A team chat message. Chat flows over its own channel and never touches
/// the replication pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
	pub sender: String,
	pub message: String,
	pub timestamp: i64,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub priority: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sync_message_wire_shape() {
		let msg = SyncMessage {
			version: 1,
			timestamp: 1_700_000_000,
			peer_id: "alice".into(),
			changes: vec![
				FileChange {
					file: "src/main.rs".into(),
					event: FileEvent::Modified,
					commit_hash: Some("abc123".into()),
					patch: Some("diff --git a/src/main.rs b/src/main.rs\n".into()),
				},
				FileChange {
					file: "old.txt".into(),
					event: FileEvent::Deleted,
					commit_hash: None,
					patch: None,
				},
			],
		};

		let json = serde_json::to_value(&msg).unwrap();
		assert_eq!(json["peer_id"], "alice");
		assert_eq!(json["changes"][0]["event"], "modified");
		// Deletions must not serialize empty patch/hash fields.
		assert!(json["changes"][1].get("patch").is_none());
		assert!(json["changes"][1].get("commit_hash").is_none());

		let back: SyncMessage = serde_json::from_value(json).unwrap();
		assert_eq!(back.changes.len(), 2);
		assert_eq!(back.changes[1].event, FileEvent::Deleted);
	}

	#[test]
	fn presence_message_type_tag() {
		let msg = PresenceMessage {
			kind: PresenceKind::Heartbeat,
			node_id: "node_00ff".into(),
			username: "bob".into(),
			ip_address: "10.0.0.2".into(),
			timestamp: 42,
		};
		let json = serde_json::to_string(&msg).unwrap();
		assert!(json.contains("\"type\":\"heartbeat\""));
	}

	#[test]
	fn chat_priority_omitted_when_false() {
		let msg = ChatMessage {
			sender: "carol".into(),
			message: "hi".into(),
			timestamp: 1,
			priority: false,
		};
		let json = serde_json::to_string(&msg).unwrap();
		assert!(!json.contains("priority"));

		// And tolerated when absent on the way in.
		let back: ChatMessage = serde_json::from_str(&json).unwrap();
		assert!(!back.priority);
	}
}
