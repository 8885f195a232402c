//! Turns a drained batch into one commit and one outbound sync message.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::message::{FileChange, FileEvent, SyncMessage};
use crate::repo::GitRepo;

/// Produces sync messages from pending batches. Runs only on batch-timer
/// fire, so it never overlaps itself.
pub struct PatchProducer {
	repo: GitRepo,
	peer_id: String,
}

impl PatchProducer {
	pub fn new(repo: GitRepo, peer_id: impl Into<String>) -> Self {
		Self {
			repo,
			peer_id: peer_id.into(),
		}
	}

	/// Commit the batch and package it for the team channel.
	///
	/// Returns `None` without touching the repository for an empty batch,
	/// and `None` when the working tree turns out to be clean (the watcher
	/// raced us) or the patch cannot be formatted this round; in the
	/// latter case the commit stays local and propagates with the next
	/// clean format.
	pub async fn drain(&self, pending: HashMap<String, FileEvent>) -> Option<SyncMessage> {
		if pending.is_empty() {
			return None;
		}

		let message = commit_message(&pending);

		let commit = match self.repo.commit_all(&message).await {
			Ok(Some(hash)) => hash,
			Ok(None) => {
				debug!("working tree clean, nothing to publish");
				return None;
			}
			Err(e) => {
				warn!("commit failed, dropping batch from this round: {e}");
				return None;
			}
		};

		let patch = match self.repo.format_patch(&commit).await {
			Ok(patch) => patch,
			Err(e) => {
				warn!("format-patch failed for {commit}; commit stays local: {e}");
				return None;
			}
		};

		// Peers index behaviour by file, not by commit: every non-deletion
		// entry carries the same batch patch so the consumer's per-file
		// loop can decide independently.
		let mut files: Vec<_> = pending.into_iter().collect();
		files.sort_by(|a, b| a.0.cmp(&b.0));

		let changes = files
			.into_iter()
			.map(|(file, event)| {
				if event == FileEvent::Deleted {
					FileChange {
						file,
						event,
						commit_hash: None,
						patch: None,
					}
				} else {
					FileChange {
						file,
						event,
						commit_hash: Some(commit.clone()),
						patch: Some(patch.clone()),
					}
				}
			})
			.collect::<Vec<_>>();

		info!(
			"committed {commit} ({} change{})",
			changes.len(),
			if changes.len() == 1 { "" } else { "s" }
		);

		Some(SyncMessage::new(self.peer_id.clone(), changes))
	}
}

/// Single-entry batches name the file; anything larger gets a count.
fn commit_message(pending: &HashMap<String, FileEvent>) -> String {
	if pending.len() == 1 {
		let (file, event) = pending.iter().next().expect("non-empty");
		format!("{} {file}", event.label())
	} else {
		format!("Batch update: {} files changed", pending.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_entry_commit_message_names_the_file() {
		let mut pending = HashMap::new();
		pending.insert("src/main.rs".to_string(), FileEvent::Modified);
		assert_eq!(commit_message(&pending), "Modified src/main.rs");
	}

	#[test]
	fn multi_entry_commit_message_counts() {
		let mut pending = HashMap::new();
		pending.insert("a".to_string(), FileEvent::Created);
		pending.insert("b".to_string(), FileEvent::Deleted);
		pending.insert("c".to_string(), FileEvent::Modified);
		assert_eq!(commit_message(&pending), "Batch update: 3 files changed");
	}
}
