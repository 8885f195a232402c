//! Re-integrates sync messages from other peers into the working tree.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::message::{FileEvent, SyncMessage};
use crate::patch;
use crate::repo::GitRepo;
use crate::watcher::WriteMute;

use super::strategy::{apply_with_strategy, ConflictStrategy};

/// Settle time after releasing the mute so lagging filesystem
/// notifications from our own writes are still absorbed.
const MUTE_GRACE: Duration = Duration::from_millis(100);

/// What one inbound message did to the local tree. Mostly of interest to
/// the log and to tests.
#[derive(Debug, Default)]
pub struct ApplyReport {
	/// Message originated here and was dropped unread.
	pub self_echo: bool,
	/// Whole message dropped by the validator.
	pub rejected_by_validator: bool,
	/// Patch entries applied.
	pub applied: usize,
	/// Paths removed by deletion entries.
	pub deleted: usize,
	/// Entries that failed to apply and were dropped.
	pub failed: usize,
	/// Paths left carrying conflict markers or rejected hunks.
	pub conflicts: Vec<String>,
	/// Commit synthesised to record the changes, if any strategy did not
	/// already commit.
	pub synthesized_commit: Option<String>,
}

/// Applies inbound sync messages sequentially (the subscribe channel
/// serialises delivery, so no two applications ever interleave).
pub struct PatchConsumer {
	repo: GitRepo,
	peer_id: String,
	strategy: ConflictStrategy,
	mute: WriteMute,
}

impl PatchConsumer {
	pub fn new(
		repo: GitRepo,
		peer_id: impl Into<String>,
		strategy: ConflictStrategy,
		mute: WriteMute,
	) -> Self {
		Self {
			repo,
			peer_id: peer_id.into(),
			strategy,
			mute,
		}
	}

	/// Apply one inbound message under the configured strategy.
	pub async fn handle(&self, msg: &SyncMessage) -> ApplyReport {
		let mut report = ApplyReport::default();

		// The broker fans every publication back to its publisher.
		if msg.peer_id == self.peer_id {
			report.self_echo = true;
			return report;
		}

		// Validate every patch before anything touches the tree: one bad
		// patch drops the whole message, deletion entries included, so a
		// rejected message is never partially applied. Entries of one batch
		// share a single patch, so each distinct body is checked once.
		let mut checked: Option<&str> = None;
		for change in &msg.changes {
			let Some(patch_text) = change.patch.as_deref().filter(|p| !p.is_empty()) else {
				continue;
			};
			if checked == Some(patch_text) {
				continue;
			}
			if let Err(e) = patch::validate(patch_text) {
				warn!(
					"rejecting sync message from {}: {e}; nothing applied for it",
					msg.peer_id
				);
				report.rejected_by_validator = true;
				return report;
			}
			checked = Some(patch_text);
		}

		debug!(
			"sync message from {} with {} change(s)",
			msg.peer_id,
			msg.changes.len()
		);

		self.mute.engage();

		let mut auto_committed = false;
		for change in &msg.changes {
			let patch_text = change.patch.as_deref().filter(|p| !p.is_empty());

			if let Some(patch_text) = patch_text {
				match apply_with_strategy(&self.repo, patch_text, self.strategy).await {
					Ok(outcome) => {
						if outcome.applied {
							report.applied += 1;
						}
						auto_committed |= outcome.auto_committed;
						report.conflicts.extend(outcome.conflicts);
					}
					Err(e) => {
						warn!("failed to apply patch for {}: {e}", change.file);
						report.failed += 1;
					}
				}
				continue;
			}

			if change.event == FileEvent::Deleted {
				match self.remove_path(&change.file).await {
					Ok(()) => report.deleted += 1,
					Err(e) => {
						warn!("failed to delete {}: {e}", change.file);
						report.failed += 1;
					}
				}
				continue;
			}

			// A created/modified entry with no patch cannot be applied;
			// the producer should never emit one.
			warn!(
				"protocol violation from {}: {} entry for {} carries no patch",
				msg.peer_id, change.event, change.file
			);
		}

		let changed = report.applied + report.deleted;
		if changed > 0 && !auto_committed {
			let message = format!("[SYNC] Received {changed} changes from {}", msg.peer_id);
			match self.repo.commit_all(&message).await {
				Ok(Some(hash)) => {
					info!("applied and committed {changed} change(s) from {}", msg.peer_id);
					report.synthesized_commit = Some(hash);
				}
				Ok(None) => debug!("nothing left to commit after applying from {}", msg.peer_id),
				Err(e) => warn!("could not commit synced changes: {e}"),
			}
		} else if auto_committed {
			info!(
				"applied and committed {changed} change(s) from {} (committed by apply)",
				msg.peer_id
			);
		}

		// Let trailing notifications for our own writes arrive while still
		// muted.
		tokio::time::sleep(MUTE_GRACE).await;
		self.mute.release();

		report
	}

	/// Remove a path from the working tree. A missing path is success:
	/// deletion is idempotent.
	async fn remove_path(&self, rel: &str) -> std::io::Result<()> {
		if !patch::safe_relative(rel) {
			return Err(std::io::Error::new(
				std::io::ErrorKind::InvalidInput,
				format!("refusing deletion outside the working tree: {rel}"),
			));
		}

		let target = self.repo.root().join(rel);
		let result = if target.is_dir() {
			tokio::fs::remove_dir_all(&target).await
		} else {
			tokio::fs::remove_file(&target).await
		};

		match result {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e),
		}
	}
}
