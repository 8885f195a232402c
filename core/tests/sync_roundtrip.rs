//! End-to-end producer → consumer tests across two working trees,
//! exercising the real git CLI but no broker: messages are handed over
//! directly.

mod common;

use std::collections::HashMap;

use common::{init_repo, read_file, write_file};
use tempfile::TempDir;

use axle_core::message::{FileChange, FileEvent, SyncMessage};
use axle_core::sync::{ConflictStrategy, PatchConsumer, PatchProducer};
use axle_core::watcher::WriteMute;

struct Peer {
	dir: TempDir,
	producer: PatchProducer,
	consumer: PatchConsumer,
	mute: WriteMute,
}

async fn peer(name: &str, strategy: ConflictStrategy) -> Peer {
	let dir = TempDir::new().unwrap();
	let repo = init_repo(dir.path(), name).await;
	let mute = WriteMute::default();
	Peer {
		producer: PatchProducer::new(repo.clone(), name),
		consumer: PatchConsumer::new(repo, name, strategy, mute.clone()),
		mute,
		dir,
	}
}

fn pending(entries: &[(&str, FileEvent)]) -> HashMap<String, FileEvent> {
	entries
		.iter()
		.map(|(path, event)| (path.to_string(), *event))
		.collect()
}

#[tokio::test]
async fn created_file_reaches_the_other_peer() {
	let alice = peer("alice", ConflictStrategy::Merge).await;
	let bob = peer("bob", ConflictStrategy::Merge).await;

	write_file(alice.dir.path(), "hello.txt", "hi\n");
	let msg = alice
		.producer
		.drain(pending(&[("hello.txt", FileEvent::Created)]))
		.await
		.expect("a message is produced");

	assert_eq!(msg.peer_id, "alice");
	assert_eq!(msg.changes.len(), 1);
	assert!(msg.changes[0].patch.is_some());

	let report = bob.consumer.handle(&msg).await;
	assert_eq!(report.applied, 1);
	assert_eq!(read_file(bob.dir.path(), "hello.txt"), "hi\n");
	// git am committed for us; no synthesized commit on top.
	assert!(report.synthesized_commit.is_none());
}

#[tokio::test]
async fn every_entry_references_exactly_one_commit() {
	let alice = peer("alice", ConflictStrategy::Merge).await;

	write_file(alice.dir.path(), "one.rs", "1\n");
	write_file(alice.dir.path(), "two.rs", "2\n");
	write_file(alice.dir.path(), "three.rs", "3\n");

	let msg = alice
		.producer
		.drain(pending(&[
			("one.rs", FileEvent::Created),
			("two.rs", FileEvent::Created),
			("three.rs", FileEvent::Created),
		]))
		.await
		.expect("a message is produced");

	let hashes: std::collections::HashSet<_> = msg
		.changes
		.iter()
		.filter_map(|c| c.commit_hash.as_deref())
		.collect();
	assert_eq!(hashes.len(), 1, "one batch, one commit");
	assert_eq!(msg.changes.len(), 3);
}

#[tokio::test]
async fn empty_batch_produces_nothing() {
	let alice = peer("alice", ConflictStrategy::Merge).await;
	assert!(alice.producer.drain(HashMap::new()).await.is_none());
}

#[tokio::test]
async fn clean_tree_produces_nothing() {
	let alice = peer("alice", ConflictStrategy::Merge).await;
	// Pending entry but nothing actually on disk to commit.
	let msg = alice
		.producer
		.drain(pending(&[("ghost.txt", FileEvent::Modified)]))
		.await;
	assert!(msg.is_none());
}

#[tokio::test]
async fn self_echo_is_dropped_without_mutation() {
	let alice = peer("alice", ConflictStrategy::Merge).await;

	write_file(alice.dir.path(), "mine.txt", "mine\n");
	let msg = alice
		.producer
		.drain(pending(&[("mine.txt", FileEvent::Created)]))
		.await
		.unwrap();

	// The broker fans our own publication back at us.
	let report = alice.consumer.handle(&msg).await;
	assert!(report.self_echo);
	assert_eq!(report.applied, 0);
	assert!(!alice.mute.engaged());
}

#[tokio::test]
async fn deletion_entries_remove_paths_idempotently() {
	let alice = peer("alice", ConflictStrategy::Merge).await;
	let bob = peer("bob", ConflictStrategy::Merge).await;

	// Seed both trees with the file.
	write_file(alice.dir.path(), "doomed.txt", "bye\n");
	let seed = alice
		.producer
		.drain(pending(&[("doomed.txt", FileEvent::Created)]))
		.await
		.unwrap();
	bob.consumer.handle(&seed).await;
	assert!(bob.dir.path().join("doomed.txt").exists());

	// Delete at alice; bob's consumer removes the path directly.
	std::fs::remove_file(alice.dir.path().join("doomed.txt")).unwrap();
	let msg = alice
		.producer
		.drain(pending(&[("doomed.txt", FileEvent::Deleted)]))
		.await
		.unwrap();
	assert!(msg.changes[0].patch.is_none());

	let report = bob.consumer.handle(&msg).await;
	assert_eq!(report.deleted, 1);
	assert!(!bob.dir.path().join("doomed.txt").exists());

	// At-least-once delivery: applying the same message again is a no-op.
	let report = bob.consumer.handle(&msg).await;
	assert_eq!(report.deleted, 1);
	assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn traversal_patch_is_rejected_before_the_repository() {
	let bob = peer("bob", ConflictStrategy::Merge).await;

	let msg = SyncMessage::new(
		"mallory",
		vec![FileChange {
			file: "../../etc/passwd".into(),
			event: FileEvent::Modified,
			commit_hash: None,
			patch: Some("--- a/../../etc/passwd\n+++ b/../../etc/passwd\n@@ -1 +1 @@\n-x\n+y\n".into()),
		}],
	);

	let report = bob.consumer.handle(&msg).await;
	assert!(report.rejected_by_validator);
	assert_eq!(report.applied, 0);
	assert!(report.synthesized_commit.is_none());
}

#[tokio::test]
async fn rejection_drops_sibling_deletions_too() {
	let bob = peer("bob", ConflictStrategy::Merge).await;

	// A real local file the message smuggles a deletion entry for.
	write_file(bob.dir.path(), "aaa.txt", "keep me\n");

	// Batches attach one shared patch to every non-deletion entry and the
	// producer sorts by path, so the deletion sorts ahead of the entry
	// whose patch fails validation. The whole message must still be
	// dropped before the deletion lands.
	let msg = SyncMessage::new(
		"mallory",
		vec![
			FileChange {
				file: "aaa.txt".into(),
				event: FileEvent::Deleted,
				commit_hash: None,
				patch: None,
			},
			FileChange {
				file: "zzz.txt".into(),
				event: FileEvent::Modified,
				commit_hash: None,
				patch: Some(
					"--- a/../../etc/passwd\n+++ b/../../etc/passwd\n@@ -1 +1 @@\n-x\n+y\n".into(),
				),
			},
		],
	);

	let report = bob.consumer.handle(&msg).await;
	assert!(report.rejected_by_validator);
	assert_eq!(report.deleted, 0);
	assert_eq!(report.applied, 0);
	assert!(report.synthesized_commit.is_none());
	assert!(!bob.mute.engaged());
	assert!(bob.dir.path().join("aaa.txt").exists());
	assert_eq!(read_file(bob.dir.path(), "aaa.txt"), "keep me\n");
}

#[tokio::test]
async fn unsafe_deletion_paths_are_refused() {
	let bob = peer("bob", ConflictStrategy::Merge).await;

	let msg = SyncMessage::new(
		"mallory",
		vec![FileChange {
			file: "../outside.txt".into(),
			event: FileEvent::Deleted,
			commit_hash: None,
			patch: None,
		}],
	);

	let report = bob.consumer.handle(&msg).await;
	assert_eq!(report.deleted, 0);
	assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn patchless_modify_entries_are_skipped() {
	let bob = peer("bob", ConflictStrategy::Merge).await;

	// Protocol violation: created/modified with no patch attached.
	let msg = SyncMessage::new(
		"alice",
		vec![FileChange {
			file: "phantom.txt".into(),
			event: FileEvent::Modified,
			commit_hash: None,
			patch: None,
		}],
	);

	let report = bob.consumer.handle(&msg).await;
	assert_eq!(report.applied, 0);
	assert_eq!(report.deleted, 0);
	assert!(!bob.dir.path().join("phantom.txt").exists());
}

#[tokio::test]
async fn mine_strategy_discards_inbound_changes() {
	let alice = peer("alice", ConflictStrategy::Merge).await;
	let bob = peer("bob", ConflictStrategy::Mine).await;

	write_file(alice.dir.path(), "news.txt", "latest\n");
	let msg = alice
		.producer
		.drain(pending(&[("news.txt", FileEvent::Created)]))
		.await
		.unwrap();

	let report = bob.consumer.handle(&msg).await;
	assert_eq!(report.applied, 0);
	assert!(!bob.dir.path().join("news.txt").exists());
}

#[tokio::test]
async fn round_trip_converges_to_identical_trees() {
	let alice = peer("alice", ConflictStrategy::Theirs).await;
	let bob = peer("bob", ConflictStrategy::Theirs).await;

	// Alice creates, bob receives.
	write_file(alice.dir.path(), "shared.txt", "from alice\n");
	let msg = alice
		.producer
		.drain(pending(&[("shared.txt", FileEvent::Created)]))
		.await
		.unwrap();
	bob.consumer.handle(&msg).await;

	// Bob edits on top, alice receives.
	write_file(bob.dir.path(), "shared.txt", "from alice\nand bob\n");
	let msg = bob
		.producer
		.drain(pending(&[("shared.txt", FileEvent::Modified)]))
		.await
		.unwrap();
	alice.consumer.handle(&msg).await;

	assert_eq!(
		read_file(alice.dir.path(), "shared.txt"),
		read_file(bob.dir.path(), "shared.txt"),
	);
}
