//! Shared helpers for tests that drive the real git CLI in throwaway
//! working trees.

use std::path::Path;

use axle_core::repo::{Author, GitRepo};

pub async fn init_repo(root: &Path, user: &str) -> GitRepo {
	let repo = GitRepo::new(root).with_author(Author::for_peer(user));
	repo.init().await.expect("repository init");
	repo
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
	let path = root.join(rel);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).expect("mkdir");
	}
	std::fs::write(path, content).expect("write");
}

pub fn read_file(root: &Path, rel: &str) -> String {
	std::fs::read_to_string(root.join(rel)).expect("read")
}

/// Write, commit, and return (commit hash, message-style patch).
pub async fn commit_and_patch(
	repo: &GitRepo,
	root: &Path,
	rel: &str,
	content: &str,
	message: &str,
) -> (String, String) {
	write_file(root, rel, content);
	let commit = repo
		.commit_all(message)
		.await
		.expect("commit")
		.expect("tree was dirty");
	let patch = repo.format_patch(&commit).await.expect("format-patch");
	(commit, patch)
}
