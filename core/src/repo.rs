//! Repository adapter over the `git` CLI.
//!
//! The version-control tool is an external collaborator discovered on
//! `PATH`; this module owns the full command surface the rest of the crate
//! is allowed to touch. Callers never see raw process output except through
//! [`RepoError`], which carries stdout and stderr for the log.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::patch;

#[derive(Debug, Error)]
pub enum RepoError {
	#[error("git {command} failed: {stderr}")]
	Command {
		command: String,
		stdout: String,
		stderr: String,
	},

	#[error("patch does not apply: {0}")]
	Apply(String),

	#[error("i/o failure talking to git: {0}")]
	Io(#[from] std::io::Error),
}

/// Commit author identity passed explicitly on every commit so peers
/// without global git config still produce patches with valid headers.
#[derive(Debug, Clone)]
pub struct Author {
	pub name: String,
	pub email: String,
}

impl Author {
	/// The identity Axle commits under for a given display name.
	pub fn for_peer(username: &str) -> Self {
		Self {
			name: username.to_string(),
			email: format!("{username}@axle.local"),
		}
	}
}

/// Handle on one local working tree and its repository.
#[derive(Debug, Clone)]
pub struct GitRepo {
	root: PathBuf,
	author: Option<Author>,
}

impl GitRepo {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			author: None,
		}
	}

	pub fn with_author(mut self, author: Author) -> Self {
		self.author = Some(author);
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Initialize the repository. Idempotent; creates an empty initial
	/// commit when history is empty so every future commit has a parent.
	pub async fn init(&self) -> Result<(), RepoError> {
		self.run(&["init"]).await?;

		let (has_history, _) = self.probe(&["log", "--oneline", "-n", "1"]).await?;
		if !has_history {
			self.run(&["commit", "--allow-empty", "-m", "Initial commit"])
				.await?;
		}
		Ok(())
	}

	/// Stage every tracked change including deletions and commit.
	///
	/// Returns `None` when the working tree was already clean, a normal
	/// outcome of the race between the watcher and the producer, not an
	/// error.
	pub async fn commit_all(&self, message: &str) -> Result<Option<String>, RepoError> {
		self.run(&["add", "."]).await?;

		let (ok, out) = self.probe(&["commit", "-m", message]).await?;
		if !ok {
			if out.contains("nothing to commit")
				|| out.contains("working tree clean")
				|| out.contains("no changes added to commit")
			{
				return Ok(None);
			}
			return Err(RepoError::Command {
				command: "commit".into(),
				stdout: String::new(),
				stderr: out,
			});
		}

		let hash = self.run(&["rev-parse", "HEAD"]).await?;
		Ok(Some(hash.trim().to_string()))
	}

	/// Format the patch for a single commit.
	///
	/// The initial commit has no parent to diff against, so it is emitted
	/// via `git show`, whose diff creates every file from scratch.
	pub async fn format_patch(&self, commit: &str) -> Result<String, RepoError> {
		let parent = format!("{commit}^");
		let (has_parent, _) = self.probe(&["rev-parse", "--verify", &parent]).await?;

		if has_parent {
			let range = format!("{parent}..{commit}");
			self.run(&["format-patch", "--stdout", &range]).await
		} else {
			self.run(&["show", commit]).await
		}
	}

	/// Apply a patch, choosing the mode from its shape.
	///
	/// Message-style patches are applied with `git am --3way` and commit in
	/// one step (returns `true`). Bare diffs are applied to the working
	/// tree without committing (returns `false`). A message-style patch
	/// whose ancestry is absent falls back to its extracted diff body and
	/// reports `false` so the caller can synthesise a commit.
	pub async fn apply_patch(&self, patch_text: &str) -> Result<bool, RepoError> {
		self.cleanup_apply_state().await;

		if !patch::is_message_style(patch_text) {
			self.apply_diff(patch_text).await?;
			return Ok(false);
		}

		let first = match self.am(patch_text).await {
			Ok(()) => return Ok(true),
			Err(out) => out,
		};

		if first.contains("would be overwritten") || first.contains("already exists") {
			// Untracked local files shadow the incoming tree; discard and retry.
			self.abort_am().await;
			self.reset_hard().await?;
			self.clean().await?;
			match self.am(patch_text).await {
				Ok(()) => return Ok(true),
				Err(out) => return Err(RepoError::Apply(out)),
			}
		}

		if first.contains("sha1 information is lacking")
			|| first.contains("could not build fake ancestor")
		{
			// Peers that started from independent roots share no ancestry;
			// apply the diff body and let the caller commit.
			self.abort_am().await;
			if let Some(diff) = diff_body(patch_text) {
				debug!("ancestry missing, applying extracted diff body");
				self.apply_diff(diff).await?;
				return Ok(false);
			}
		}

		// Leave any conflict state in place: the strategy layer inspects it.
		Err(RepoError::Apply(first))
	}

	/// Apply a bare diff: index-and-reject first, three-way on refusal.
	async fn apply_diff(&self, diff: &str) -> Result<(), RepoError> {
		let (ok, first) = self
			.probe_with_stdin(
				&["apply", "--whitespace=nowarn", "--index", "--reject", "-"],
				diff,
			)
			.await?;
		if ok {
			return Ok(());
		}

		let (ok, second) = self
			.probe_with_stdin(&["apply", "--whitespace=nowarn", "--3way", "-"], diff)
			.await?;
		if ok {
			return Ok(());
		}

		Err(RepoError::Apply(format!(
			"apply --index --reject: {first}\napply --3way: {second}"
		)))
	}

	async fn am(&self, patch_text: &str) -> Result<(), String> {
		match self
			.probe_with_stdin(
				&["am", "--whitespace=nowarn", "--ignore-whitespace", "--3way"],
				patch_text,
			)
			.await
		{
			Ok((true, _)) => Ok(()),
			Ok((false, out)) => Err(out),
			Err(e) => Err(e.to_string()),
		}
	}

	async fn abort_am(&self) {
		let _ = self.probe(&["am", "--abort"]).await;
	}

	/// Abort any in-flight am/rebase/merge left over from a previous apply.
	pub async fn cleanup_apply_state(&self) {
		for args in [
			["am", "--abort"],
			["rebase", "--abort"],
			["merge", "--abort"],
		] {
			let _ = self.probe(&args).await;
		}
	}

	pub async fn reset_hard(&self) -> Result<(), RepoError> {
		self.run(&["reset", "--hard", "HEAD"]).await.map(|_| ())
	}

	/// Remove untracked files and directories.
	pub async fn clean(&self) -> Result<(), RepoError> {
		self.run(&["clean", "-fd"]).await.map(|_| ())
	}

	pub async fn add_all(&self) -> Result<(), RepoError> {
		self.run(&["add", "-A"]).await.map(|_| ())
	}

	/// Stash local work so a destructive apply can be undone by hand.
	pub async fn stash_push(&self, message: &str) -> Result<(), RepoError> {
		let (ok, out) = self.probe(&["stash", "push", "-m", message]).await?;
		if !ok && !out.contains("No local changes") {
			warn!("stash push failed: {}", out.trim());
		}
		Ok(())
	}

	/// Paths currently in the unmerged (conflicted) state.
	pub async fn conflicted_files(&self) -> Vec<String> {
		match self
			.probe(&["diff", "--name-only", "--diff-filter=U"])
			.await
		{
			Ok((true, out)) => out
				.lines()
				.map(str::trim)
				.filter(|l| !l.is_empty())
				.map(str::to_string)
				.collect(),
			_ => Vec::new(),
		}
	}

	/// Non-empty `git status --porcelain` lines.
	pub async fn status_lines(&self) -> Result<Vec<String>, RepoError> {
		let out = self.run(&["status", "--porcelain"]).await?;
		Ok(out
			.lines()
			.filter(|l| !l.trim().is_empty())
			.map(str::to_string)
			.collect())
	}

	/// Total commits reachable from HEAD.
	pub async fn commit_count(&self) -> u64 {
		match self.probe(&["rev-list", "--count", "HEAD"]).await {
			Ok((true, out)) => out.trim().parse().unwrap_or(0),
			_ => 0,
		}
	}

	/// Commit time (unix seconds) and subject of the HEAD commit.
	pub async fn last_commit(&self) -> Option<(i64, String)> {
		let (ok, out) = self.probe(&["log", "-1", "--format=%ct|%s"]).await.ok()?;
		if !ok {
			return None;
		}
		let line = out.trim();
		let (ts, subject) = line.split_once('|')?;
		Some((ts.parse().ok()?, subject.to_string()))
	}

	/// Commits made since the given instant.
	pub async fn commits_since(&self, since: DateTime<Utc>) -> u64 {
		let since = format!("--since={}", since.to_rfc3339());
		match self
			.probe(&["rev-list", "--count", &since, "HEAD"])
			.await
		{
			Ok((true, out)) => out.trim().parse().unwrap_or(0),
			_ => 0,
		}
	}

	/// How many commits touched each path, over all of history.
	pub async fn change_frequencies(&self) -> HashMap<String, u64> {
		let mut freq = HashMap::new();
		if let Ok((true, out)) = self.probe(&["log", "--pretty=format:", "--name-only"]).await {
			for line in out.lines() {
				let path = line.trim();
				if !path.is_empty() {
					*freq.entry(path.to_string()).or_insert(0) += 1;
				}
			}
		}
		freq
	}

	/// Append a name to `.git/info/exclude` so it never syncs.
	pub async fn exclude_from_vcs(&self, name: &str) -> Result<(), RepoError> {
		let exclude = self.root.join(".git").join("info").join("exclude");
		if let Some(parent) = exclude.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let mut existing = tokio::fs::read_to_string(&exclude)
			.await
			.unwrap_or_default();
		if existing.lines().any(|l| l.trim() == name) {
			return Ok(());
		}
		if !existing.is_empty() && !existing.ends_with('\n') {
			existing.push('\n');
		}
		existing.push_str(name);
		existing.push('\n');
		tokio::fs::write(&exclude, existing).await?;
		Ok(())
	}

	// -- process plumbing --

	fn command(&self, args: &[&str]) -> Command {
		let mut cmd = Command::new("git");
		cmd.current_dir(&self.root);
		if let Some(author) = &self.author {
			cmd.arg("-c").arg(format!("user.name={}", author.name));
			cmd.arg("-c").arg(format!("user.email={}", author.email));
		}
		cmd.args(args);
		cmd.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());
		cmd
	}

	/// Run and require success; stdout on success, structured error on
	/// failure.
	async fn run(&self, args: &[&str]) -> Result<String, RepoError> {
		let out = self.command(args).output().await?;
		let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
		if out.status.success() {
			Ok(stdout)
		} else {
			Err(RepoError::Command {
				command: args.join(" "),
				stdout,
				stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
			})
		}
	}

	/// Run without requiring success; `(succeeded, combined output)`.
	async fn probe(&self, args: &[&str]) -> Result<(bool, String), RepoError> {
		let out = self.command(args).output().await?;
		let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
		combined.push_str(&String::from_utf8_lossy(&out.stderr));
		Ok((out.status.success(), combined))
	}

	async fn probe_with_stdin(
		&self,
		args: &[&str],
		input: &str,
	) -> Result<(bool, String), RepoError> {
		let mut cmd = self.command(args);
		cmd.stdin(Stdio::piped());
		let mut child = cmd.spawn()?;

		if let Some(mut stdin) = child.stdin.take() {
			stdin.write_all(input.as_bytes()).await?;
			drop(stdin);
		}

		let out = child.wait_with_output().await?;
		let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
		combined.push_str(&String::from_utf8_lossy(&out.stderr));
		Ok((out.status.success(), combined))
	}
}

/// The unified-diff body of a message-style patch, from the first file
/// header onward.
fn diff_body(patch_text: &str) -> Option<&str> {
	if let Some(idx) = patch_text.find("\ndiff --git ") {
		return Some(&patch_text[idx + 1..]);
	}
	// Some tools omit the git header; fall back to the message/diff
	// boundary marker.
	let boundary = patch_text.find("\n---\n")?;
	let rest = &patch_text[boundary + 5..];
	rest.find("\n--- ").map(|idx| &rest[idx + 1..])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn diff_body_finds_git_header() {
		let patch = "From abc Mon Sep 17 00:00:00 2001\nSubject: [PATCH] x\n\n---\n f | 1 +\n\ndiff --git a/f b/f\nindex 000..111 100644\n--- a/f\n+++ b/f\n";
		let body = diff_body(patch).unwrap();
		assert!(body.starts_with("diff --git a/f b/f"));
	}

	#[test]
	fn diff_body_absent_on_plain_text() {
		assert!(diff_body("no patch here at all").is_none());
	}

	#[test]
	fn author_identity_for_peer() {
		let author = Author::for_peer("alice");
		assert_eq!(author.name, "alice");
		assert_eq!(author.email, "alice@axle.local");
	}
}
