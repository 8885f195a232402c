//! Conflict strategies for inbound patches.
//!
//! The strategy is selected once per peer at start and applied to every
//! inbound patch. Only `theirs` ever discards local state, and even then
//! the discarded work is recoverable from the stash.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::patch;
use crate::repo::{GitRepo, RepoError};

/// How the consumer reconciles an inbound patch with local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
	/// Stash local work, reset, accept the incoming patch.
	Theirs,
	/// Keep local state; silently discard the incoming patch.
	Mine,
	/// Three-way apply, leaving conflict markers on collision.
	#[default]
	Merge,
	/// Copy affected files to `<path>.backup` before applying.
	Backup,
	/// Like merge, then open conflicted paths in an external editor.
	Interactive,
}

impl ConflictStrategy {
	pub const ALL: [ConflictStrategy; 5] = [
		Self::Theirs,
		Self::Mine,
		Self::Merge,
		Self::Backup,
		Self::Interactive,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Theirs => "theirs",
			Self::Mine => "mine",
			Self::Merge => "merge",
			Self::Backup => "backup",
			Self::Interactive => "interactive",
		}
	}
}

impl fmt::Display for ConflictStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ConflictStrategy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"theirs" => Ok(Self::Theirs),
			"mine" => Ok(Self::Mine),
			"merge" => Ok(Self::Merge),
			"backup" => Ok(Self::Backup),
			"interactive" => Ok(Self::Interactive),
			other => Err(format!(
				"unknown conflict strategy {other:?} (expected one of: theirs, mine, merge, backup, interactive)"
			)),
		}
	}
}

/// What a strategy did with one patch.
#[derive(Debug, Default)]
pub struct StrategyOutcome {
	/// The working tree changed (fully or partially).
	pub applied: bool,
	/// The apply produced its own commit; the consumer must not synthesise
	/// another.
	pub auto_committed: bool,
	/// Paths left with conflict markers or rejected hunks.
	pub conflicts: Vec<String>,
}

/// Apply one validated patch under the given strategy.
pub async fn apply_with_strategy(
	repo: &GitRepo,
	patch_text: &str,
	strategy: ConflictStrategy,
) -> Result<StrategyOutcome, RepoError> {
	match strategy {
		ConflictStrategy::Theirs => apply_theirs(repo, patch_text).await,
		ConflictStrategy::Mine => {
			info!("'mine' strategy: keeping local state, discarding inbound patch");
			Ok(StrategyOutcome::default())
		}
		ConflictStrategy::Merge => apply_merge(repo, patch_text).await,
		ConflictStrategy::Backup => apply_backup(repo, patch_text).await,
		ConflictStrategy::Interactive => {
			let outcome = apply_merge(repo, patch_text).await?;
			if !outcome.conflicts.is_empty() {
				info!(
					"opening {} conflicted file(s) in your editor; resolve the \
					 <<<<<<< / ======= / >>>>>>> markers, then stage and commit",
					outcome.conflicts.len()
				);
				open_in_editor(repo.root(), &outcome.conflicts);
			}
			Ok(outcome)
		}
	}
}

async fn apply_theirs(repo: &GitRepo, patch_text: &str) -> Result<StrategyOutcome, RepoError> {
	repo.stash_push("axle: saving local changes before accepting incoming patch")
		.await?;
	repo.reset_hard().await?;

	let auto_committed = repo.apply_patch(patch_text).await?;
	info!("'theirs' strategy applied the patch; local changes were stashed");
	Ok(StrategyOutcome {
		applied: true,
		auto_committed,
		conflicts: Vec::new(),
	})
}

async fn apply_merge(repo: &GitRepo, patch_text: &str) -> Result<StrategyOutcome, RepoError> {
	match repo.apply_patch(patch_text).await {
		Ok(auto_committed) => Ok(StrategyOutcome {
			applied: true,
			auto_committed,
			conflicts: Vec::new(),
		}),
		Err(err) => {
			let conflicts = repo.conflicted_files().await;
			if !conflicts.is_empty() {
				// Expected collision: markers are in the files, the user
				// resolves by hand. Stage so the state is visible.
				repo.add_all().await?;
				warn!("merge conflicts, markers left in: {conflicts:?}");
				return Ok(StrategyOutcome {
					applied: true,
					auto_committed: false,
					conflicts,
				});
			}

			let rejected = rejected_files(repo.root());
			if !rejected.is_empty() {
				warn!("partial apply, rejected hunks saved in: {rejected:?}");
				return Ok(StrategyOutcome {
					applied: true,
					auto_committed: false,
					conflicts: rejected,
				});
			}

			Err(err)
		}
	}
}

async fn apply_backup(repo: &GitRepo, patch_text: &str) -> Result<StrategyOutcome, RepoError> {
	let mut backups = Vec::new();
	for file in patch::affected_paths(patch_text) {
		let original = repo.root().join(&file);
		if original.is_file() {
			let backup = repo.root().join(format!("{file}.backup"));
			match tokio::fs::copy(&original, &backup).await {
				Ok(_) => backups.push(backup),
				Err(e) => warn!("could not back up {file}: {e}"),
			}
		}
	}
	if !backups.is_empty() {
		info!("created {} backup file(s)", backups.len());
	}

	match repo.apply_patch(patch_text).await {
		Ok(auto_committed) => Ok(StrategyOutcome {
			applied: true,
			auto_committed,
			conflicts: Vec::new(),
		}),
		Err(e) => {
			if !backups.is_empty() {
				warn!("patch failed; your originals are saved next to it as .backup");
			}
			Err(e)
		}
	}
}

/// `.rej` files left behind by a reject-mode apply, relative to the root.
fn rejected_files(root: &Path) -> Vec<String> {
	WalkDir::new(root)
		.into_iter()
		.filter_map(|e| e.ok())
		.filter(|e| {
			e.file_type().is_file()
				&& e.path().extension().map(|x| x == "rej").unwrap_or(false)
		})
		.filter_map(|e| {
			e.path()
				.strip_prefix(root)
				.ok()
				.map(|p| p.to_string_lossy().replace('\\', "/"))
		})
		.collect()
}

/// Best-effort launch of an external editor on the conflicted paths.
fn open_in_editor(root: &Path, files: &[String]) {
	let absolute: Vec<_> = files.iter().map(|f| root.join(f)).collect();

	// VS Code first, then whatever the environment names.
	if std::process::Command::new("code")
		.args(&absolute)
		.spawn()
		.is_ok()
	{
		debug!("opened {} file(s) in VS Code", files.len());
		return;
	}

	for var in ["VISUAL", "EDITOR"] {
		if let Ok(editor) = std::env::var(var) {
			if !editor.is_empty()
				&& std::process::Command::new(&editor)
					.args(&absolute)
					.spawn()
					.is_ok()
			{
				debug!("opened {} file(s) in {editor}", files.len());
				return;
			}
		}
	}

	debug!("no editor discoverable; conflicted paths listed in the log only");
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strategy_parses_and_round_trips() {
		for s in ConflictStrategy::ALL {
			assert_eq!(s.as_str().parse::<ConflictStrategy>().unwrap(), s);
		}
		assert_eq!(
			"MERGE".parse::<ConflictStrategy>().unwrap(),
			ConflictStrategy::Merge
		);
		assert!("ours".parse::<ConflictStrategy>().is_err());
	}

	#[test]
	fn default_strategy_is_merge() {
		assert_eq!(ConflictStrategy::default(), ConflictStrategy::Merge);
	}
}
