//! Read-only statistics over the repository, the tree, and the roster.

use chrono::{Duration as ChronoDuration, Utc};
use walkdir::WalkDir;

use crate::config::LocalConfig;
use crate::message::{PresenceEntry, PresenceStatus};
use crate::repo::GitRepo;
use crate::watcher::{EventFilter, DEFAULT_SIZE_CAP};

/// Snapshot of a sync session's health.
#[derive(Debug, Default)]
pub struct SyncStats {
	pub total_commits: u64,
	/// Unix seconds and subject of the newest commit.
	pub last_commit: Option<(i64, String)>,
	pub commits_last_hour: u64,
	/// Most frequently committed path and its commit count.
	pub most_active: Option<(String, u64)>,
	pub pending_changes: usize,

	pub total_files: usize,
	pub tracked_files: usize,
	pub ignored_files: usize,
	pub largest_file: Option<(String, u64)>,

	pub team_members: usize,
	pub online_members: usize,
}

/// Gather everything the `stats` command renders. Per-item failures
/// degrade to zeros rather than failing the whole read.
pub async fn gather(repo: &GitRepo, cfg: &LocalConfig, roster: &[PresenceEntry]) -> SyncStats {
	let mut stats = SyncStats {
		total_commits: repo.commit_count().await,
		last_commit: repo.last_commit().await,
		commits_last_hour: repo
			.commits_since(Utc::now() - ChronoDuration::hours(1))
			.await,
		pending_changes: repo.status_lines().await.map(|l| l.len()).unwrap_or(0),
		team_members: roster.len(),
		online_members: roster
			.iter()
			.filter(|p| p.status == PresenceStatus::Online)
			.count(),
		..SyncStats::default()
	};

	stats.most_active = repo
		.change_frequencies()
		.await
		.into_iter()
		.max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));

	sweep_files(cfg, &mut stats);
	stats
}

fn sweep_files(cfg: &LocalConfig, stats: &mut SyncStats) {
	let Ok(filter) = EventFilter::new(&cfg.root_dir, &cfg.effective_ignores(), DEFAULT_SIZE_CAP)
	else {
		return;
	};

	for entry in WalkDir::new(&cfg.root_dir).into_iter().filter_map(|e| e.ok()) {
		if !entry.file_type().is_file() {
			continue;
		}
		stats.total_files += 1;

		let path = entry.path();
		if filter.is_ignored(path) {
			stats.ignored_files += 1;
			continue;
		}
		stats.tracked_files += 1;

		let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
		if stats.largest_file.as_ref().map_or(true, |(_, s)| size > *s) {
			let rel = path
				.strip_prefix(&cfg.root_dir)
				.unwrap_or(path)
				.to_string_lossy()
				.replace('\\', "/");
			stats.largest_file = Some((rel, size));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn file_sweep_separates_tracked_from_ignored() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join(".git")).unwrap();
		fs::write(dir.path().join(".git/HEAD"), b"ref: x").unwrap();
		fs::write(dir.path().join("small.rs"), b"fn main() {}").unwrap();
		fs::write(dir.path().join("large.rs"), vec![b'x'; 64]).unwrap();

		let cfg = LocalConfig::new("t", "u", dir.path(), "localhost", 6379);
		let mut stats = SyncStats::default();
		sweep_files(&cfg, &mut stats);

		assert_eq!(stats.total_files, 3);
		assert_eq!(stats.ignored_files, 1);
		assert_eq!(stats.tracked_files, 2);
		let (name, size) = stats.largest_file.unwrap();
		assert_eq!(name, "large.rs");
		assert_eq!(size, 64);
	}
}
