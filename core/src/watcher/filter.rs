//! Event-time filtering: ignore set, editor droppings, size and binary caps.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fmt;
use std::path::{Path, PathBuf};

use super::WatchError;

/// Default cap on the size of a file eligible for sync.
pub const DEFAULT_SIZE_CAP: u64 = 10 * 1024 * 1024;

/// Extensions never worth diffing; dropped at event time.
const BINARY_EXTENSIONS: &[&str] = &[
	"exe", "dll", "so", "dylib", "bin", "o", "a", "class", "pyc", "zip", "tar", "gz", "bz2",
	"xz", "zst", "7z", "rar", "jar", "jpg", "jpeg", "png", "gif", "bmp", "ico", "webp", "tiff",
	"heic", "mp3", "wav", "flac", "ogg", "mp4", "avi", "mkv", "mov", "webm", "pdf", "doc",
	"docx", "xls", "xlsx", "ppt", "pptx", "iso", "img", "dmg", "db", "sqlite", "sqlite3",
];

/// Editor swap/backup suffixes that never represent real content.
const SWAP_SUFFIXES: &[&str] = &[".swp", ".swx", ".swo", "~", ".tmp", ".bak", ".orig", ".part"];

/// Why an event was dropped before reaching the batcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
	Ignored,
	SwapFile,
	Oversize(u64),
	BinaryExtension(String),
}

impl fmt::Display for SkipReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Ignored => f.write_str("matches ignore set"),
			Self::SwapFile => f.write_str("editor swap/backup file"),
			Self::Oversize(size) => write!(f, "size {size} bytes reaches the sync cap"),
			Self::BinaryExtension(ext) => write!(f, "known-binary extension .{ext}"),
		}
	}
}

/// Compiled filter for one working tree.
pub struct EventFilter {
	root: PathBuf,
	/// Plain patterns, matched by containment against the whole path.
	literals: Vec<String>,
	/// Patterns with glob metacharacters, matched against the relative path.
	globs: GlobSet,
	size_cap: u64,
}

impl EventFilter {
	pub fn new(
		root: impl Into<PathBuf>,
		patterns: &[String],
		size_cap: u64,
	) -> Result<Self, WatchError> {
		let mut literals = Vec::new();
		let mut builder = GlobSetBuilder::new();
		for pattern in patterns {
			if pattern.contains(['*', '?', '[']) {
				let glob = Glob::new(pattern).map_err(|source| WatchError::Pattern {
					pattern: pattern.clone(),
					source,
				})?;
				builder.add(glob);
			} else {
				literals.push(pattern.clone());
			}
		}

		Ok(Self {
			root: root.into(),
			literals,
			globs: builder.build().map_err(|source| WatchError::Pattern {
				pattern: "<ignore set>".into(),
				source,
			})?,
			size_cap,
		})
	}

	pub fn size_cap(&self) -> u64 {
		self.size_cap
	}

	/// Whether the path falls inside the ignore set.
	pub fn is_ignored(&self, path: &Path) -> bool {
		let text = path.to_string_lossy();
		if self.literals.iter().any(|p| text.contains(p.as_str())) {
			return true;
		}
		let rel = path.strip_prefix(&self.root).unwrap_or(path);
		self.globs.is_match(rel)
	}

	/// Whether the base name is an editor swap or backup artifact.
	pub fn is_swap_file(&self, path: &Path) -> bool {
		let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
			return false;
		};
		if name.starts_with(".#") || (name.starts_with('#') && name.ends_with('#')) {
			return true;
		}
		SWAP_SUFFIXES.iter().any(|s| name.ends_with(s))
	}

	/// Size/binary screen for create and modify events. `None` means the
	/// file is eligible for sync.
	pub fn check_content(&self, path: &Path) -> Result<Option<SkipReason>, std::io::Error> {
		if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
			let lower = ext.to_ascii_lowercase();
			if BINARY_EXTENSIONS.contains(&lower.as_str()) {
				return Ok(Some(SkipReason::BinaryExtension(lower)));
			}
		}

		let meta = std::fs::metadata(path)?;
		if meta.len() >= self.size_cap {
			return Ok(Some(SkipReason::Oversize(meta.len())));
		}

		Ok(None)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	fn filter(root: &Path, patterns: &[&str], cap: u64) -> EventFilter {
		let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
		EventFilter::new(root, &patterns, cap).unwrap()
	}

	#[test]
	fn literal_patterns_match_by_containment() {
		let dir = TempDir::new().unwrap();
		let f = filter(dir.path(), &[".git", "axle_config.json"], DEFAULT_SIZE_CAP);

		assert!(f.is_ignored(&dir.path().join(".git/objects/ab/cd")));
		assert!(f.is_ignored(&dir.path().join("axle_config.json")));
		assert!(!f.is_ignored(&dir.path().join("src/main.rs")));
	}

	#[test]
	fn glob_patterns_match_relative_paths() {
		let dir = TempDir::new().unwrap();
		let f = filter(dir.path(), &["target/**", "*.log"], DEFAULT_SIZE_CAP);

		assert!(f.is_ignored(&dir.path().join("target/debug/axle")));
		assert!(f.is_ignored(&dir.path().join("build.log")));
		assert!(!f.is_ignored(&dir.path().join("src/lib.rs")));
	}

	#[test]
	fn swap_files_are_recognized() {
		let dir = TempDir::new().unwrap();
		let f = filter(dir.path(), &[], DEFAULT_SIZE_CAP);

		for name in [".main.rs.swp", "notes.txt~", "x.tmp", "#scratch#", ".#lock"] {
			assert!(f.is_swap_file(Path::new(name)), "{name} should be a swap file");
		}
		assert!(!f.is_swap_file(Path::new("main.rs")));
	}

	#[test]
	fn size_cap_boundary_is_inclusive() {
		let dir = TempDir::new().unwrap();
		let f = filter(dir.path(), &[], 4);

		let at_cap = dir.path().join("at_cap.txt");
		fs::write(&at_cap, b"abcd").unwrap();
		assert!(matches!(
			f.check_content(&at_cap).unwrap(),
			Some(SkipReason::Oversize(4))
		));

		let below = dir.path().join("below.txt");
		fs::write(&below, b"abc").unwrap();
		assert_eq!(f.check_content(&below).unwrap(), None);
	}

	#[test]
	fn binary_extensions_are_dropped_without_stat() {
		let dir = TempDir::new().unwrap();
		let f = filter(dir.path(), &[], DEFAULT_SIZE_CAP);

		// The file does not even exist: the extension screen comes first.
		let skip = f.check_content(&dir.path().join("blob.PNG")).unwrap();
		assert!(matches!(skip, Some(SkipReason::BinaryExtension(ref e)) if e == "png"));
	}
}
