//! Textual validation of inbound patches.
//!
//! Validation never executes the patch: it scans file-header lines for paths
//! that must not be written and bounds the payload size. A rejected patch is
//! dropped whole; it is never partially applied.

use thiserror::Error;

/// Largest patch body accepted from the wire.
pub const MAX_PATCH_BYTES: usize = 10 * 1024 * 1024;

/// Prefixes that no patch may touch, even via a relative spelling.
const SENSITIVE_PREFIXES: &[&str] = &[
	"/etc/",
	"/usr/",
	"/bin/",
	"/sbin/",
	"/lib/",
	"/boot/",
	"/proc/",
	"/sys/",
	"/var/",
	"/root/",
	".ssh/",
	".aws/",
	".gnupg/",
	".kube/",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
	#[error("patch body is {0} bytes, over the {MAX_PATCH_BYTES} byte cap")]
	Oversize(usize),

	#[error("patch header references a parent-directory segment: {0}")]
	Traversal(String),

	#[error("patch header references an absolute path: {0}")]
	AbsolutePath(String),

	#[error("patch header references a sensitive path: {0}")]
	SensitivePath(String),
}

/// Whether the text is a message-style patch (`git format-patch` output)
/// as opposed to a bare diff.
pub fn is_message_style(patch: &str) -> bool {
	patch.starts_with("From ") && patch.contains("Subject:")
}

/// Validate a patch before it is allowed anywhere near the repository.
pub fn validate(patch: &str) -> Result<(), PatchError> {
	if patch.len() > MAX_PATCH_BYTES {
		return Err(PatchError::Oversize(patch.len()));
	}

	for path in header_paths(patch) {
		check_path(&path)?;
	}

	Ok(())
}

/// Working-tree paths referenced by the patch's file headers, with git's
/// `a/`/`b/` prefixes stripped and `/dev/null` omitted. Order of first
/// appearance, no duplicates.
pub fn affected_paths(patch: &str) -> Vec<String> {
	let mut paths = Vec::new();
	for path in header_paths(patch) {
		if path == "/dev/null" {
			continue;
		}
		let stripped = strip_git_prefix(&path).to_string();
		if !paths.contains(&stripped) {
			paths.push(stripped);
		}
	}
	paths
}

fn check_path(raw: &str) -> Result<(), PatchError> {
	// `/dev/null` is how git spells creation and deletion endpoints.
	if raw == "/dev/null" {
		return Ok(());
	}

	let path = strip_git_prefix(raw);

	if path.starts_with('/') || path.starts_with('\\') || has_drive_prefix(path) {
		return Err(PatchError::AbsolutePath(raw.to_string()));
	}

	if path.split(['/', '\\']).any(|seg| seg == "..") {
		return Err(PatchError::Traversal(raw.to_string()));
	}

	for prefix in SENSITIVE_PREFIXES {
		let rel = prefix.trim_start_matches('/');
		if raw.starts_with(prefix) || path.starts_with(rel) {
			return Err(PatchError::SensitivePath(raw.to_string()));
		}
	}

	Ok(())
}

/// Whether a wire-supplied relative path is expressible inside the working
/// tree. Used for deletion entries, which bypass patch headers entirely.
pub fn safe_relative(path: &str) -> bool {
	!path.is_empty()
		&& !path.starts_with('/')
		&& !path.starts_with('\\')
		&& !has_drive_prefix(path)
		&& !path.split(['/', '\\']).any(|seg| seg == "..")
}

fn has_drive_prefix(path: &str) -> bool {
	let bytes = path.as_bytes();
	bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

fn strip_git_prefix(path: &str) -> &str {
	path.strip_prefix("a/")
		.or_else(|| path.strip_prefix("b/"))
		.unwrap_or(path)
}

/// Iterate the path tokens of every file-header line in the patch.
fn header_paths(patch: &str) -> impl Iterator<Item = String> + '_ {
	patch.lines().flat_map(|line| {
		let mut out: Vec<String> = Vec::new();
		if let Some(rest) = line.strip_prefix("diff --git ") {
			out.extend(rest.split_whitespace().map(str::to_string));
		} else if let Some(rest) = line
			.strip_prefix("--- ")
			.or_else(|| line.strip_prefix("+++ "))
		{
			// Only the first token: the rest is an optional timestamp.
			if let Some(tok) = rest.split_whitespace().next() {
				out.push(tok.to_string());
			}
		}
		out.into_iter()
	})
}
