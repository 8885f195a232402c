//! Local peer configuration.
//!
//! Each working tree carries one JSON config file at its root. The file is
//! excluded from version control at init time so it never syncs to peers.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Name of the local config file at the working-tree root.
pub const CONFIG_FILE_NAME: &str = "axle_config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("no config found at {path}; run `axle init` or `axle join` first")]
	Missing { path: PathBuf },

	#[error("failed to read config at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("malformed config at {path}: {source}")]
	Malformed {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
}

/// The per-peer config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
	/// Team name keying the broker namespace.
	pub team: String,
	/// Display name. Also the `peer_id` on outbound sync messages.
	pub username: String,
	/// Persistent 64-bit random node identifier, `node_` + 16 hex digits.
	/// Filled on first load and never reassigned afterwards.
	#[serde(default)]
	pub node_id: String,
	/// Absolute path of the working tree.
	pub root_dir: PathBuf,
	pub broker_host: String,
	pub broker_port: u16,
	/// Paths matching any of these patterns are never watched or synced.
	#[serde(default = "default_ignore_patterns")]
	pub ignore_patterns: Vec<String>,
}

fn default_ignore_patterns() -> Vec<String> {
	vec![".git".to_string(), CONFIG_FILE_NAME.to_string()]
}

impl LocalConfig {
	pub fn new(
		team: impl Into<String>,
		username: impl Into<String>,
		root_dir: impl Into<PathBuf>,
		broker_host: impl Into<String>,
		broker_port: u16,
	) -> Self {
		Self {
			team: team.into(),
			username: username.into(),
			node_id: generate_node_id(),
			root_dir: root_dir.into(),
			broker_host: broker_host.into(),
			broker_port,
			ignore_patterns: default_ignore_patterns(),
		}
	}

	/// Path of the config file inside `dir`.
	pub fn path_in(dir: &Path) -> PathBuf {
		dir.join(CONFIG_FILE_NAME)
	}

	/// Load the config from `dir`, assigning and persisting a node ID if the
	/// file predates node identity.
	pub fn load(dir: &Path) -> Result<Self, ConfigError> {
		let path = Self::path_in(dir);
		let data = fs::read_to_string(&path).map_err(|source| {
			if source.kind() == std::io::ErrorKind::NotFound {
				ConfigError::Missing { path: path.clone() }
			} else {
				ConfigError::Io {
					path: path.clone(),
					source,
				}
			}
		})?;

		let mut cfg: LocalConfig =
			serde_json::from_str(&data).map_err(|source| ConfigError::Malformed {
				path: path.clone(),
				source,
			})?;

		if cfg.node_id.is_empty() {
			cfg.node_id = generate_node_id();
			info!("assigned node id {}", cfg.node_id);
			cfg.save(dir)?;
		}

		Ok(cfg)
	}

	/// Write the config to `dir` as pretty-printed JSON.
	pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
		let path = Self::path_in(dir);
		let data =
			serde_json::to_string_pretty(self).map_err(|source| ConfigError::Malformed {
				path: path.clone(),
				source,
			})?;
		fs::write(&path, data).map_err(|source| ConfigError::Io {
			path: path.clone(),
			source,
		})
	}

	/// Broker URL for the redis client.
	pub fn broker_url(&self) -> String {
		format!("redis://{}:{}", self.broker_host, self.broker_port)
	}

	/// The ignore set as the watcher must see it: whatever the user
	/// configured, plus the repository metadata directory and this config
	/// file, which are never allowed to sync.
	pub fn effective_ignores(&self) -> Vec<String> {
		let mut patterns = self.ignore_patterns.clone();
		for required in [".git", CONFIG_FILE_NAME] {
			if !patterns.iter().any(|p| p == required) {
				patterns.push(required.to_string());
			}
		}
		patterns
	}
}

/// Team bootstrap record stored on the broker at `axle:config:<team>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
	pub team_id: String,
	/// PHC-string password hash. Verified by `join`, never sent back out.
	pub password_hash: String,
}

/// A fresh `node_` + 16 lowercase hex digits identifier.
pub fn generate_node_id() -> String {
	let id: u64 = rand::thread_rng().gen();
	format!("node_{id:016x}")
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn sample(dir: &Path) -> LocalConfig {
		LocalConfig::new("rust-team", "alice", dir, "localhost", 6379)
	}

	#[test]
	fn round_trip() {
		let dir = TempDir::new().unwrap();
		let cfg = sample(dir.path());
		cfg.save(dir.path()).unwrap();

		let loaded = LocalConfig::load(dir.path()).unwrap();
		assert_eq!(loaded.team, "rust-team");
		assert_eq!(loaded.username, "alice");
		assert_eq!(loaded.node_id, cfg.node_id);
		assert_eq!(loaded.broker_url(), "redis://localhost:6379");
	}

	#[test]
	fn node_id_assigned_once() {
		let dir = TempDir::new().unwrap();
		let mut cfg = sample(dir.path());
		cfg.node_id = String::new();
		cfg.save(dir.path()).unwrap();

		let first = LocalConfig::load(dir.path()).unwrap();
		assert!(first.node_id.starts_with("node_"));
		assert_eq!(first.node_id.len(), "node_".len() + 16);

		// A second load must observe the persisted ID, not mint a new one.
		let second = LocalConfig::load(dir.path()).unwrap();
		assert_eq!(first.node_id, second.node_id);
	}

	#[test]
	fn missing_config_is_distinguished() {
		let dir = TempDir::new().unwrap();
		match LocalConfig::load(dir.path()) {
			Err(ConfigError::Missing { .. }) => {}
			other => panic!("expected Missing, got {other:?}"),
		}
	}

	#[test]
	fn default_ignores_cover_repo_metadata_and_config() {
		let dir = TempDir::new().unwrap();
		let cfg = sample(dir.path());
		assert!(cfg.ignore_patterns.iter().any(|p| p == ".git"));
		assert!(cfg.ignore_patterns.iter().any(|p| p == CONFIG_FILE_NAME));
	}

	#[test]
	fn effective_ignores_survive_a_hostile_config() {
		let dir = TempDir::new().unwrap();
		let mut cfg = sample(dir.path());
		cfg.ignore_patterns = vec!["node_modules".to_string()];

		let effective = cfg.effective_ignores();
		assert!(effective.iter().any(|p| p == ".git"));
		assert!(effective.iter().any(|p| p == CONFIG_FILE_NAME));
		assert!(effective.iter().any(|p| p == "node_modules"));
	}
}
