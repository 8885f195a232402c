pub mod chat;
pub mod init;
pub mod join;
pub mod start;
pub mod stats;
pub mod team;

mod auth;

use anyhow::{Context, Result};
use axle_core::LocalConfig;
use std::path::PathBuf;

/// Load the local config from the current directory; every command except
/// `init`, `join`, and `version` starts here.
pub fn load_config() -> Result<(PathBuf, LocalConfig)> {
	let cwd = std::env::current_dir().context("cannot determine current directory")?;
	let cfg = LocalConfig::load(&cwd)?;
	Ok((cwd, cfg))
}
