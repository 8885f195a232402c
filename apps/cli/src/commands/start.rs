use anyhow::Result;

use axle_core::{ConflictStrategy, SyncSession};

use crate::ui;

pub async fn run(strategy: ConflictStrategy) -> Result<()> {
	let (_cwd, cfg) = super::load_config()?;

	println!("{}", ui::title("Starting Axle"));
	println!(
		"Team: {} | User: {} | Directory: {}",
		cfg.team,
		cfg.username,
		cfg.root_dir.display()
	);
	println!("{}", ui::info("Press Ctrl+C to stop"));
	println!();

	SyncSession::new(cfg, strategy).run().await
}
