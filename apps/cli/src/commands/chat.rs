use anyhow::{Context, Result};

use axle_core::{chat, Broker};

use crate::ui;

pub async fn run(text: &str, priority: bool) -> Result<()> {
	let (_cwd, cfg) = super::load_config()?;

	let broker = Broker::connect(&cfg.broker_url(), &cfg.team)
		.await
		.context("failed to connect to the broker")?;

	chat::send(&broker, &cfg.username, text, priority)
		.await
		.context("failed to send message")?;

	println!("{}", ui::success("Message sent"));
	Ok(())
}
