use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Table};

use axle_core::message::PresenceStatus;
use axle_core::{presence, Broker};

use crate::ui;

pub async fn run() -> Result<()> {
	let (_cwd, cfg) = super::load_config()?;

	let broker = Broker::connect(&cfg.broker_url(), &cfg.team)
		.await
		.context("failed to connect to the broker")?;

	let roster = presence::roster(&broker)
		.await
		.context("failed to read the team roster")?;

	println!("{}", ui::title(&format!("Team: {}", cfg.team)));

	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_header(["Member", "Status", "Last seen", "IP", "Node ID"]);

	for entry in &roster {
		let status = match entry.status {
			PresenceStatus::Online => "online".green().to_string(),
			PresenceStatus::Offline => "offline".dimmed().to_string(),
		};
		table.add_row([
			Cell::new(&entry.username),
			Cell::new(status),
			Cell::new(ui::format_ago(entry.last_seen)),
			Cell::new(&entry.ip_address),
			Cell::new(&entry.node_id),
		]);
	}
	println!("{table}");

	let online = roster
		.iter()
		.filter(|e| e.status == PresenceStatus::Online)
		.count();
	println!(
		"{}",
		ui::info(&format!(
			"Total: {} members, {} online, {} offline",
			roster.len(),
			online,
			roster.len() - online
		))
	);

	Ok(())
}
