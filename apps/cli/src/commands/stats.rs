use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};

use axle_core::repo::{Author, GitRepo};
use axle_core::{presence, stats, Broker};

use crate::ui;

pub async fn run() -> Result<()> {
	let (_cwd, cfg) = super::load_config()?;

	let broker = Broker::connect(&cfg.broker_url(), &cfg.team)
		.await
		.context("failed to connect to the broker")?;
	let roster = presence::roster(&broker).await.unwrap_or_default();

	let repo = GitRepo::new(&cfg.root_dir).with_author(Author::for_peer(&cfg.username));
	let s = stats::gather(&repo, &cfg, &roster).await;

	println!("{}", ui::title("Axle Sync Statistics"));
	println!("Team: {} | User: {}", cfg.team, cfg.username);
	println!();

	let mut table = Table::new();
	table.load_preset(UTF8_FULL);

	let mut row = |label: &str, value: String| {
		table.add_row([label.to_string(), value]);
	};

	row("Total commits", s.total_commits.to_string());
	if let Some((ts, subject)) = &s.last_commit {
		row("Last commit", ui::format_ago(*ts));
		row("Last message", ui::truncate(subject, 50));
	}
	row("Pending changes", s.pending_changes.to_string());
	row("Commits (last hour)", s.commits_last_hour.to_string());
	if let Some((file, count)) = &s.most_active {
		row("Most active file", format!("{file} ({count} changes)"));
	}
	row("Total files", s.total_files.to_string());
	row("Tracked", s.tracked_files.to_string());
	row("Ignored", s.ignored_files.to_string());
	if let Some((file, size)) = &s.largest_file {
		row("Largest file", format!("{file} ({})", ui::format_size(*size)));
	}
	row("Team members", s.team_members.to_string());
	row("Currently online", s.online_members.to_string());
	println!("{table}");
	println!();

	if s.pending_changes > 0 {
		println!(
			"{}",
			ui::warn(&format!("You have {} uncommitted changes", s.pending_changes))
		);
	} else {
		println!("{}", ui::success("Working directory is clean"));
	}

	match s.online_members {
		0 => println!("{}", ui::warn("No team members are currently online")),
		1 => println!("{}", ui::info("You are the only one online")),
		n => println!("{}", ui::success(&format!("{n} team members are online"))),
	}

	Ok(())
}
