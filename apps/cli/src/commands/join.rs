use anyhow::{bail, Context, Result};
use clap::Args;

use axle_core::repo::{Author, GitRepo};
use axle_core::{Broker, LocalConfig, CONFIG_FILE_NAME};

use super::auth;
use crate::ui;

#[derive(Args, Debug)]
pub struct JoinArgs {
	/// Team ID
	#[arg(long = "team", required = true)]
	pub team: String,

	/// Username for this Axle instance
	#[arg(long = "username", required = true)]
	pub username: String,

	/// Broker host
	#[arg(long, default_value = "localhost")]
	pub host: String,

	/// Broker port
	#[arg(long, default_value_t = 6379)]
	pub port: u16,
}

pub async fn run(args: JoinArgs) -> Result<()> {
	let password = inquire::Password::new("Enter the team password:")
		.without_confirmation()
		.prompt()
		.context("password prompt aborted")?;

	println!("{}", ui::title("Joining Axle team"));

	let root = std::env::current_dir().context("cannot determine current directory")?;
	let cfg = LocalConfig::new(&args.team, &args.username, &root, &args.host, args.port);

	let broker = Broker::connect(&cfg.broker_url(), &cfg.team)
		.await
		.context("failed to connect to the broker")?;

	let Some(team_config) = broker.get_team_config().await? else {
		bail!(
			"no team named {:?} exists on this broker; check the team ID or run `axle init`",
			cfg.team
		);
	};

	if !auth::verify_password(&password, &team_config.password_hash)? {
		bail!("invalid password");
	}
	println!("{}", ui::success("password verified"));

	let repo = GitRepo::new(&root).with_author(Author::for_peer(&cfg.username));
	repo.init().await.context("failed to set up the repository")?;
	repo.exclude_from_vcs(CONFIG_FILE_NAME)
		.await
		.context("failed to exclude the config file from version control")?;
	println!("{}", ui::success("repository ready"));

	cfg.save(&root).context("failed to write local config")?;
	println!("{}", ui::success("local configuration written"));

	println!();
	println!("{}", ui::success("Joined the team!"));
	println!("{}", ui::info("Run `axle start` to begin synchronizing."));

	Ok(())
}
