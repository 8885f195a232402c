use anyhow::{Context, Result};
use clap::Args;

use axle_core::repo::{Author, GitRepo};
use axle_core::{Broker, LocalConfig, TeamConfig, CONFIG_FILE_NAME};

use super::auth;
use crate::ui;

#[derive(Args, Debug)]
pub struct InitArgs {
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

	/// Team password (prompted when omitted)
	#[arg(long)]
	pub password: Option<String>,
}

pub async fn run(args: InitArgs) -> Result<()> {
	let password = match args.password {
		Some(password) => password,
		None => inquire::Password::new("Enter a new team password:")
			.without_confirmation()
			.prompt()
			.context("password prompt aborted")?,
	};

	println!("{}", ui::title("Initializing Axle repository"));

	let root = std::env::current_dir().context("cannot determine current directory")?;
	let cfg = LocalConfig::new(&args.team, &args.username, &root, &args.host, args.port);

	let repo = GitRepo::new(&root).with_author(Author::for_peer(&cfg.username));
	repo.init().await.context("failed to set up the repository")?;
	repo.exclude_from_vcs(CONFIG_FILE_NAME)
		.await
		.context("failed to exclude the config file from version control")?;
	println!("{}", ui::success("repository ready"));

	cfg.save(&root).context("failed to write local config")?;
	println!("{}", ui::success("local configuration written"));

	let password_hash = auth::hash_password(&password)?;

	let broker = Broker::connect(&cfg.broker_url(), &cfg.team)
		.await
		.context("failed to connect to the broker")?;
	broker
		.put_team_config(&TeamConfig {
			team_id: cfg.team.clone(),
			password_hash,
		})
		.await
		.context("failed to publish the team record")?;
	println!("{}", ui::success("team record published"));

	println!();
	println!("{}", ui::info("Next steps:"));
	println!("  axle join   - have teammates join from their own checkout");
	println!("  axle start  - start file synchronization");
	println!("  axle team   - check who is online");

	Ok(())
}
