use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use axle_core::ConflictStrategy;

mod commands;
mod ui;

#[derive(Parser, Debug)]
#[command(name = "axle", about = "Real-time working-directory sync for small teams", version)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Initialize a new team repository in the current directory
	Init(commands::init::InitArgs),
	/// Join an existing team from the current directory
	Join(commands::join::JoinArgs),
	/// Start file synchronization and team collaboration
	Start {
		/// Conflict resolution strategy for inbound patches
		#[arg(long, value_enum, default_value = "merge")]
		conflict: ConflictArg,
	},
	/// Send a message to your team members
	Chat {
		/// Mark the message as priority
		#[arg(short, long)]
		priority: bool,
		/// The message text
		#[arg(required = true)]
		text: Vec<String>,
	},
	/// Display team member status and presence
	Team,
	/// Display synchronization statistics
	Stats,
	/// Display version information
	Version,
}

// Wrapper so the core strategy enum stays clap-free.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictArg {
	Theirs,
	Mine,
	Merge,
	Backup,
	Interactive,
}

impl From<ConflictArg> for ConflictStrategy {
	fn from(arg: ConflictArg) -> Self {
		match arg {
			ConflictArg::Theirs => ConflictStrategy::Theirs,
			ConflictArg::Mine => ConflictStrategy::Mine,
			ConflictArg::Merge => ConflictStrategy::Merge,
			ConflictArg::Backup => ConflictStrategy::Backup,
			ConflictArg::Interactive => ConflictStrategy::Interactive,
		}
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("axle_core=info,axle=info")),
		)
		.init();

	if let Err(e) = run().await {
		eprintln!("{}", ui::error(&format!("{e:#}")));
		std::process::exit(1);
	}
}

async fn run() -> Result<()> {
	let cli = Cli::parse();

	match cli.command {
		Commands::Init(args) => commands::init::run(args).await,
		Commands::Join(args) => commands::join::run(args).await,
		Commands::Start { conflict } => commands::start::run(conflict.into()).await,
		Commands::Chat { priority, text } => {
			commands::chat::run(&text.join(" "), priority).await
		}
		Commands::Team => commands::team::run().await,
		Commands::Stats => commands::stats::run().await,
		Commands::Version => {
			println!("Axle File Sync v{}", axle_core::VERSION);
			println!("Real-time file synchronization for development teams");
			Ok(())
		}
	}
}
