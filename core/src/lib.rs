//! Axle Core
//!
//! The peer replication engine: watches one working tree, turns batches of
//! filesystem events into git commits and format-patches, fans them out
//! over the team's broker, and re-integrates patches from other peers
//! without echo, duplicate commits, or tree corruption.

pub mod broker;
pub mod chat;
pub mod config;
pub mod message;
pub mod patch;
pub mod presence;
pub mod repo;
pub mod session;
pub mod stats;
pub mod sync;
pub mod watcher;

pub use broker::{Broker, BrokerError};
pub use config::{ConfigError, LocalConfig, TeamConfig, CONFIG_FILE_NAME};
pub use message::{
	ChatMessage, FileChange, FileEvent, PresenceEntry, PresenceKind, PresenceMessage,
	PresenceStatus, SyncMessage, PROTOCOL_VERSION,
};
pub use repo::{Author, GitRepo, RepoError};
pub use session::SyncSession;
pub use sync::{ConflictStrategy, PatchConsumer, PatchProducer};
pub use watcher::{TreeWatcher, WatcherConfig, WriteMute};

/// Crate version, surfaced by `axle version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
