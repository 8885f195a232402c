//! The long-running peer process behind `axle start`.
//!
//! Wires the components together, spawns the four workers (watcher,
//! heartbeat, subscriber, batch loop), and runs the ordered shutdown when a
//! termination signal arrives. Every worker hangs off one cancellation
//! token; nothing here blocks without also listening on it.

use anyhow::Context;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{self, Broker};
use crate::chat;
use crate::config::LocalConfig;
use crate::message::{ChatMessage, SyncMessage};
use crate::presence::PresenceService;
use crate::repo::{Author, GitRepo};
use crate::sync::{ConflictStrategy, PatchConsumer, PatchProducer};
use crate::watcher::{TreeWatcher, WatcherConfig};

/// Grace period between cancellation and forced teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// One peer's replication session.
pub struct SyncSession {
	config: LocalConfig,
	strategy: ConflictStrategy,
}

impl SyncSession {
	pub fn new(config: LocalConfig, strategy: ConflictStrategy) -> Self {
		Self { config, strategy }
	}

	/// Run until a termination signal, then shut down cleanly: stop the
	/// watcher, flush the final batch, say goodbye, remove our roster
	/// entry, close the broker.
	pub async fn run(self) -> anyhow::Result<()> {
		let cfg = self.config;

		info!(
			"starting axle: team={} user={} dir={} strategy={}",
			cfg.team,
			cfg.username,
			cfg.root_dir.display(),
			self.strategy
		);

		let repo = GitRepo::new(&cfg.root_dir).with_author(Author::for_peer(&cfg.username));
		repo.init().await.context("repository init failed")?;

		let broker = Broker::connect(&cfg.broker_url(), &cfg.team)
			.await
			.context("broker unreachable; check your config and that the broker is up")?;

		// Subscribe before any worker starts: a broker that accepts
		// connections but refuses subscriptions is a configuration error,
		// not a transient one.
		let pubsub = broker
			.subscribe()
			.await
			.context("initial subscribe failed")?;

		let (watcher, mut batch_rx) =
			TreeWatcher::new(&cfg.root_dir, &cfg.effective_ignores(), WatcherConfig::default())?;

		let producer = Arc::new(PatchProducer::new(repo.clone(), cfg.username.clone()));
		let consumer = PatchConsumer::new(
			repo.clone(),
			cfg.username.clone(),
			self.strategy,
			watcher.mute(),
		);
		let presence = Arc::new(PresenceService::new(
			broker.clone(),
			cfg.node_id.clone(),
			cfg.username.clone(),
		));

		let cancel = CancellationToken::new();

		// Worker 1: presence heartbeat (announces on entry, goodbye on exit).
		let presence_task = tokio::spawn({
			let presence = presence.clone();
			let cancel = cancel.child_token();
			async move { presence.run(cancel).await }
		});

		// Worker 2: filesystem watcher.
		let watcher_task = tokio::spawn({
			let watcher = watcher.clone();
			let cancel = cancel.child_token();
			async move {
				if let Err(e) = watcher.run(cancel).await {
					warn!("watcher stopped with error: {e}");
				}
			}
		});

		// Worker 3: batch loop: drain pending files into one sync message
		// whenever the batch timer fires.
		let batch_task = tokio::spawn({
			let watcher = watcher.clone();
			let producer = producer.clone();
			let broker = broker.clone();
			let channel = broker::sync_channel(&cfg.team);
			let cancel = cancel.child_token();
			async move {
				loop {
					tokio::select! {
						_ = cancel.cancelled() => break,
						signal = batch_rx.recv() => {
							if signal.is_none() {
								break;
							}
							let pending = watcher.take_pending();
							if let Some(msg) = producer.drain(pending).await {
								if let Err(e) = broker.publish(&channel, &msg).await {
									warn!("sync message abandoned: {e}");
								}
							}
						}
					}
				}
			}
		});

		// Worker 4: broker subscriber, dispatching by channel.
		let subscriber_task = tokio::spawn({
			let presence = presence.clone();
			let sync_ch = broker::sync_channel(&cfg.team);
			let chat_ch = broker::chat_channel(&cfg.team);
			let presence_ch = broker::presence_channel(&cfg.team);
			let cancel = cancel.child_token();
			async move {
				let mut pubsub = pubsub;
				let mut stream = pubsub.on_message();
				loop {
					tokio::select! {
						_ = cancel.cancelled() => break,
						msg = stream.next() => {
							let Some(msg) = msg else {
								warn!("broker subscription closed");
								break;
							};
							let channel = msg.get_channel_name().to_string();
							let payload: String = match msg.get_payload() {
								Ok(p) => p,
								Err(e) => {
									warn!("undecodable message on {channel}: {e}");
									continue;
								}
							};

							if channel == sync_ch {
								match serde_json::from_str::<SyncMessage>(&payload) {
									Ok(sync) => {
										let report = consumer.handle(&sync).await;
										debug!("apply report: {report:?}");
									}
									Err(e) => warn!("malformed sync message: {e}"),
								}
							} else if channel == chat_ch {
								match serde_json::from_str::<ChatMessage>(&payload) {
									Ok(chat_msg) => info!("{}", chat::render(&chat_msg)),
									Err(e) => warn!("malformed chat message: {e}"),
								}
							} else if channel == presence_ch {
								presence.handle_message(&payload).await;
							}
						}
					}
				}
				debug!("subscriber stopped");
			}
		});

		info!("all workers started; watching for changes and team activity");

		wait_for_shutdown_signal().await;
		info!("shutdown signal received, shutting down gracefully");

		cancel.cancel();

		let drain_all = async {
			let _ = watcher_task.await;
			let _ = batch_task.await;
			let _ = presence_task.await;
			let _ = subscriber_task.await;
		};
		if tokio::time::timeout(SHUTDOWN_GRACE, drain_all).await.is_err() {
			warn!("workers did not stop within {SHUTDOWN_GRACE:?}, forcing teardown");
		}

		// Flush whatever the timer had not fired for.
		let pending = watcher.take_pending();
		if !pending.is_empty() {
			info!("flushing final batch of {} change(s)", pending.len());
			if let Some(msg) = producer.drain(pending).await {
				let channel = broker::sync_channel(&cfg.team);
				if let Err(e) = broker.publish(&channel, &msg).await {
					warn!("final sync message abandoned: {e}");
				}
			}
		}

		presence.cleanup().await;

		info!("shutdown complete");
		Ok(())
	}
}

/// Resolve on SIGINT, or SIGTERM where that exists.
async fn wait_for_shutdown_signal() {
	#[cfg(unix)]
	{
		let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
		{
			Ok(term) => term,
			Err(e) => {
				warn!("cannot install SIGTERM handler: {e}");
				let _ = tokio::signal::ctrl_c().await;
				return;
			}
		};
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {}
			_ = term.recv() => {}
		}
	}

	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}
