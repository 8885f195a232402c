//! Presence protocol: announce / heartbeat / goodbye, and the team roster.
//!
//! Liveness is never stored: readers derive online/offline from last-seen
//! age at read time, and lazily prune entries that have timed out.

use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{presence_channel, Broker, BrokerError};
use crate::message::{PresenceEntry, PresenceKind, PresenceMessage, PresenceStatus};

/// Cadence of heartbeat publications while the peer is alive.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A peer is online iff its last-seen age is within this bound.
pub const PRESENCE_TIMEOUT_SECS: i64 = 60;

/// Status for a roster entry last seen at `last_seen`, observed at `now`.
pub fn derive_status(last_seen: i64, now: i64) -> PresenceStatus {
	if now - last_seen <= PRESENCE_TIMEOUT_SECS {
		PresenceStatus::Online
	} else {
		PresenceStatus::Offline
	}
}

/// Best-effort local IP discovery: route a UDP socket at a public address
/// and read back the chosen source address. No packet is sent.
pub fn local_ip() -> String {
	std::net::UdpSocket::bind("0.0.0.0:0")
		.and_then(|socket| {
			socket.connect("8.8.8.8:80")?;
			socket.local_addr()
		})
		.map(|addr| addr.ip().to_string())
		.unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Maintains this peer's presence and everyone's roster entries.
pub struct PresenceService {
	broker: Broker,
	node_id: String,
	username: String,
}

impl PresenceService {
	pub fn new(broker: Broker, node_id: impl Into<String>, username: impl Into<String>) -> Self {
		Self {
			broker,
			node_id: node_id.into(),
			username: username.into(),
		}
	}

	/// Announce, then heartbeat every 30 s until cancelled; a goodbye goes
	/// out on the way down.
	pub async fn run(&self, cancel: CancellationToken) {
		if let Err(e) = self.send(PresenceKind::Announce).await {
			warn!("failed to send announce: {e}");
		}

		let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		ticker.tick().await; // first tick completes immediately

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					if let Err(e) = self.send(PresenceKind::Heartbeat).await {
						warn!("failed to send heartbeat: {e}");
					}
				}
				_ = cancel.cancelled() => {
					if let Err(e) = self.send(PresenceKind::Goodbye).await {
						warn!("failed to send goodbye: {e}");
					}
					debug!("presence heartbeat stopped");
					return;
				}
			}
		}
	}

	async fn send(&self, kind: PresenceKind) -> Result<(), BrokerError> {
		let msg = PresenceMessage {
			kind,
			node_id: self.node_id.clone(),
			username: self.username.clone(),
			ip_address: local_ip(),
			timestamp: Utc::now().timestamp(),
		};
		let channel = presence_channel(self.broker.team());
		self.broker.publish(&channel, &msg).await
	}

	/// Fold an inbound presence message into the roster. Our own messages
	/// are filtered by node ID, never by display name, since two peers may
	/// share a name.
	pub async fn handle_message(&self, payload: &str) {
		let msg: PresenceMessage = match serde_json::from_str(payload) {
			Ok(msg) => msg,
			Err(e) => {
				warn!("malformed presence message: {e}");
				return;
			}
		};

		if msg.node_id == self.node_id {
			return;
		}

		match msg.kind {
			PresenceKind::Announce | PresenceKind::Heartbeat => {
				let entry = PresenceEntry {
					username: msg.username.clone(),
					status: PresenceStatus::Online,
					last_seen: msg.timestamp,
					ip_address: msg.ip_address.clone(),
					node_id: msg.node_id.clone(),
				};
				if let Err(e) = self.broker.roster_set(&msg.node_id, &entry).await {
					warn!("failed to update roster: {e}");
					return;
				}
				if msg.kind == PresenceKind::Announce {
					info!("{} ({}) joined the team", msg.username, msg.ip_address);
				}
			}
			PresenceKind::Goodbye => {
				if let Err(e) = self.broker.roster_remove(&msg.node_id).await {
					warn!("failed to remove roster entry: {e}");
					return;
				}
				info!("{} ({}) left the team", msg.username, msg.ip_address);
			}
		}
	}

	/// Remove this peer's own roster entry (graceful shutdown tail).
	pub async fn cleanup(&self) {
		if let Err(e) = self.broker.roster_remove(&self.node_id).await {
			warn!("failed to clean up own roster entry: {e}");
		}
	}
}

/// Materialise the roster, deriving status at read time. Entries past the
/// timeout are reported offline and pruned in the background.
pub async fn roster(broker: &Broker) -> Result<Vec<PresenceEntry>, BrokerError> {
	let raw = broker.roster_raw().await?;
	let now = Utc::now().timestamp();

	let mut entries = Vec::with_capacity(raw.len());
	for (node_id, json) in raw {
		let mut entry: PresenceEntry = match serde_json::from_str(&json) {
			Ok(entry) => entry,
			Err(e) => {
				warn!("malformed roster entry for {node_id}: {e}");
				continue;
			}
		};

		entry.status = derive_status(entry.last_seen, now);
		if entry.status == PresenceStatus::Offline {
			let broker = broker.clone();
			let stale = node_id.clone();
			tokio::spawn(async move {
				let _ = broker.roster_remove(&stale).await;
			});
		}

		entries.push(entry);
	}

	entries.sort_by(|a, b| a.username.cmp(&b.username));
	Ok(entries)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_boundary_is_inclusive() {
		let now = 1_000_000;
		assert_eq!(derive_status(now, now), PresenceStatus::Online);
		assert_eq!(derive_status(now - 60, now), PresenceStatus::Online);
		assert_eq!(derive_status(now - 61, now), PresenceStatus::Offline);
	}

	#[test]
	fn local_ip_always_yields_something() {
		let ip = local_ip();
		assert!(!ip.is_empty());
		assert!(ip.parse::<std::net::IpAddr>().is_ok());
	}
}
