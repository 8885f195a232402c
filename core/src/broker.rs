//! Thin publish/subscribe gateway over the team's broker.
//!
//! The broker is plain Redis: three pub/sub channels per team plus one hash
//! for the roster and one key for the team bootstrap record. Everything
//! here is fire-and-forget: there is no durable log and no back channel.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::TeamConfig;
use crate::message::PresenceEntry;

/// Publish retry policy for transient failures.
const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const PUBLISH_BACKOFF_CAP: Duration = Duration::from_secs(3);

/// Connection retry policy at start-up.
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BrokerError {
	#[error("broker unreachable at {url} after {attempts} attempts: {source}")]
	Connect {
		url: String,
		attempts: u32,
		#[source]
		source: redis::RedisError,
	},

	#[error("publish to {channel} failed after {attempts} attempts: {source}")]
	Publish {
		channel: String,
		attempts: u32,
		#[source]
		source: redis::RedisError,
	},

	#[error(transparent)]
	Redis(#[from] redis::RedisError),

	#[error("message encoding failed: {0}")]
	Encode(#[from] serde_json::Error),
}

/// Channel carrying sync messages for `team`.
pub fn sync_channel(team: &str) -> String {
	format!("axle:team:{team}")
}

/// Channel carrying chat messages for `team`.
pub fn chat_channel(team: &str) -> String {
	format!("axle:chat:{team}")
}

/// Channel carrying presence messages for `team`.
pub fn presence_channel(team: &str) -> String {
	format!("axle:presence:{team}")
}

/// Key of the team bootstrap record.
pub fn team_config_key(team: &str) -> String {
	format!("axle:config:{team}")
}

/// Key of the roster hash (node ID → presence entry JSON).
pub fn roster_key(team: &str) -> String {
	format!("axle:team:{team}:presence")
}

/// Connected broker client, cheap to clone across workers.
#[derive(Clone)]
pub struct Broker {
	client: redis::Client,
	manager: ConnectionManager,
	team: String,
}

impl Broker {
	/// Connect with exponential backoff. Failure here is a configuration
	/// error: the caller aborts before starting any worker.
	pub async fn connect(url: &str, team: &str) -> Result<Self, BrokerError> {
		let client = redis::Client::open(url).map_err(|source| BrokerError::Connect {
			url: url.to_string(),
			attempts: 0,
			source,
		})?;

		let mut backoff = CONNECT_BACKOFF_INITIAL;
		let mut last_err = None;
		for attempt in 1..=CONNECT_ATTEMPTS {
			match client.get_connection_manager().await {
				Ok(manager) => {
					info!("connected to broker at {url} on attempt {attempt}");
					return Ok(Self {
						client,
						manager,
						team: team.to_string(),
					});
				}
				Err(e) => {
					warn!(
						"broker connection attempt {attempt}/{CONNECT_ATTEMPTS} failed, \
						 retrying in {backoff:?}: {e}"
					);
					last_err = Some(e);
				}
			}
			if attempt < CONNECT_ATTEMPTS {
				tokio::time::sleep(backoff).await;
				backoff = (backoff * 2).min(CONNECT_BACKOFF_CAP);
			}
		}

		Err(BrokerError::Connect {
			url: url.to_string(),
			attempts: CONNECT_ATTEMPTS,
			source: last_err.expect("at least one attempt was made"),
		})
	}

	pub fn team(&self) -> &str {
		&self.team
	}

	/// JSON-encode and publish, retrying transient failures. After the last
	/// attempt the message is abandoned and the error surfaced for the log.
	pub async fn publish<T: Serialize>(
		&self,
		channel: &str,
		message: &T,
	) -> Result<(), BrokerError> {
		let payload = serde_json::to_string(message)?;

		let mut backoff = PUBLISH_BACKOFF_INITIAL;
		let mut last_err = None;
		for attempt in 1..=PUBLISH_ATTEMPTS {
			let mut con = self.manager.clone();
			match con.publish::<_, _, i64>(channel, &payload).await {
				Ok(receivers) => {
					debug!("published to {channel} ({receivers} receivers)");
					return Ok(());
				}
				Err(e) => {
					warn!(
						"publish to {channel} attempt {attempt}/{PUBLISH_ATTEMPTS} failed: {e}"
					);
					last_err = Some(e);
				}
			}
			if attempt < PUBLISH_ATTEMPTS {
				tokio::time::sleep(backoff).await;
				backoff = (backoff * 2).min(PUBLISH_BACKOFF_CAP);
			}
		}

		Err(BrokerError::Publish {
			channel: channel.to_string(),
			attempts: PUBLISH_ATTEMPTS,
			source: last_err.expect("at least one attempt was made"),
		})
	}

	/// Subscribe to the team's three channels. The returned pub/sub
	/// delivers messages in publication order per channel.
	pub async fn subscribe(&self) -> Result<redis::aio::PubSub, BrokerError> {
		let mut pubsub = self.client.get_async_pubsub().await?;
		let channels = [
			sync_channel(&self.team),
			chat_channel(&self.team),
			presence_channel(&self.team),
		];
		for channel in &channels {
			pubsub.subscribe(channel).await?;
		}
		info!("subscribed to {channels:?}");
		Ok(pubsub)
	}

	// -- roster hash --

	pub async fn roster_set(
		&self,
		node_id: &str,
		entry: &PresenceEntry,
	) -> Result<(), BrokerError> {
		let payload = serde_json::to_string(entry)?;
		let mut con = self.manager.clone();
		con.hset::<_, _, _, ()>(roster_key(&self.team), node_id, payload)
			.await?;
		Ok(())
	}

	pub async fn roster_remove(&self, node_id: &str) -> Result<(), BrokerError> {
		let mut con = self.manager.clone();
		con.hdel::<_, _, ()>(roster_key(&self.team), node_id).await?;
		Ok(())
	}

	/// Raw roster hash: node ID → presence entry JSON.
	pub async fn roster_raw(&self) -> Result<HashMap<String, String>, BrokerError> {
		let mut con = self.manager.clone();
		Ok(con.hgetall(roster_key(&self.team)).await?)
	}

	// -- team bootstrap record --

	pub async fn put_team_config(&self, config: &TeamConfig) -> Result<(), BrokerError> {
		let payload = serde_json::to_string(config)?;
		let mut con = self.manager.clone();
		con.set::<_, _, ()>(team_config_key(&self.team), payload)
			.await?;
		Ok(())
	}

	pub async fn get_team_config(&self) -> Result<Option<TeamConfig>, BrokerError> {
		let mut con = self.manager.clone();
		let raw: Option<String> = con.get(team_config_key(&self.team)).await?;
		match raw {
			Some(json) => Ok(Some(serde_json::from_str(&json)?)),
			None => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn channel_names_are_keyed_by_team() {
		assert_eq!(sync_channel("hack"), "axle:team:hack");
		assert_eq!(chat_channel("hack"), "axle:chat:hack");
		assert_eq!(presence_channel("hack"), "axle:presence:hack");
		assert_eq!(team_config_key("hack"), "axle:config:hack");
		assert_eq!(roster_key("hack"), "axle:team:hack:presence");
	}
}
