//! Team chat. Flows over its own channel and never touches the
//! replication pipeline.

use chrono::{Local, TimeZone, Utc};

use crate::broker::{chat_channel, Broker, BrokerError};
use crate::message::ChatMessage;

/// Publish one chat message to the team.
pub async fn send(
	broker: &Broker,
	sender: &str,
	text: &str,
	priority: bool,
) -> Result<(), BrokerError> {
	let msg = ChatMessage {
		sender: sender.to_string(),
		message: text.to_string(),
		timestamp: Utc::now().timestamp(),
		priority,
	};
	let channel = chat_channel(broker.team());
	broker.publish(&channel, &msg).await
}

/// One-line rendering for the log stream of a running peer.
pub fn render(msg: &ChatMessage) -> String {
	let time = Local
		.timestamp_opt(msg.timestamp, 0)
		.single()
		.map(|t| t.format("%H:%M:%S").to_string())
		.unwrap_or_else(|| "--:--:--".to_string());
	let bang = if msg.priority { "! " } else { "" };
	format!("[CHAT {time}] <{}> {bang}{}", msg.sender, msg.message)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn render_includes_sender_and_text() {
		let msg = ChatMessage {
			sender: "dana".into(),
			message: "shipping it".into(),
			timestamp: 1_700_000_000,
			priority: false,
		};
		let line = render(&msg);
		assert!(line.starts_with("[CHAT "));
		assert!(line.contains("<dana> shipping it"));
	}

	#[test]
	fn render_marks_priority() {
		let msg = ChatMessage {
			sender: "dana".into(),
			message: "prod is down".into(),
			timestamp: 1_700_000_000,
			priority: true,
		};
		assert!(render(&msg).contains("<dana> ! prod is down"));
	}
}
