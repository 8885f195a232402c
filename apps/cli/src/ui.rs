//! Small terminal rendering helpers shared by the commands.

use colored::Colorize;

pub fn title(text: &str) -> String {
	text.bold().cyan().to_string()
}

pub fn success(text: &str) -> String {
	format!("{} {}", "✓".green().bold(), text)
}

pub fn error(text: &str) -> String {
	format!("{} {}", "✗".red().bold(), text.red())
}

pub fn info(text: &str) -> String {
	format!("{} {}", "→".cyan(), text)
}

pub fn warn(text: &str) -> String {
	format!("{} {}", "!".yellow().bold(), text.yellow())
}

/// Humanized age of a unix timestamp ("just now", "5 minutes ago", ...).
pub fn format_ago(unix: i64) -> String {
	let delta = (chrono::Utc::now().timestamp() - unix).max(0);
	match delta {
		0..=59 => "just now".to_string(),
		60..=3599 => format!("{} minutes ago", delta / 60),
		3600..=86_399 => format!("{} hours ago", delta / 3600),
		_ => format!("{} days ago", delta / 86_400),
	}
}

pub fn format_size(bytes: u64) -> String {
	const KB: u64 = 1024;
	const MB: u64 = KB * 1024;
	const GB: u64 = MB * 1024;
	match bytes {
		b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
		b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
		b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
		b => format!("{b} bytes"),
	}
}

pub fn truncate(text: &str, max: usize) -> String {
	if text.chars().count() <= max {
		text.to_string()
	} else {
		let cut: String = text.chars().take(max.saturating_sub(3)).collect();
		format!("{cut}...")
	}
}
