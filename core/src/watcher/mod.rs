//! Event debouncing and dynamic batching over the working tree.
//!
//! Raw notify events are filtered, debounced per path, and coalesced into a
//! pending map (latest kind wins). A single-shot timer, rescheduled on every
//! accepted event, fires the batch signal that drives the patch producer.
//! While the consumer applies an inbound patch, the self-write mute flag
//! silences the whole pipeline so synthesized events never echo back out.

use notify::event::ModifyKind;
use notify::{EventKind, RecursiveMode, Watcher as _};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::message::FileEvent;

pub mod filter;

pub use filter::{EventFilter, SkipReason, DEFAULT_SIZE_CAP};

#[derive(Debug, Error)]
pub enum WatchError {
	#[error("filesystem watcher error: {0}")]
	Notify(#[from] notify::Error),

	#[error("invalid ignore pattern {pattern}: {source}")]
	Pattern {
		pattern: String,
		#[source]
		source: globset::Error,
	},

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Tuning knobs for the debouncer and batcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
	/// Events for the same path inside this window coalesce away.
	pub debounce: Duration,
	/// Cadence of the debounce-table sweep and event-rate counter reset.
	pub sweep_interval: Duration,
	/// Debounce entries older than this are swept.
	pub debounce_retention: Duration,
	/// Files at or over this size are dropped at event time.
	pub size_cap: u64,
	/// Raw notify event buffer.
	pub channel_capacity: usize,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			debounce: Duration::from_millis(500),
			sweep_interval: Duration::from_secs(60),
			debounce_retention: Duration::from_secs(300),
			size_cap: DEFAULT_SIZE_CAP,
			channel_capacity: 8192,
		}
	}
}

/// Batch window for the observed event rate over the last minute.
fn window_for_count(events_last_minute: u64) -> Duration {
	if events_last_minute > 300 {
		Duration::from_secs(5)
	} else if events_last_minute >= 60 {
		Duration::from_secs(2)
	} else {
		Duration::from_secs(1)
	}
}

/// Handle on the self-write mute flag, shared between the watcher and the
/// patch consumer.
#[derive(Clone, Default)]
pub struct WriteMute(Arc<AtomicBool>);

impl WriteMute {
	pub fn engage(&self) {
		self.0.store(true, Ordering::SeqCst);
		debug!("watcher muted for patch application");
	}

	pub fn release(&self) {
		self.0.store(false, Ordering::SeqCst);
		debug!("watcher active");
	}

	pub fn engaged(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Recursive watcher over one working tree.
pub struct TreeWatcher {
	root: PathBuf,
	filter: EventFilter,
	config: WatcherConfig,
	pending: Mutex<HashMap<String, FileEvent>>,
	debounce: Mutex<HashMap<PathBuf, Instant>>,
	mute: WriteMute,
	events_last_minute: AtomicU64,
	batch_timer: Mutex<Option<JoinHandle<()>>>,
	batch_tx: mpsc::Sender<()>,
}

impl TreeWatcher {
	/// Build the watcher and the batch-signal receiver the orchestrator
	/// listens on.
	pub fn new(
		root: impl Into<PathBuf>,
		ignore_patterns: &[String],
		config: WatcherConfig,
	) -> Result<(Arc<Self>, mpsc::Receiver<()>), WatchError> {
		let root = root.into();
		let filter = EventFilter::new(&root, ignore_patterns, config.size_cap)?;
		let (batch_tx, batch_rx) = mpsc::channel(4);

		let watcher = Arc::new(Self {
			root,
			filter,
			config,
			pending: Mutex::new(HashMap::new()),
			debounce: Mutex::new(HashMap::new()),
			mute: WriteMute::default(),
			events_last_minute: AtomicU64::new(0),
			batch_timer: Mutex::new(None),
			batch_tx,
		});

		Ok((watcher, batch_rx))
	}

	pub fn mute(&self) -> WriteMute {
		self.mute.clone()
	}

	/// Snapshot and clear the pending map. Always called from exactly one
	/// place at a time (the batch loop, or the final shutdown flush).
	pub fn take_pending(&self) -> HashMap<String, FileEvent> {
		std::mem::take(&mut self.pending.lock().expect("pending lock poisoned"))
	}

	pub fn pending_len(&self) -> usize {
		self.pending.lock().expect("pending lock poisoned").len()
	}

	/// Watch until cancelled. Raw events are forwarded from the notify
	/// callback thread into the async loop; the sweep ticker bounds the
	/// debounce table and resets the event-rate counter.
	pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), WatchError> {
		let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Event>(self.config.channel_capacity);

		let mut watcher =
			notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
				Ok(event) => {
					// The callback runs on notify's own thread, so a
					// blocking send is safe and applies backpressure
					// instead of dropping events.
					let _ = raw_tx.blocking_send(event);
				}
				Err(e) => warn!("watch backend error: {e}"),
			})?;
		watcher.watch(&self.root, RecursiveMode::Recursive)?;
		info!("watching {}", self.root.display());

		let mut sweep = tokio::time::interval(self.config.sweep_interval);
		sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		sweep.tick().await; // first tick completes immediately

		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				Some(event) = raw_rx.recv() => self.handle_notify(event),
				_ = sweep.tick() => self.sweep(),
			}
		}

		// Stop the in-flight timer: the orchestrator flushes the final
		// batch itself during shutdown.
		if let Some(handle) = self
			.batch_timer
			.lock()
			.expect("timer lock poisoned")
			.take()
		{
			handle.abort();
		}

		info!("watcher stopped");
		Ok(())
	}

	fn handle_notify(&self, event: notify::Event) {
		match event.kind {
			EventKind::Create(_) => {
				for path in &event.paths {
					self.observe(FileEvent::Created, path);
				}
			}
			EventKind::Remove(_) => {
				for path in &event.paths {
					self.observe(FileEvent::Deleted, path);
				}
			}
			EventKind::Modify(ModifyKind::Name(_)) => {
				// A two-path rename is (from, to); the source side is a
				// disappearance, the destination side carries the content.
				match event.paths.as_slice() {
					[from, to] => {
						self.observe(FileEvent::Deleted, from);
						self.observe(FileEvent::Renamed, to);
					}
					paths => {
						for path in paths {
							if path.exists() {
								self.observe(FileEvent::Renamed, path);
							} else {
								self.observe(FileEvent::Deleted, path);
							}
						}
					}
				}
			}
			EventKind::Modify(_) => {
				for path in &event.paths {
					self.observe(FileEvent::Modified, path);
				}
			}
			EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
		}
	}

	/// The full per-event pipeline: mute, ignore set, directory handling,
	/// swap/size/binary screens, debounce, pending update, timer reset.
	fn observe(&self, kind: FileEvent, path: &Path) {
		if self.mute.engaged() {
			trace!("muted, dropping {kind} {}", path.display());
			return;
		}

		if self.filter.is_ignored(path) {
			return;
		}

		if matches!(kind, FileEvent::Created | FileEvent::Renamed) && path.is_dir() {
			self.walk_new_directory(path);
			return;
		}

		if self.filter.is_swap_file(path) {
			trace!("dropping {}: {}", path.display(), SkipReason::SwapFile);
			return;
		}

		if matches!(kind, FileEvent::Created | FileEvent::Modified | FileEvent::Renamed) {
			match self.filter.check_content(path) {
				Ok(None) => {}
				Ok(Some(reason)) => {
					info!("skipping {}: {reason}", path.display());
					return;
				}
				Err(e) => {
					// Stat raced with the change; drop this path and move on.
					debug!("stat failed for {}: {e}", path.display());
					return;
				}
			}
		}

		let Ok(rel) = path.strip_prefix(&self.root) else {
			return;
		};
		let rel = rel
			.components()
			.map(|c| c.as_os_str().to_string_lossy())
			.collect::<Vec<_>>()
			.join("/");
		if rel.is_empty() {
			return;
		}

		if !self.debounce_accept(path) {
			trace!("debounced {kind} {rel}");
			return;
		}

		self.events_last_minute.fetch_add(1, Ordering::Relaxed);
		debug!("{rel} {kind}");

		self.pending
			.lock()
			.expect("pending lock poisoned")
			.insert(rel, kind);

		self.schedule_batch();
	}

	/// True if the event is outside the per-path debounce window.
	fn debounce_accept(&self, path: &Path) -> bool {
		let mut table = self.debounce.lock().expect("debounce lock poisoned");
		let now = Instant::now();
		if let Some(last) = table.get(path) {
			if now.duration_since(*last) < self.config.debounce {
				return false;
			}
		}
		table.insert(path.to_path_buf(), now);
		true
	}

	/// A freshly created or moved-in directory must contribute one pending
	/// entry per contained file; notify only reports the directory itself.
	fn walk_new_directory(&self, dir: &Path) {
		debug!("walking new directory {}", dir.display());
		let walk = WalkDir::new(dir)
			.into_iter()
			.filter_entry(|e| !self.filter.is_ignored(e.path()));
		for entry in walk {
			let entry = match entry {
				Ok(e) => e,
				Err(e) => {
					debug!("walk error under {}: {e}", dir.display());
					continue;
				}
			};
			if entry.file_type().is_file() {
				self.observe(FileEvent::Created, entry.path());
			}
		}
	}

	/// (Re)arm the single-shot batch timer with the current window. Every
	/// accepted event lands here, so a steady stream keeps pushing the
	/// batch out to the window edge.
	fn schedule_batch(&self) {
		let window = window_for_count(self.events_last_minute.load(Ordering::Relaxed));
		let tx = self.batch_tx.clone();
		let handle = tokio::spawn(async move {
			tokio::time::sleep(window).await;
			let _ = tx.send(()).await;
		});

		if let Some(prev) = self
			.batch_timer
			.lock()
			.expect("timer lock poisoned")
			.replace(handle)
		{
			prev.abort();
		}
	}

	/// Bound the debounce table and restart the event-rate minute.
	fn sweep(&self) {
		let retention = self.config.debounce_retention;
		let now = Instant::now();
		let mut table = self.debounce.lock().expect("debounce lock poisoned");
		table.retain(|_, last| now.duration_since(*last) < retention);
		drop(table);

		self.events_last_minute.store(0, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	fn watcher_in(dir: &Path, config: WatcherConfig) -> Arc<TreeWatcher> {
		let patterns = vec![".git".to_string()];
		let (watcher, _rx) = TreeWatcher::new(dir, &patterns, config).unwrap();
		watcher
	}

	#[test]
	fn window_tracks_event_rate() {
		assert_eq!(window_for_count(0), Duration::from_secs(1));
		assert_eq!(window_for_count(59), Duration::from_secs(1));
		assert_eq!(window_for_count(60), Duration::from_secs(2));
		assert_eq!(window_for_count(300), Duration::from_secs(2));
		assert_eq!(window_for_count(301), Duration::from_secs(5));
	}

	#[tokio::test]
	async fn latest_kind_wins_within_a_batch() {
		let dir = TempDir::new().unwrap();
		let w = watcher_in(dir.path(), WatcherConfig {
			debounce: Duration::ZERO,
			..WatcherConfig::default()
		});

		let file = dir.path().join("a.txt");
		fs::write(&file, b"x").unwrap();

		w.observe(FileEvent::Created, &file);
		w.observe(FileEvent::Modified, &file);

		let pending = w.take_pending();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending["a.txt"], FileEvent::Modified);
	}

	#[tokio::test]
	async fn debounce_coalesces_rapid_events() {
		let dir = TempDir::new().unwrap();
		let w = watcher_in(dir.path(), WatcherConfig::default());

		let file = dir.path().join("b.txt");
		fs::write(&file, b"x").unwrap();

		w.observe(FileEvent::Created, &file);
		w.observe(FileEvent::Modified, &file); // inside the 500 ms window

		let pending = w.take_pending();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending["b.txt"], FileEvent::Created);
	}

	#[tokio::test]
	async fn mute_drops_everything() {
		let dir = TempDir::new().unwrap();
		let w = watcher_in(dir.path(), WatcherConfig::default());

		let file = dir.path().join("c.txt");
		fs::write(&file, b"x").unwrap();

		let mute = w.mute();
		mute.engage();
		w.observe(FileEvent::Created, &file);
		assert_eq!(w.pending_len(), 0);

		mute.release();
		w.observe(FileEvent::Created, &file);
		assert_eq!(w.pending_len(), 1);
	}

	#[tokio::test]
	async fn ignored_and_binary_paths_never_pend() {
		let dir = TempDir::new().unwrap();
		let w = watcher_in(dir.path(), WatcherConfig::default());

		let inside_git = dir.path().join(".git").join("index");
		w.observe(FileEvent::Modified, &inside_git);

		let blob = dir.path().join("photo.png");
		fs::write(&blob, b"not really a png").unwrap();
		w.observe(FileEvent::Created, &blob);

		assert_eq!(w.pending_len(), 0);
	}

	#[tokio::test]
	async fn oversize_at_cap_is_dropped() {
		let dir = TempDir::new().unwrap();
		let w = watcher_in(dir.path(), WatcherConfig {
			size_cap: 8,
			debounce: Duration::ZERO,
			..WatcherConfig::default()
		});

		let big = dir.path().join("big.txt");
		fs::write(&big, b"12345678").unwrap(); // exactly at the cap
		w.observe(FileEvent::Created, &big);
		assert_eq!(w.pending_len(), 0);

		let small = dir.path().join("small.txt");
		fs::write(&small, b"1234567").unwrap(); // one byte below
		w.observe(FileEvent::Created, &small);
		assert_eq!(w.pending_len(), 1);
	}

	#[tokio::test]
	async fn deletions_pend_without_stat() {
		let dir = TempDir::new().unwrap();
		let w = watcher_in(dir.path(), WatcherConfig::default());

		// The path no longer exists; deletions must still flow through.
		w.observe(FileEvent::Deleted, &dir.path().join("gone.txt"));

		let pending = w.take_pending();
		assert_eq!(pending["gone.txt"], FileEvent::Deleted);
	}

	#[tokio::test]
	async fn new_directory_contributes_contained_files() {
		let dir = TempDir::new().unwrap();
		let w = watcher_in(dir.path(), WatcherConfig {
			debounce: Duration::ZERO,
			..WatcherConfig::default()
		});

		let sub = dir.path().join("pkg");
		fs::create_dir_all(sub.join("nested")).unwrap();
		fs::write(sub.join("one.rs"), b"1").unwrap();
		fs::write(sub.join("nested/two.rs"), b"2").unwrap();

		w.observe(FileEvent::Created, &sub);

		let pending = w.take_pending();
		assert_eq!(pending.len(), 2);
		assert_eq!(pending["pkg/one.rs"], FileEvent::Created);
		assert_eq!(pending["pkg/nested/two.rs"], FileEvent::Created);
	}
}
