//! In-memory stand-ins for the kernel, used by the unit tests of this crate.

use std::{
	collections::{HashMap, HashSet},
	io,
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
};

use async_channel as chan;
use async_trait::async_trait;

use crate::{
	conditions::Conditions,
	error::WatcherError,
	source::{EventSource, RawEvent, WatchBackend, WatchId},
};

#[derive(Debug, Default)]
struct BackendState {
	next_id: u32,
	live: HashMap<WatchId, PathBuf>,
	failing: HashSet<PathBuf>,
}

/// Backend recording live watches, clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
	state: Arc<Mutex<BackendState>>,
}

#[allow(clippy::unwrap_used)]
impl MemoryBackend {
	pub fn live_paths(&self) -> Vec<PathBuf> {
		self.state.lock().unwrap().live.values().cloned().collect()
	}

	pub fn fail_on(&self, path: impl Into<PathBuf>) {
		self.state.lock().unwrap().failing.insert(path.into());
	}
}

#[allow(clippy::unwrap_used)]
impl WatchBackend for MemoryBackend {
	fn add_watch(&self, path: &Path, _: Conditions) -> Result<WatchId, WatcherError> {
		let mut state = self.state.lock().unwrap();

		if state.failing.contains(path) {
			return Err(WatcherError::AddWatch {
				path: path.into(),
				source: io::Error::from(io::ErrorKind::PermissionDenied),
			});
		}

		state.next_id += 1;
		let id = WatchId(state.next_id);
		state.live.insert(id, path.to_path_buf());

		Ok(id)
	}

	fn remove_watch(&self, watch: WatchId) -> Result<(), WatcherError> {
		self.state.lock().unwrap().live.remove(&watch);
		Ok(())
	}
}

/// Source fed by hand through a channel; dropping the sender ends the stream.
pub struct ChannelSource {
	rx: chan::Receiver<Result<Vec<RawEvent>, WatcherError>>,
	released: bool,
	closed: Arc<Mutex<usize>>,
}

pub struct SourceFeed {
	pub tx: chan::Sender<Result<Vec<RawEvent>, WatcherError>>,
	closed: Arc<Mutex<usize>>,
}

#[allow(clippy::unwrap_used)]
impl SourceFeed {
	pub async fn send(&self, batch: Vec<RawEvent>) {
		self.tx.send(Ok(batch)).await.unwrap();
	}

	/// How many times the source's kernel handle was released
	pub fn close_count(&self) -> usize {
		*self.closed.lock().unwrap()
	}
}

pub fn channel_source() -> (SourceFeed, ChannelSource) {
	let (tx, rx) = chan::unbounded();
	let closed = Arc::new(Mutex::new(0));

	(
		SourceFeed {
			tx,
			closed: Arc::clone(&closed),
		},
		ChannelSource {
			rx,
			released: false,
			closed,
		},
	)
}

#[async_trait]
impl EventSource for ChannelSource {
	async fn read_batch(&mut self) -> Result<Vec<RawEvent>, WatcherError> {
		self.rx.recv().await.map_err(|_| WatcherError::Closed)?
	}

	#[allow(clippy::unwrap_used)]
	fn close(&mut self) {
		if !self.released {
			self.released = true;
			self.rx.close();
			*self.closed.lock().unwrap() += 1;
		}
	}
}
