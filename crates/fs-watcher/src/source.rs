use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{conditions::Conditions, error::WatcherError};

#[cfg(target_os = "linux")]
pub mod inotify;

/// Handle of a live kernel watch, unique for as long as the watch exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u32);

/// One decoded kernel record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
	/// `None` for records not tied to a watch, like queue overflows
	pub watch: Option<WatchId>,
	/// Absolute subject path, `None` when the record's watch handle is unknown
	pub path: Option<PathBuf>,
	pub conditions: Conditions,
	/// Links the two halves of a rename, zero otherwise
	pub cookie: u32,
}

impl RawEvent {
	#[must_use]
	pub fn new(path: impl Into<PathBuf>, conditions: Conditions) -> Self {
		Self {
			watch: None,
			path: Some(path.into()),
			conditions,
			cookie: 0,
		}
	}
}

/// Registers and deregisters kernel watches.
pub trait WatchBackend: Send + 'static {
	fn add_watch(&self, path: &Path, conditions: Conditions) -> Result<WatchId, WatcherError>;

	/// Removing a watch the kernel already invalidated is not an error.
	fn remove_watch(&self, watch: WatchId) -> Result<(), WatcherError>;
}

/// Stream of decoded kernel records.
#[async_trait]
pub trait EventSource: Send + 'static {
	/// Waits for at least one record and returns everything available right now.
	///
	/// Any error is terminal: after it, the source yields nothing else.
	async fn read_batch(&mut self) -> Result<Vec<RawEvent>, WatcherError>;

	/// Releases the kernel handle; calling it more than once is a no-op.
	fn close(&mut self);
}
