use std::{
	collections::HashMap,
	ffi::OsString,
	io,
	path::{Path, PathBuf},
	sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use inotify::{EventOwned, EventStream, Inotify, WatchDescriptor, WatchMask, Watches};
use tracing::{debug, trace};

use super::{EventSource, RawEvent, WatchBackend, WatchId};
use crate::{conditions::Conditions, error::WatcherError};

const BUFFER_SIZE: usize = 16 * 1024;

/// Watch descriptor to directory mapping shared by the backend and the source, so
/// record names can be resolved into absolute paths.
#[derive(Debug, Default)]
struct WatchTable {
	next_id: u32,
	ids: HashMap<WatchDescriptor, WatchId>,
	entries: HashMap<WatchId, (WatchDescriptor, PathBuf)>,
}

impl WatchTable {
	fn insert(&mut self, descriptor: WatchDescriptor, path: &Path) -> WatchId {
		// The kernel hands out the same descriptor when an inode is watched twice
		let id = if let Some(id) = self.ids.get(&descriptor) {
			*id
		} else {
			self.next_id += 1;
			let id = WatchId(self.next_id);
			self.ids.insert(descriptor.clone(), id);
			id
		};

		self.entries.insert(id, (descriptor, path.to_path_buf()));

		id
	}

	fn retire(&mut self, id: WatchId) -> Option<WatchDescriptor> {
		self.entries.remove(&id).map(|(descriptor, _)| {
			self.ids.remove(&descriptor);
			descriptor
		})
	}

	fn resolve(&self, descriptor: &WatchDescriptor, name: Option<OsString>) -> Option<(WatchId, PathBuf)> {
		let id = *self.ids.get(descriptor)?;
		let (_, dir) = self.entries.get(&id)?;

		Some((id, name.map_or_else(|| dir.clone(), |name| dir.join(name))))
	}
}

type SharedTable = Arc<Mutex<WatchTable>>;

fn lock(table: &SharedTable) -> std::sync::MutexGuard<'_, WatchTable> {
	table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct InotifyBackend {
	watches: Watches,
	table: SharedTable,
}

pub struct InotifySource {
	stream: Option<EventStream<Vec<u8>>>,
	table: SharedTable,
	deferred_error: Option<io::Error>,
}

/// Opens a kernel notification channel, split into its watch registration half and its
/// record reading half.
pub fn open() -> Result<(InotifyBackend, InotifySource), WatcherError> {
	let inotify = Inotify::init().map_err(WatcherError::Init)?;
	let watches = inotify.watches();
	let stream = inotify
		.into_event_stream(vec![0; BUFFER_SIZE])
		.map_err(WatcherError::Init)?;

	let table = SharedTable::default();

	Ok((
		InotifyBackend {
			watches,
			table: Arc::clone(&table),
		},
		InotifySource {
			stream: Some(stream),
			table,
			deferred_error: None,
		},
	))
}

impl WatchBackend for InotifyBackend {
	fn add_watch(&self, path: &Path, conditions: Conditions) -> Result<WatchId, WatcherError> {
		let descriptor = self
			.watches
			.clone()
			.add(path, WatchMask::from_bits_truncate(conditions.bits()))
			.map_err(|source| WatcherError::AddWatch {
				path: path.into(),
				source,
			})?;

		let id = lock(&self.table).insert(descriptor, path);

		trace!(?id, path = %path.display(), "Added kernel watch;");

		Ok(id)
	}

	fn remove_watch(&self, watch: WatchId) -> Result<(), WatcherError> {
		let Some(descriptor) = lock(&self.table).retire(watch) else {
			debug!(?watch, "Kernel watch was already retired;");
			return Ok(());
		};

		match self.watches.clone().remove(descriptor) {
			Ok(()) => Ok(()),
			// The kernel drops a watch on its own once the watched inode is gone
			Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
			Err(e) => Err(WatcherError::RemoveWatch(watch, e)),
		}
	}
}

impl InotifySource {
	fn decode(&self, event: EventOwned) -> RawEvent {
		let conditions = Conditions::from_bits_truncate(event.mask.bits());
		let mut table = lock(&self.table);

		let resolved = table.resolve(&event.wd, event.name);

		if conditions.contains(Conditions::IGNORED) {
			if let Some((id, _)) = &resolved {
				table.retire(*id);
			}
		}

		let (watch, path) = resolved.map_or((None, None), |(id, path)| (Some(id), Some(path)));

		RawEvent {
			watch,
			path,
			conditions,
			cookie: event.cookie,
		}
	}
}

#[async_trait]
impl EventSource for InotifySource {
	async fn read_batch(&mut self) -> Result<Vec<RawEvent>, WatcherError> {
		if let Some(e) = self.deferred_error.take() {
			self.close();
			return Err(WatcherError::Read(e));
		}

		let Some(stream) = self.stream.as_mut() else {
			return Err(WatcherError::Closed);
		};

		let first = match stream.next().await {
			Some(Ok(event)) => event,
			Some(Err(e)) => {
				self.close();
				return Err(WatcherError::Read(e));
			}
			None => {
				self.close();
				return Err(WatcherError::Closed);
			}
		};

		let mut records = vec![first];
		while let Some(next) = stream.next().now_or_never() {
			match next {
				Some(Ok(event)) => records.push(event),
				// Reported on the next call, after this batch is handed out
				Some(Err(e)) => {
					self.deferred_error = Some(e);
					break;
				}
				None => break,
			}
		}

		Ok(records.into_iter().map(|event| self.decode(event)).collect())
	}

	fn close(&mut self) {
		if self.stream.take().is_some() {
			debug!("Closed kernel notification channel;");
		}
	}
}
