use std::{collections::HashMap, path::PathBuf};

use async_channel as chan;
use async_trait::async_trait;
use tokio::{select, spawn, task::JoinHandle};
use tracing::{debug, error, instrument, trace, warn};

use crate::{
	conditions::Conditions,
	error::WatcherError,
	registry::WatchRegistry,
	source::{EventSource, RawEvent, WatchBackend},
	stop::StopSignal,
};

const STAGE_CHANNEL_CAPACITY: usize = 256;

/// Bound on rename halves waiting for their pair, older ones belong to moves out of the tree
const MAX_PENDING_MOVES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
	Fs(RawEvent),
	/// The kernel stream ended or the pipeline was stopped, nothing else follows
	EndOfStream,
}

/// Receives delivered events one at a time, in kernel order.
#[async_trait]
pub trait WatchEventHandler: Send + 'static {
	async fn handle_event(&mut self, event: WatchEvent);
}

#[derive(Debug)]
enum Filtered {
	Event {
		event: RawEvent,
		/// Subject's requested conditions at the time the event was filtered
		mask: Option<Conditions>,
	},
	EndOfStream,
}

/// Read, filter and delivery stages running as separate tasks.
pub struct WatchPipeline<B, H> {
	stop: StopSignal,
	read: JoinHandle<()>,
	filter: JoinHandle<WatchRegistry<B>>,
	deliver: JoinHandle<H>,
}

impl<B: WatchBackend, H: WatchEventHandler> WatchPipeline<B, H> {
	pub fn spawn(source: impl EventSource, registry: WatchRegistry<B>, handler: H) -> Self {
		let stop = StopSignal::new();

		let (raw_tx, raw_rx) = chan::bounded(STAGE_CHANNEL_CAPACITY);
		let (filtered_tx, filtered_rx) = chan::bounded(STAGE_CHANNEL_CAPACITY);

		Self {
			read: spawn(read_stage(source, raw_tx, stop.clone())),
			filter: spawn(filter_stage(registry, raw_rx, filtered_tx, stop.clone())),
			deliver: spawn(deliver_stage(handler, filtered_rx, stop.clone())),
			stop,
		}
	}

	/// Asks every stage to exit after its current item, never blocks.
	pub fn stop(&self) {
		if self.stop.stop() {
			debug!("Stopping watch pipeline;");
		}
	}

	#[must_use]
	pub fn stop_signal(&self) -> StopSignal {
		self.stop.clone()
	}

	/// Waits for all stages, handing back the registry and the handler.
	pub async fn join(self) -> Result<(WatchRegistry<B>, H), WatcherError> {
		let (read, filter, deliver) = (self.read.await, self.filter.await, self.deliver.await);

		read?;

		Ok((filter?, deliver?))
	}
}

#[instrument(skip_all)]
async fn read_stage(mut source: impl EventSource, tx: chan::Sender<RawEvent>, stop: StopSignal) {
	'reading: loop {
		let res = select! {
			biased;
			() = stop.wait() => break,
			res = source.read_batch() => res,
		};

		match res {
			Ok(batch) => {
				for event in batch {
					if stop.is_stopped() || tx.send(event).await.is_err() {
						break 'reading;
					}
				}
			}

			Err(WatcherError::Closed) => {
				debug!("Kernel event source reached end of stream;");
				break;
			}

			Err(e) => {
				error!(?e, "Kernel event source failed;");
				break;
			}
		}
	}

	source.close();
}

#[instrument(skip_all)]
async fn filter_stage<B: WatchBackend>(
	mut registry: WatchRegistry<B>,
	rx: chan::Receiver<RawEvent>,
	tx: chan::Sender<Filtered>,
	stop: StopSignal,
) -> WatchRegistry<B> {
	let mut pending_moves = HashMap::new();

	loop {
		let event = select! {
			biased;
			() = stop.wait() => return registry,
			res = rx.recv() => match res {
				Ok(event) => event,
				// Upstream is gone
				Err(_) => break,
			},
		};

		match filter(&mut registry, &mut pending_moves, event) {
			Ok(forwarded) => {
				for filtered in forwarded {
					if tx.send(filtered).await.is_err() {
						return registry;
					}
				}
			}

			Err(e) => {
				error!(?e, "Watch registry maintenance failed, the watch tree can't be trusted anymore;");
				stop.stop();
				return registry;
			}
		}
	}

	if tx.send(Filtered::EndOfStream).await.is_err() {
		trace!("Delivery stage exited before end of stream;");
	}

	registry
}

/// Applies registry maintenance for one raw event and decides what moves on.
///
/// Files found inside a directory that just appeared never got events of their own, they
/// follow the directory's event as finished writes.
fn filter<B: WatchBackend>(
	registry: &mut WatchRegistry<B>,
	pending_moves: &mut HashMap<u32, PathBuf>,
	event: RawEvent,
) -> Result<Vec<Filtered>, WatcherError> {
	let conditions = event.conditions;

	if conditions.contains(Conditions::IGNORED) {
		trace!(watch = ?event.watch, "Kernel watch was removed;");
		return Ok(vec![]);
	}

	if conditions.contains(Conditions::Q_OVERFLOW) {
		warn!("Kernel event queue overflowed, some events were lost;");
		return Ok(vec![]);
	}

	let Some(path) = event.path.as_deref() else {
		trace!(?event, "Dropping event for an unknown watch;");
		return Ok(vec![]);
	};

	match registry.is_ignored(path) {
		Ok(false) => {}
		Ok(true) => return Ok(vec![]),
		Err(e) => {
			warn!(?e, path = %path.display(), "Failed to check ignore rules, dropping event;");
			return Ok(vec![]);
		}
	}

	// Taken before maintenance, a removal below must not hide events that already happened
	let mask = registry.conditions_for(path);

	let mut appeared = None;

	if conditions.is_dir() {
		if conditions.contains(Conditions::CREATE) {
			if registry.add_child_dir(path)? {
				appeared = Some(path);
			}
		} else if conditions.contains(Conditions::MOVED_FROM) {
			if pending_moves.len() >= MAX_PENDING_MOVES {
				pending_moves.clear();
			}
			pending_moves.insert(event.cookie, path.to_path_buf());
		} else if conditions.contains(Conditions::MOVED_TO) {
			match pending_moves.remove(&event.cookie) {
				Some(from) => registry.reissue(&from, path)?,
				None => {
					if registry.add_child_dir(path)? {
						appeared = Some(path);
					}
				}
			}
		} else if conditions.contains(Conditions::DELETE) {
			registry.remove(path)?;
		}
	} else if conditions.intersects(Conditions::CREATE | Conditions::MOVED_TO) {
		registry.record_file(path)?;
	} else if conditions.intersects(Conditions::DELETE | Conditions::MOVED_FROM)
		&& registry.lookup(path).is_some_and(|entry| entry.watch.is_none())
	{
		// Files ride on their parent's watch, only the entry goes
		registry.remove(path)?;
	}

	let discovered = appeared.map_or_else(Vec::new, |dir| {
		registry
			.files_below(dir)
			.into_iter()
			.map(|file| Filtered::Event {
				mask: registry.conditions_for(&file),
				event: RawEvent::new(file, Conditions::CLOSE_WRITE),
			})
			.collect::<Vec<_>>()
	});

	if conditions.contains(Conditions::DELETE_SELF) {
		// Self events resolve to the directory carrying the watch
		registry.remove(path)?;
	} else if conditions.contains(Conditions::MOVE_SELF)
		&& event
			.watch
			.and_then(|watch| registry.watched_path(watch))
			.is_some_and(|watched| watched == path)
	{
		// Still registered at its old location, so it left the watched tree
		pending_moves.retain(|_, from| from != path);
		registry.remove(path)?;
	}

	// Only directory existence is synced, not directory metadata
	if conditions.is_dir() && !conditions.contains(Conditions::CREATE) {
		return Ok(discovered);
	}

	let mut forwarded = Vec::with_capacity(discovered.len() + 1);
	forwarded.push(Filtered::Event { event, mask });
	forwarded.extend(discovered);

	Ok(forwarded)
}

#[instrument(skip_all)]
async fn deliver_stage<H: WatchEventHandler>(
	mut handler: H,
	rx: chan::Receiver<Filtered>,
	stop: StopSignal,
) -> H {
	loop {
		let filtered = select! {
			biased;
			() = stop.wait() => break,
			res = rx.recv() => match res {
				Ok(filtered) => filtered,
				Err(_) => break,
			},
		};

		match filtered {
			Filtered::Event { event, mask } => {
				if mask.is_some_and(|mask| mask.intersects(event.conditions)) {
					handler.handle_event(WatchEvent::Fs(event)).await;
				} else {
					trace!(?event, ?mask, "Event outside of requested conditions;");
				}
			}

			Filtered::EndOfStream => break,
		}
	}

	handler.handle_event(WatchEvent::EndOfStream).await;

	// Nothing can be delivered anymore, let the other stages wind down
	stop.stop();

	handler
}
