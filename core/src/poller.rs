//! Remote change poller.
//!
//! Each cycle queries the remote change history below the root folder since the last
//! checkpoint and emits one [`ObjectChange`] per affected object. Failed queries are
//! retried with a capped exponential backoff instead of stopping the process.

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sp_cloud_api::{
	ChangeOrigin, Error as RemoteError, ObjectChange, RemoteChangeRecord, RemoteObject,
	RemoteStore,
};
use sp_fs_watcher::StopSignal;
use tokio::time::sleep;
use tracing::{debug, info, instrument, trace, warn};

use crate::{events::EventBus, index::PathIndex, CoreError};

/// Persistence of how far the remote history has been consumed
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
	async fn load_checkpoint(&self) -> Option<DateTime<Utc>>;

	async fn save_checkpoint(&self, checkpoint: DateTime<Utc>) -> Result<(), CoreError>;
}

pub struct RemotePoller {
	store: Arc<dyn RemoteStore>,
	index: Arc<dyn PathIndex>,
	checkpoints: Arc<dyn CheckpointStore>,
	bus: EventBus,
	root_folder_id: String,
	interval: Duration,
	max_backoff: Duration,
	checkpoint: Option<DateTime<Utc>>,
	seen: HashSet<String>,
}

impl RemotePoller {
	pub fn new(
		store: Arc<dyn RemoteStore>,
		index: Arc<dyn PathIndex>,
		checkpoints: Arc<dyn CheckpointStore>,
		bus: EventBus,
		root_folder_id: impl Into<String>,
	) -> Self {
		Self {
			store,
			index,
			checkpoints,
			bus,
			root_folder_id: root_folder_id.into(),
			interval: Duration::from_secs(5),
			max_backoff: Duration::from_secs(300),
			checkpoint: None,
			seen: HashSet::new(),
		}
	}

	#[must_use]
	pub fn with_interval(mut self, interval: Duration, max_backoff: Duration) -> Self {
		self.interval = interval;
		self.max_backoff = max_backoff;
		self
	}

	/// Runs one cycle, returning how many changes were emitted.
	pub async fn poll_once(&mut self) -> Result<usize, CoreError> {
		self.seen.clear();

		let since = match self.checkpoint {
			Some(checkpoint) => checkpoint,
			None => self
				.checkpoints
				.load_checkpoint()
				.await
				.unwrap_or_else(Utc::now),
		};
		let next = Utc::now();

		let records = self
			.store
			.changes_since(&self.root_folder_id, since)
			.await?;

		self.checkpoint = Some(next);
		if let Err(e) = self.checkpoints.save_checkpoint(next).await {
			warn!(?e, "Failed to persist remote checkpoint;");
		}

		trace!(%since, count = records.len(), "Fetched remote changes;");

		let mut emitted = 0;
		for record in records {
			if self.seen.contains(&record.object_id) {
				continue;
			}

			let Some(object) = self.resolve(&record).await else {
				continue;
			};

			debug!(id = %object.id, action = %record.action, "Remote object changed;");

			self.seen.insert(record.object_id);
			self.bus.emit(ObjectChange {
				object,
				action: record.action,
				origin: ChangeOrigin::Remote,
			});
			emitted += 1;
		}

		Ok(emitted)
	}

	/// Current state of the object a record talks about. Removed objects can't be fetched
	/// anymore, the index still knows where they lived.
	async fn resolve(&self, record: &RemoteChangeRecord) -> Option<RemoteObject> {
		match self.store.get(&record.object_id).await {
			Ok(object) => Some(object),
			Err(RemoteError::NotFound(_)) if record.action.is_removal() => {
				match self.index.get_by_id(&record.object_id).await {
					Ok(Some(indexed)) => Some(indexed.into()),
					Ok(None) => {
						debug!(id = %record.object_id, "Removed object was never indexed;");
						None
					}
					Err(e) => {
						warn!(?e, id = %record.object_id, "Failed to read path index;");
						None
					}
				}
			}
			Err(e) => {
				warn!(?e, id = %record.object_id, action = %record.action, "Failed to resolve changed object;");
				None
			}
		}
	}

	/// Polls until `stop` fires.
	#[instrument(skip_all, fields(root = %self.root_folder_id))]
	pub async fn run(mut self, stop: StopSignal) {
		info!("Remote poller started;");

		let mut failures = 0;
		while !stop.is_stopped() {
			let delay = match self.poll_once().await {
				Ok(_) => {
					failures = 0;
					self.interval
				}
				Err(e) => {
					failures += 1;
					let delay = backoff(self.interval, self.max_backoff, failures);
					warn!(?e, %failures, ?delay, "Failed to poll remote changes;");
					delay
				}
			};

			tokio::select! {
				() = stop.wait() => break,
				() = sleep(delay) => {}
			}
		}

		info!("Remote poller stopped;");
	}
}

fn backoff(interval: Duration, max: Duration, failures: u32) -> Duration {
	interval
		.saturating_mul(2_u32.saturating_pow(failures))
		.min(max)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use std::{
		collections::HashMap,
		path::{Path, PathBuf},
		sync::Mutex,
	};

	use sp_cloud_api::{
		MemoryStore, ObjectAction, ObjectMetadata, FULL_PATH_PROPERTY,
	};
	use tokio::{
		sync::broadcast::{error::TryRecvError, Receiver},
		time::Instant,
	};

	use super::*;
	use crate::index::{MemoryPathIndex, PathIndexRecord};

	#[derive(Default)]
	struct MemoryCheckpoints(Mutex<Option<DateTime<Utc>>>);

	#[async_trait]
	impl CheckpointStore for MemoryCheckpoints {
		async fn load_checkpoint(&self) -> Option<DateTime<Utc>> {
			*self.0.lock().unwrap()
		}

		async fn save_checkpoint(&self, checkpoint: DateTime<Utc>) -> Result<(), CoreError> {
			*self.0.lock().unwrap() = Some(checkpoint);
			Ok(())
		}
	}

	struct Fixture {
		store: Arc<MemoryStore>,
		index: Arc<MemoryPathIndex>,
		checkpoints: Arc<MemoryCheckpoints>,
		poller: RemotePoller,
		changes: Receiver<ObjectChange>,
	}

	fn fixture() -> Fixture {
		let store = Arc::new(MemoryStore::new());
		let index = Arc::new(MemoryPathIndex::new());
		let checkpoints = Arc::new(MemoryCheckpoints(Mutex::new(Some(
			Utc::now() - chrono::Duration::seconds(60),
		))));
		let bus = EventBus::default();

		Fixture {
			changes: bus.subscribe(),
			poller: RemotePoller::new(store.clone(), index.clone(), checkpoints.clone(), bus, "root"),
			store,
			index,
			checkpoints,
		}
	}

	fn drain(rx: &mut Receiver<ObjectChange>) -> Vec<ObjectChange> {
		let mut changes = Vec::new();
		loop {
			match rx.try_recv() {
				Ok(change) => changes.push(change),
				Err(TryRecvError::Empty | TryRecvError::Closed) => return changes,
				Err(TryRecvError::Lagged(_)) => panic!("test bus lagged"),
			}
		}
	}

	async fn create(store: &MemoryStore, full_path: &str) -> RemoteObject {
		store
			.create(
				ObjectMetadata {
					name: "b.txt".to_string(),
					parent_id: Some("root".to_string()),
					app_properties: HashMap::from([(
						FULL_PATH_PROPERTY.to_string(),
						full_path.to_string(),
					)]),
					..Default::default()
				},
				Some(b"content".to_vec()),
			)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn one_event_per_object_per_cycle() {
		let mut fixture = fixture();
		let object = create(&fixture.store, "/root/a/b.txt").await;
		fixture
			.store
			.record_change(&object.id, ObjectAction::Update)
			.await;

		assert_eq!(fixture.poller.poll_once().await.unwrap(), 1);

		let changes = drain(&mut fixture.changes);
		assert_eq!(changes.len(), 1);
		assert_eq!(changes[0].object.id, object.id);
		assert_eq!(changes[0].origin, ChangeOrigin::Remote);
		assert_eq!(changes[0].action, ObjectAction::Create);
	}

	#[tokio::test]
	async fn checkpoint_advances() {
		let mut fixture = fixture();
		create(&fixture.store, "/root/first").await;
		assert_eq!(fixture.poller.poll_once().await.unwrap(), 1);

		let checkpoint = fixture.checkpoints.load_checkpoint().await.unwrap();
		assert!(checkpoint <= Utc::now());

		// Already consumed history is not reported again
		assert_eq!(fixture.poller.poll_once().await.unwrap(), 0);

		create(&fixture.store, "/root/second").await;
		assert_eq!(fixture.poller.poll_once().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn removal_resolved_from_index() {
		let mut fixture = fixture();
		let object = create(&fixture.store, "/root/gone.txt").await;
		fixture
			.index
			.upsert(PathIndexRecord::from_object(&object).unwrap())
			.await
			.unwrap();
		fixture.store.delete(&object.id).await.unwrap();

		assert_eq!(fixture.poller.poll_once().await.unwrap(), 1);

		let changes = drain(&mut fixture.changes);
		assert_eq!(changes.len(), 1);
		assert_eq!(changes[0].action, ObjectAction::Delete);
		assert_eq!(
			changes[0].object.full_path(),
			Some(PathBuf::from("/root/gone.txt").as_path())
		);
	}

	#[tokio::test]
	async fn unknown_removal_is_skipped() {
		let mut fixture = fixture();
		let object = create(&fixture.store, "/root/never-indexed").await;
		fixture.store.delete(&object.id).await.unwrap();

		assert_eq!(fixture.poller.poll_once().await.unwrap(), 0);
	}

	#[test]
	fn backoff_is_capped() {
		let interval = Duration::from_secs(5);
		let max = Duration::from_secs(300);

		assert_eq!(backoff(interval, max, 1), Duration::from_secs(10));
		assert_eq!(backoff(interval, max, 3), Duration::from_secs(40));
		assert_eq!(backoff(interval, max, 10), max);
		assert_eq!(backoff(interval, max, u32::MAX), max);
	}

	/// Store whose change history is unreachable
	#[derive(Default)]
	struct OfflineStore {
		attempts: Mutex<Vec<Instant>>,
	}

	fn offline() -> RemoteError {
		RemoteError::Request("offline".to_string())
	}

	#[async_trait]
	impl RemoteStore for OfflineStore {
		async fn create(
			&self,
			_: ObjectMetadata,
			_: Option<Vec<u8>>,
		) -> Result<RemoteObject, RemoteError> {
			Err(offline())
		}

		async fn update(
			&self,
			_: &str,
			_: ObjectMetadata,
			_: Option<Vec<u8>>,
		) -> Result<RemoteObject, RemoteError> {
			Err(offline())
		}

		async fn delete(&self, _: &str) -> Result<(), RemoteError> {
			Err(offline())
		}

		async fn get(&self, _: &str) -> Result<RemoteObject, RemoteError> {
			Err(offline())
		}

		async fn find_by_path(
			&self,
			_: &Path,
			_: Option<&str>,
		) -> Result<Option<RemoteObject>, RemoteError> {
			Err(offline())
		}

		async fn download(&self, _: &str) -> Result<Vec<u8>, RemoteError> {
			Err(offline())
		}

		async fn changes_since(
			&self,
			_: &str,
			_: DateTime<Utc>,
		) -> Result<Vec<RemoteChangeRecord>, RemoteError> {
			self.attempts.lock().unwrap().push(Instant::now());
			Err(offline())
		}
	}

	#[tokio::test(start_paused = true)]
	async fn failures_back_off_until_stopped() {
		let store = Arc::new(OfflineStore::default());
		let poller = RemotePoller::new(
			store.clone(),
			Arc::new(MemoryPathIndex::new()),
			Arc::new(MemoryCheckpoints::default()),
			EventBus::default(),
			"root",
		)
		.with_interval(Duration::from_secs(1), Duration::from_secs(4));

		let stop = StopSignal::new();
		let handle = tokio::spawn(poller.run(stop.clone()));

		sleep(Duration::from_secs(11)).await;
		assert!(stop.stop());
		handle.await.unwrap();

		let attempts = store.attempts.lock().unwrap().clone();
		let gaps = attempts
			.windows(2)
			.map(|pair| pair[1] - pair[0])
			.collect::<Vec<_>>();

		assert_eq!(
			gaps,
			[2, 4, 4].map(Duration::from_secs).to_vec()
		);
	}

	#[tokio::test(start_paused = true)]
	async fn run_emits_until_stopped() {
		let mut fixture = fixture();
		create(&fixture.store, "/root/polled").await;

		let stop = StopSignal::new();
		let handle = tokio::spawn(fixture.poller.run(stop.clone()));

		let change = fixture.changes.recv().await.unwrap();
		assert_eq!(
			change.object.full_path(),
			Some(PathBuf::from("/root/polled").as_path())
		);

		stop.stop();
		handle.await.unwrap();
	}
}
