use std::path::PathBuf;

use serde::Serialize;
use sp_fs_watcher::{IgnoreRules, WatchBackend, WatchRegistry};
use sp_utils::canonicalize;
use tracing::info;

use crate::{config::SyncConfig, CoreError};

/// What got registered below one configured watch root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootSummary {
	pub root: PathBuf,
	pub recursive: bool,
	pub directories: usize,
	pub files: usize,
	pub ignored: usize,
}

/// Builds the ignore predicate from the configured patterns.
pub fn ignore_rules(config: &SyncConfig) -> Result<IgnoreRules, CoreError> {
	IgnoreRules::new(config.ignore.iter().map(|entry| entry.dir.as_str())).map_err(Into::into)
}

/// Registers every configured watch root in `registry`.
pub fn register_roots<B: WatchBackend>(
	registry: &mut WatchRegistry<B>,
	config: &SyncConfig,
) -> Result<Vec<RootSummary>, CoreError> {
	let mut roots = Vec::with_capacity(config.watchers.len());

	for root in &config.watchers {
		let conditions = config.mask_for(root);
		let path = canonicalize(&root.dir)?;

		if root.is_recursive() {
			registry.add_recursive(&path, conditions)?;
		} else {
			registry.add_non_recursive(&path, conditions)?;
		}

		info!(root = %path.display(), recursive = root.is_recursive(), %conditions, "Watching root;");
		roots.push((path, root.is_recursive()));
	}

	Ok(roots
		.into_iter()
		.map(|(root, recursive)| {
			let mut summary = RootSummary {
				root,
				recursive,
				directories: 0,
				files: 0,
				ignored: 0,
			};

			for (_, watched) in registry
				.iter()
				.filter(|(path, _)| path.starts_with(&summary.root))
			{
				if watched.is_dir() {
					summary.directories += 1;
				} else if watched.conditions.is_empty() {
					summary.ignored += 1;
				} else {
					summary.files += 1;
				}
			}

			summary
		})
		.collect())
}

#[cfg(target_os = "linux")]
pub use linux::SyncNode;

#[cfg(target_os = "linux")]
mod linux {
	use std::sync::Arc;

	use sp_cloud_api::{ObjectChange, RemoteStore};
	use sp_fs_watcher::{open_inotify, InotifyBackend, StopSignal, WatchPipeline, WatchRegistry};
	use tokio::{sync::broadcast, task::JoinHandle};
	use tracing::{debug, error, info, instrument};

	use super::{ignore_rules, register_roots, RootSummary};
	use crate::{
		config::SyncConfig,
		events::EventBus,
		index::PathIndex,
		index_updater::IndexUpdater,
		materializer::Materializer,
		poller::{CheckpointStore, RemotePoller},
		reconciler::SyncReconciler,
		remote::RemoteClient,
		CoreError,
	};

	/// Every running part of the sync engine for one configuration.
	pub struct SyncNode {
		pipeline: WatchPipeline<InotifyBackend, SyncReconciler>,
		stop: StopSignal,
		bus: EventBus,
		tasks: Vec<(&'static str, JoinHandle<()>)>,
		roots: Vec<RootSummary>,
	}

	impl SyncNode {
		#[instrument(skip_all, err)]
		pub async fn start(
			config: &SyncConfig,
			store: Arc<dyn RemoteStore>,
			index: Arc<dyn PathIndex>,
			checkpoints: Arc<dyn CheckpointStore>,
		) -> Result<Self, CoreError> {
			let root_folder_id = config.remote.root_folder_id.clone();
			if root_folder_id.is_empty() {
				return Err(CoreError::MissingRemoteRoot);
			}

			let (backend, source) = open_inotify()?;
			let mut registry = WatchRegistry::new(backend, Arc::new(ignore_rules(config)?));
			let roots = register_roots(&mut registry, config)?;

			let bus = EventBus::default();
			let client = Arc::new(RemoteClient::new(
				Arc::clone(&store),
				Arc::clone(&index),
				bus.clone(),
				root_folder_id.clone(),
			)?);

			let stop = StopSignal::new();

			// Subscribers first, so they see everything the poller emits
			let tasks = vec![
				(
					"materializer",
					tokio::spawn(
						Materializer::new(Arc::clone(&client)).run(bus.subscribe(), stop.clone()),
					),
				),
				(
					"index_updater",
					tokio::spawn(
						IndexUpdater::new(Arc::clone(&index)).run(bus.subscribe(), stop.clone()),
					),
				),
				(
					"poller",
					tokio::spawn(
						RemotePoller::new(store, Arc::clone(&index), checkpoints, bus.clone(), root_folder_id)
							.with_interval(config.remote.poll_interval(), config.remote.max_backoff())
							.run(stop.clone()),
					),
				),
			];

			let pipeline = WatchPipeline::spawn(source, registry, SyncReconciler::new(index, client));

			info!(roots = roots.len(), "Sync node started;");

			Ok(Self {
				pipeline,
				stop,
				bus,
				tasks,
				roots,
			})
		}

		#[must_use]
		pub fn roots(&self) -> &[RootSummary] {
			&self.roots
		}

		/// Every object change, local and remote
		#[must_use]
		pub fn subscribe(&self) -> broadcast::Receiver<ObjectChange> {
			self.bus.subscribe()
		}

		/// Stops every task and waits for them.
		pub async fn shutdown(self) -> Result<(), CoreError> {
			self.pipeline.stop();
			self.stop.stop();

			for (name, task) in self.tasks {
				if let Err(e) = task.await {
					error!(?e, %name, "Sync task panicked;");
				}
			}

			let (registry, reconciler) = self.pipeline.join().await?;
			debug!(
				watches = registry.watch_count(),
				pending = reconciler.pending_len(),
				"Watch pipeline joined;"
			);

			info!("Sync node stopped;");

			Ok(())
		}
	}
}
