//! Coalesces bursts of local events into a single sync action per path.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use sp_fs_watcher::{Conditions, RawEvent, WatchEvent, WatchEventHandler};
use tracing::{debug, error, info, trace, warn};

use crate::{index::PathIndex, remote::SyncTarget};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
	Upload(PathBuf),
	Remove(String),
}

/// Action owed for a burst whose merged conditions are `conditions`.
///
/// Removal wins over upload when both apply. A removal needs a known remote id, an
/// upload only needs the path.
#[must_use]
pub fn decide(conditions: Conditions, remote_id: Option<&str>, path: &Path) -> Option<SyncAction> {
	if !conditions.is_terminal() {
		return None;
	}

	if conditions.intersects(Conditions::REMOVAL) {
		remote_id.map(|id| SyncAction::Remove(id.to_string()))
	} else if conditions.contains(Conditions::CLOSE_WRITE) {
		Some(SyncAction::Upload(path.to_path_buf()))
	} else {
		None
	}
}

#[derive(Debug)]
struct PendingSyncState {
	conditions: Conditions,
	remote_id: Option<String>,
}

pub struct SyncReconciler {
	index: Arc<dyn PathIndex>,
	target: Arc<dyn SyncTarget>,
	pending: HashMap<PathBuf, PendingSyncState>,
}

impl SyncReconciler {
	pub fn new(index: Arc<dyn PathIndex>, target: Arc<dyn SyncTarget>) -> Self {
		Self {
			index,
			target,
			pending: HashMap::new(),
		}
	}

	/// Paths with a burst still waiting for a terminal condition
	#[must_use]
	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}

	async fn resolve_id(&self, path: &Path) -> Option<String> {
		match self.index.get_id_by_path(path).await {
			Ok(id) => id,
			Err(e) => {
				warn!(?e, path = %path.display(), "Failed to resolve remote id, treating as unknown;");
				None
			}
		}
	}

	async fn reconcile(&mut self, event: RawEvent) {
		let Some(path) = event.path else {
			return;
		};

		// Only directory creations get this far and they never lead to an action
		if event.conditions.is_dir() {
			trace!(path = %path.display(), "Skipping directory event;");
			return;
		}

		let remote_id = match self.pending.get(&path) {
			Some(state) => state.remote_id.clone(),
			None => self.resolve_id(&path).await,
		};

		let state = self
			.pending
			.entry(path.clone())
			.or_insert_with(|| PendingSyncState {
				conditions: Conditions::empty(),
				remote_id,
			});
		state.conditions |= event.conditions;

		trace!(path = %path.display(), conditions = %state.conditions, "Merged event;");

		if !state.conditions.is_terminal() {
			return;
		}

		let Some(state) = self.pending.remove(&path) else {
			return;
		};

		match decide(state.conditions, state.remote_id.as_deref(), &path) {
			Some(action) => self.dispatch(action).await,
			None => debug!(
				path = %path.display(),
				conditions = %state.conditions,
				"Burst ended without a sync action;",
			),
		}
	}

	async fn dispatch(&self, action: SyncAction) {
		info!(?action, "Dispatching sync action;");

		let result = match &action {
			SyncAction::Upload(path) => self.target.upload(path).await,
			SyncAction::Remove(id) => self.target.remove(id).await,
		};

		// The object stays unsynced until the path changes again
		if let Err(e) = result {
			error!(?e, ?action, "Failed to apply sync action;");
		}
	}
}

#[async_trait]
impl WatchEventHandler for SyncReconciler {
	async fn handle_event(&mut self, event: WatchEvent) {
		match event {
			WatchEvent::Fs(event) => self.reconcile(event).await,
			WatchEvent::EndOfStream => {
				info!(
					discarded = self.pending.len(),
					"Watch stream ended, discarding pending bursts;"
				);
				self.pending.clear();
			}
		}
	}
}
