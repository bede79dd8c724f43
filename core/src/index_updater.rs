use std::sync::Arc;

use sp_cloud_api::ObjectChange;
use sp_fs_watcher::StopSignal;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
	events::next_change,
	index::{IndexError, PathIndex, PathIndexRecord},
};

/// Keeps the path index in step with every object change, local or remote.
pub struct IndexUpdater {
	index: Arc<dyn PathIndex>,
}

impl IndexUpdater {
	pub fn new(index: Arc<dyn PathIndex>) -> Self {
		Self { index }
	}

	pub async fn apply(&self, change: &ObjectChange) -> Result<(), IndexError> {
		let object = &change.object;

		if change.action.is_removal() {
			debug!(id = %object.id, "Removing path index record;");
			return self.index.delete(&object.id).await;
		}

		match PathIndexRecord::from_object(object) {
			Some(record) => {
				trace!(id = %object.id, action = %change.action, "Updating path index record;");
				self.index.upsert(record).await
			}
			None => {
				debug!(id = %object.id, "Object has no full path, not indexed;");
				Ok(())
			}
		}
	}

	#[instrument(skip_all)]
	pub async fn run(self, mut changes: broadcast::Receiver<ObjectChange>, stop: StopSignal) {
		loop {
			let change = tokio::select! {
				() = stop.wait() => break,
				change = next_change(&mut changes, "index_updater") => change,
			};
			let Some(change) = change else {
				break;
			};

			if let Err(e) = self.apply(&change).await {
				warn!(?e, id = %change.object.id, "Failed to update path index;");
			}
		}

		info!("Index updater stopped;");
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use std::{collections::HashMap, path::Path};

	use sp_cloud_api::{ChangeOrigin, ObjectAction, RemoteObject, FULL_PATH_PROPERTY};
	use tempfile::tempdir;

	use super::*;
	use crate::index::MemoryPathIndex;

	fn change(id: &str, full_path: Option<&Path>, action: ObjectAction) -> ObjectChange {
		ObjectChange {
			object: RemoteObject {
				id: id.to_string(),
				name: "n".to_string(),
				app_properties: full_path
					.map(|path| {
						HashMap::from([(
							FULL_PATH_PROPERTY.to_string(),
							path.to_string_lossy().into_owned(),
						)])
					})
					.unwrap_or_default(),
				..Default::default()
			},
			action,
			origin: ChangeOrigin::Remote,
		}
	}

	#[tokio::test]
	async fn upserts_then_deletes() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("f");
		let index = Arc::new(MemoryPathIndex::new());
		let updater = IndexUpdater::new(index.clone());

		updater
			.apply(&change("1", Some(&path), ObjectAction::Create))
			.await
			.unwrap();
		assert_eq!(
			index.get_id_by_path(&path).await.unwrap().as_deref(),
			Some("1")
		);

		updater
			.apply(&change("1", None, ObjectAction::Delete))
			.await
			.unwrap();
		assert!(index.is_empty().await);
	}

	#[tokio::test]
	async fn skips_objects_without_full_path() {
		let index = Arc::new(MemoryPathIndex::new());

		IndexUpdater::new(index.clone())
			.apply(&change("1", None, ObjectAction::Update))
			.await
			.unwrap();

		assert!(index.is_empty().await);
	}
}
