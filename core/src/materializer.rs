use std::{io, path::Path, sync::Arc};

use sp_cloud_api::{ChangeOrigin, ObjectChange};
use sp_fs_watcher::StopSignal;
use sp_utils::{canonicalize, FileIOError};
use tokio::{fs, sync::broadcast};
use tracing::{debug, info, instrument, trace, warn};

use crate::{events::next_change, remote::RemoteClient, CoreError};

/// Applies remote-origin changes to the local tree.
pub struct Materializer {
	client: Arc<RemoteClient>,
}

impl Materializer {
	pub fn new(client: Arc<RemoteClient>) -> Self {
		Self { client }
	}

	pub async fn apply(&self, change: &ObjectChange) -> Result<(), CoreError> {
		if change.origin == ChangeOrigin::Local {
			trace!(id = %change.object.id, "Skipping local change;");
			return Ok(());
		}

		let object = &change.object;
		let full_path = object
			.full_path()
			.ok_or_else(|| CoreError::MissingFullPath(object.id.clone()))?;
		let path = canonicalize(full_path)?;

		if change.action.is_removal() {
			return remove_local(&path).await;
		}

		if object.is_dir() {
			debug!(path = %path.display(), "Creating local directory;");
			return fs::create_dir_all(&path)
				.await
				.map_err(|e| FileIOError::from((&path, e, "Failed to create directory")).into());
		}

		if self
			.client
			.download_to_local(&object.id, &path, object.mode())
			.await?
		{
			debug!(id = %object.id, path = %path.display(), "Downloaded remote file;");
		}

		Ok(())
	}

	#[instrument(skip_all)]
	pub async fn run(self, mut changes: broadcast::Receiver<ObjectChange>, stop: StopSignal) {
		loop {
			let change = tokio::select! {
				() = stop.wait() => break,
				change = next_change(&mut changes, "materializer") => change,
			};
			let Some(change) = change else {
				break;
			};

			if let Err(e) = self.apply(&change).await {
				warn!(?e, id = %change.object.id, action = %change.action, "Failed to materialize change;");
			}
		}

		info!("Materializer stopped;");
	}
}

async fn remove_local(path: &Path) -> Result<(), CoreError> {
	let result = match fs::symlink_metadata(path).await {
		Ok(metadata) if metadata.is_dir() => fs::remove_dir(path).await,
		Ok(_) => fs::remove_file(path).await,
		Err(e) => Err(e),
	};

	match result {
		Ok(()) => {
			debug!(path = %path.display(), "Removed local path;");
			Ok(())
		}
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(FileIOError::from((path, e, "Failed to remove local path")).into()),
	}
}
