//! Outbound side of the sync engine: mirrors local paths into the remote store.
//!
//! Remote objects carry the canonical local path they mirror in their `fullPath`
//! property, and folders are created on demand for every ancestor of an uploaded file
//! below the configured root folder.

use std::{
	collections::HashMap,
	fs::Metadata,
	io,
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sp_cloud_api::{
	ChangeOrigin, Error as RemoteError, ObjectAction, ObjectChange, ObjectMetadata, RemoteObject,
	RemoteStore, CHANGED_AT_PROPERTY, FULL_PATH_PROPERTY, MODE_PROPERTY,
};
use sp_utils::{canonicalize, FileIOError};
use tokio::fs;
use tracing::{debug, instrument, trace, warn};

use crate::{events::EventBus, index::PathIndex, CoreError};

/// Where the reconciler sends its decisions
#[async_trait]
pub trait SyncTarget: Send + Sync + 'static {
	async fn upload(&self, path: &Path) -> Result<(), CoreError>;

	async fn remove(&self, remote_id: &str) -> Result<(), CoreError>;
}

pub struct RemoteClient {
	store: Arc<dyn RemoteStore>,
	index: Arc<dyn PathIndex>,
	bus: EventBus,
	root_folder_id: String,
}

impl RemoteClient {
	pub fn new(
		store: Arc<dyn RemoteStore>,
		index: Arc<dyn PathIndex>,
		bus: EventBus,
		root_folder_id: impl Into<String>,
	) -> Result<Self, CoreError> {
		let root_folder_id = root_folder_id.into();
		if root_folder_id.is_empty() {
			return Err(CoreError::MissingRemoteRoot);
		}

		Ok(Self {
			store,
			index,
			bus,
			root_folder_id,
		})
	}

	fn publish(&self, object: &RemoteObject, action: ObjectAction) {
		trace!(id = %object.id, %action, "Publishing local change;");
		self.bus.emit(ObjectChange {
			object: object.clone(),
			action,
			origin: ChangeOrigin::Local,
		});
	}

	/// Uploads `path`, updating the object already mirroring it or creating a new one.
	#[instrument(skip(self), err)]
	pub async fn send(&self, path: &Path) -> Result<RemoteObject, CoreError> {
		let path = canonicalize(path)?;
		let metadata = fs::metadata(&path)
			.await
			.map_err(|e| FileIOError::from((&path, e, "Failed to stat file to upload")))?;

		if metadata.is_dir() {
			return self.create_tree(&path).await.map(|(_, folder)| folder);
		}

		let content = fs::read(&path)
			.await
			.map_err(|e| FileIOError::from((&path, e, "Failed to read file to upload")))?;

		let parent = path.parent().unwrap_or(&path);
		let (parent_id, _) = self.create_tree(parent).await?;

		let object_metadata = ObjectMetadata {
			name: file_name(&path),
			parent_id: Some(parent_id.clone()),
			mime_type: None,
			modified_time: modified_time(&metadata),
			app_properties: properties(&path, &metadata),
		};

		// Matched by full path under any parent
		let object = match self.find_existing(&path, None).await? {
			Some(existing) => {
				let object = self
					.store
					.update(&existing.id, object_metadata, Some(content))
					.await?;
				self.publish(&object, ObjectAction::Update);
				object
			}
			None => {
				let object = self.store.create(object_metadata, Some(content)).await?;
				self.publish(&object, ObjectAction::Create);
				object
			}
		};

		debug!(id = %object.id, "Uploaded file;");

		Ok(object)
	}

	/// Deletes the remote object `id`.
	#[instrument(skip(self), err)]
	pub async fn remove(&self, id: &str) -> Result<(), CoreError> {
		let object = self.store.get(id).await?;
		self.store.delete(id).await?;
		self.publish(&object, ObjectAction::Delete);

		Ok(())
	}

	/// Writes the content of `id` to `path`, creating missing parent directories and
	/// applying `mode` when given. A file already holding the same content is left
	/// untouched, returns whether it was written.
	#[instrument(skip(self), err)]
	pub async fn download_to_local(
		&self,
		id: &str,
		path: &Path,
		mode: Option<u32>,
	) -> Result<bool, CoreError> {
		let content = self.store.download(id).await?;

		let written = match fs::read(path).await {
			Ok(current) if current == content => {
				trace!(path = %path.display(), "Local content already up to date;");
				false
			}
			Ok(_) => true,
			Err(e) if e.kind() == io::ErrorKind::NotFound => true,
			Err(e) => {
				return Err(FileIOError::from((path, e, "Failed to read local file")).into());
			}
		};

		if written {
			if let Some(parent) = path.parent() {
				fs::create_dir_all(parent).await.map_err(|e| {
					FileIOError::from((parent, e, "Failed to create parent directories"))
				})?;
			}

			fs::write(path, content)
				.await
				.map_err(|e| FileIOError::from((path, e, "Failed to write downloaded file")))?;
		}

		if let Some(mode) = mode {
			set_mode(path, mode).await?;
		}

		Ok(written)
	}

	/// Object mirroring `path`, from the index first and then from the remote store.
	async fn find_existing(
		&self,
		path: &Path,
		parent_id: Option<&str>,
	) -> Result<Option<RemoteObject>, CoreError> {
		let known = match self.index.get_id_by_path(path).await {
			Ok(known) => known,
			Err(e) => {
				warn!(?e, path = %path.display(), "Failed to look up path index;");
				None
			}
		};

		if let Some(id) = known {
			match self.store.get(&id).await {
				Ok(object) => return Ok(Some(object)),
				// Stale index entry, fall back to the remote lookup
				Err(RemoteError::NotFound(_)) => {
					debug!(%id, path = %path.display(), "Indexed object is gone remotely;");
				}
				Err(e) => return Err(e.into()),
			}
		}

		let found = self.store.find_by_path(path, parent_id).await?;
		if let Some(object) = &found {
			self.publish(object, ObjectAction::Lookup);
		}

		Ok(found)
	}

	/// Makes sure a folder exists for `dir` and each of its ancestors, returning the id
	/// and the object of the deepest one. The filesystem root maps to the root folder.
	async fn create_tree(&self, dir: &Path) -> Result<(String, RemoteObject), CoreError> {
		let mut parent_id = self.root_folder_id.clone();
		let mut folder = RemoteObject {
			id: parent_id.clone(),
			..Default::default()
		};

		let mut current = PathBuf::new();
		for component in dir.components() {
			current.push(component);
			if current.parent().is_none() {
				continue;
			}

			folder = match self.find_existing(&current, Some(&parent_id)).await? {
				Some(existing) => existing,
				None => {
					let created = self
						.store
						.create(
							ObjectMetadata::folder(file_name(&current), &parent_id, &current),
							None,
						)
						.await?;
					debug!(id = %created.id, path = %current.display(), "Created remote folder;");
					self.publish(&created, ObjectAction::Create);
					created
				}
			};
			parent_id.clone_from(&folder.id);
		}

		Ok((parent_id, folder))
	}
}

#[async_trait]
impl SyncTarget for RemoteClient {
	async fn upload(&self, path: &Path) -> Result<(), CoreError> {
		self.send(path).await.map(|_| ())
	}

	async fn remove(&self, remote_id: &str) -> Result<(), CoreError> {
		Self::remove(self, remote_id).await
	}
}

fn file_name(path: &Path) -> String {
	path.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_default()
}

fn modified_time(metadata: &Metadata) -> Option<DateTime<Utc>> {
	metadata.modified().ok().map(DateTime::<Utc>::from)
}

fn properties(path: &Path, metadata: &Metadata) -> HashMap<String, String> {
	let mut properties = HashMap::from([
		(
			FULL_PATH_PROPERTY.to_string(),
			path.to_string_lossy().into_owned(),
		),
		(MODE_PROPERTY.to_string(), format!("{:04o}", permission_bits(metadata))),
	]);

	if let Some(changed_at) = modified_time(metadata) {
		properties.insert(CHANGED_AT_PROPERTY.to_string(), changed_at.to_rfc3339());
	}

	properties
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
	use std::os::unix::fs::PermissionsExt;

	metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
	if metadata.permissions().readonly() {
		0o444
	} else {
		0o644
	}
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), FileIOError> {
	use std::{fs::Permissions, os::unix::fs::PermissionsExt};

	fs::set_permissions(path, Permissions::from_mode(mode))
		.await
		.map_err(|e| FileIOError::from((path, e, "Failed to apply file mode")))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), FileIOError> {
	Ok(())
}
