//! Remote object store contract consumed by the sync engine, with an HTTP implementation
//! for Google Drive and an in-process one.

pub mod auth;
pub mod drive;
mod memory;
mod object;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use drive::DriveStore;
pub use memory::MemoryStore;
pub use object::{
	ChangeOrigin, ObjectAction, ObjectChange, ObjectMetadata, RemoteChangeRecord, RemoteObject,
	CHANGED_AT_PROPERTY, FOLDER_MIME_TYPE, FULL_PATH_PROPERTY, MODE_PROPERTY,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("remote object not found: <id='{0}'>")]
	NotFound(String),
	#[error("authentication required")]
	Unauthenticated,
	#[error("{0}")]
	Request(String),
}

impl From<reqwest::Error> for Error {
	fn from(e: reqwest::Error) -> Self {
		Self::Request(e.to_string())
	}
}

/// Operations the sync engine needs from a remote object store.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
	async fn create(
		&self,
		metadata: ObjectMetadata,
		content: Option<Vec<u8>>,
	) -> Result<RemoteObject, Error>;

	async fn update(
		&self,
		id: &str,
		metadata: ObjectMetadata,
		content: Option<Vec<u8>>,
	) -> Result<RemoteObject, Error>;

	async fn delete(&self, id: &str) -> Result<(), Error>;

	async fn get(&self, id: &str) -> Result<RemoteObject, Error>;

	/// First object whose full path property is `full_path`, optionally restricted to
	/// children of `parent_id`
	async fn find_by_path(
		&self,
		full_path: &Path,
		parent_id: Option<&str>,
	) -> Result<Option<RemoteObject>, Error>;

	async fn download(&self, id: &str) -> Result<Vec<u8>, Error>;

	/// Change history of everything below `root_id` at or after `since`, oldest first
	async fn changes_since(
		&self,
		root_id: &str,
		since: DateTime<Utc>,
	) -> Result<Vec<RemoteChangeRecord>, Error>;
}
