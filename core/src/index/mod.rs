//! Path to remote identifier index.
//!
//! Full paths are the join key between the local tree and the remote identifier space,
//! engines canonicalize them on every write and lookup.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sp_cloud_api::{RemoteObject, FULL_PATH_PROPERTY};
use sp_utils::path::CanonicalPathError;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryPathIndex;
pub use sqlite::SqlitePathIndex;

#[derive(Error, Debug)]
pub enum IndexError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error(transparent)]
	CanonicalPath(#[from] CanonicalPathError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathIndexRecord {
	pub id: String,
	pub name: String,
	pub mime_type: String,
	pub created_at: Option<DateTime<Utc>>,
	pub changed_at: Option<DateTime<Utc>>,
	pub is_dir: bool,
	pub parent: Option<String>,
	pub full_path: PathBuf,
}

impl PathIndexRecord {
	/// Record mirroring `object`, `None` when it carries no full path
	#[must_use]
	pub fn from_object(object: &RemoteObject) -> Option<Self> {
		object.full_path().map(|full_path| Self {
			id: object.id.clone(),
			name: object.name.clone(),
			mime_type: object.mime_type.clone(),
			created_at: object.created_time,
			changed_at: object.modified_time,
			is_dir: object.is_dir(),
			parent: object.parent_id().map(ToString::to_string),
			full_path: full_path.to_path_buf(),
		})
	}
}

/// Object rebuilt from what the index remembers, for objects the remote no longer returns
impl From<PathIndexRecord> for RemoteObject {
	fn from(record: PathIndexRecord) -> Self {
		Self {
			id: record.id,
			name: record.name,
			mime_type: record.mime_type,
			parents: record.parent.into_iter().collect(),
			created_time: record.created_at,
			modified_time: record.changed_at,
			app_properties: HashMap::from([(
				FULL_PATH_PROPERTY.to_string(),
				record.full_path.to_string_lossy().into_owned(),
			)]),
		}
	}
}

#[async_trait]
pub trait PathIndex: Send + Sync + 'static {
	/// Inserts or replaces the record with the same id; any other record holding the same
	/// full path is dropped, a path maps to a single identifier.
	async fn upsert(&self, record: PathIndexRecord) -> Result<(), IndexError>;

	async fn delete(&self, id: &str) -> Result<(), IndexError>;

	/// `None` means "not known remotely yet", not an error
	async fn get_id_by_path(&self, path: &Path) -> Result<Option<String>, IndexError>;

	async fn get_by_id(&self, id: &str) -> Result<Option<PathIndexRecord>, IndexError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use std::fs;

	use sqlx::sqlite::SqlitePoolOptions;
	use tempfile::tempdir;

	use super::*;

	fn record(id: &str, full_path: &Path) -> PathIndexRecord {
		PathIndexRecord {
			id: id.to_string(),
			name: full_path
				.file_name()
				.map(|name| name.to_string_lossy().into_owned())
				.unwrap_or_default(),
			mime_type: "text/plain".to_string(),
			created_at: Some(Utc::now()),
			changed_at: None,
			is_dir: false,
			parent: Some("parent".to_string()),
			full_path: full_path.to_path_buf(),
		}
	}

	async fn exercise(index: &impl PathIndex) {
		let dir = tempdir().unwrap();
		let real = dir.path().join("real");
		fs::create_dir(&real).unwrap();
		let link = dir.path().join("link");
		#[cfg(unix)]
		std::os::unix::fs::symlink(&real, &link).unwrap();
		#[cfg(not(unix))]
		fs::create_dir(&link).unwrap();

		let lookup_path = if cfg!(unix) { link.join("a.txt") } else { real.join("a.txt") };

		// Missing path is not an error
		assert_eq!(index.get_id_by_path(&real.join("a.txt")).await.unwrap(), None);

		// Written through one spelling, found through another
		index.upsert(record("id-1", &real.join("a.txt"))).await.unwrap();
		assert_eq!(
			index.get_id_by_path(&lookup_path).await.unwrap().as_deref(),
			Some("id-1")
		);

		let stored = index.get_by_id("id-1").await.unwrap().unwrap();
		assert_eq!(stored.full_path, real.canonicalize().unwrap().join("a.txt"));
		assert_eq!(stored.parent.as_deref(), Some("parent"));

		// Same id, same path: still one record
		index.upsert(record("id-1", &real.join("a.txt"))).await.unwrap();
		assert_eq!(
			index.get_id_by_path(&real.join("a.txt")).await.unwrap().as_deref(),
			Some("id-1")
		);

		// Another id taking the path replaces the old mapping
		index.upsert(record("id-2", &real.join("a.txt"))).await.unwrap();
		assert_eq!(
			index.get_id_by_path(&real.join("a.txt")).await.unwrap().as_deref(),
			Some("id-2")
		);
		assert_eq!(index.get_by_id("id-1").await.unwrap(), None);

		index.delete("id-2").await.unwrap();
		index.delete("id-2").await.unwrap();
		assert_eq!(index.get_id_by_path(&real.join("a.txt")).await.unwrap(), None);
	}

	#[tokio::test]
	async fn memory_index_contract() {
		exercise(&MemoryPathIndex::new()).await;
	}

	#[tokio::test]
	async fn sqlite_index_contract() {
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect("sqlite::memory:")
			.await
			.unwrap();

		exercise(&SqlitePathIndex::with_pool(pool).await.unwrap()).await;
	}

	#[tokio::test]
	async fn sqlite_index_persists() {
		let dir = tempdir().unwrap();
		let db = dir.path().join("index.db");
		let file = dir.path().join("b.txt");

		SqlitePathIndex::open(&db)
			.await
			.unwrap()
			.upsert(record("persisted", &file))
			.await
			.unwrap();

		let reopened = SqlitePathIndex::open(&db).await.unwrap();
		assert_eq!(
			reopened.get_id_by_path(&file).await.unwrap().as_deref(),
			Some("persisted")
		);
	}

	#[test]
	fn records_need_a_full_path() {
		let object = RemoteObject {
			id: "x".into(),
			..Default::default()
		};

		assert_eq!(PathIndexRecord::from_object(&object), None);
	}
}
