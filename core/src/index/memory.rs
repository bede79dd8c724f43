use std::{collections::HashMap, path::Path, path::PathBuf};

use async_trait::async_trait;
use sp_utils::canonicalize;
use tokio::sync::RwLock;

use super::{IndexError, PathIndex, PathIndexRecord};

#[derive(Debug, Default)]
struct Maps {
	by_id: HashMap<String, PathIndexRecord>,
	by_path: HashMap<PathBuf, String>,
}

/// Non persistent index, for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryPathIndex {
	maps: RwLock<Maps>,
}

impl MemoryPathIndex {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.maps.read().await.by_id.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.maps.read().await.by_id.is_empty()
	}
}

#[async_trait]
impl PathIndex for MemoryPathIndex {
	async fn upsert(&self, mut record: PathIndexRecord) -> Result<(), IndexError> {
		record.full_path = canonicalize(&record.full_path)?;

		let mut maps = self.maps.write().await;

		if let Some(previous) = maps.by_id.remove(&record.id) {
			maps.by_path.remove(&previous.full_path);
		}
		if let Some(other_id) = maps
			.by_path
			.insert(record.full_path.clone(), record.id.clone())
			.filter(|other_id| *other_id != record.id)
		{
			maps.by_id.remove(&other_id);
		}
		maps.by_id.insert(record.id.clone(), record);

		Ok(())
	}

	async fn delete(&self, id: &str) -> Result<(), IndexError> {
		let mut maps = self.maps.write().await;

		if let Some(record) = maps.by_id.remove(id) {
			maps.by_path.remove(&record.full_path);
		}

		Ok(())
	}

	async fn get_id_by_path(&self, path: &Path) -> Result<Option<String>, IndexError> {
		let path = canonicalize(path)?;

		Ok(self.maps.read().await.by_path.get(&path).cloned())
	}

	async fn get_by_id(&self, id: &str) -> Result<Option<PathIndexRecord>, IndexError> {
		Ok(self.maps.read().await.by_id.get(id).cloned())
	}
}
