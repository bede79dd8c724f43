use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Error, ObjectAction, ObjectMetadata, RemoteChangeRecord, RemoteObject, RemoteStore};

#[derive(Debug, Default)]
struct State {
	objects: HashMap<String, (RemoteObject, Vec<u8>)>,
	/// Change history, with the ancestors each object had when the change happened
	history: Vec<(RemoteChangeRecord, Vec<String>)>,
}

impl State {
	fn ancestors(&self, id: &str) -> Vec<String> {
		let mut ancestors = Vec::new();
		let mut current = self
			.objects
			.get(id)
			.and_then(|(object, _)| object.parent_id().map(ToString::to_string));

		while let Some(parent) = current {
			// Cycles can't be built through this store, the bound only guards corrupt input
			if ancestors.contains(&parent) || ancestors.len() > 256 {
				break;
			}
			current = self
				.objects
				.get(&parent)
				.and_then(|(object, _)| object.parent_id().map(ToString::to_string));
			ancestors.push(parent);
		}

		ancestors
	}

	fn log(&mut self, object_id: &str, action: ObjectAction) {
		let ancestors = self.ancestors(object_id);
		self.history.push((
			RemoteChangeRecord {
				object_id: object_id.to_string(),
				action,
				time: Utc::now(),
			},
			ancestors,
		));
	}
}

/// Remote store kept in memory, every mutation shows up in its change history.
#[derive(Debug, Default)]
pub struct MemoryStore {
	state: RwLock<State>,
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends an entry to the change history without touching the object, like an edit
	/// made by another client that the history reports more than once.
	pub async fn record_change(&self, object_id: &str, action: ObjectAction) {
		self.state.write().await.log(object_id, action);
	}

	pub async fn len(&self) -> usize {
		self.state.read().await.objects.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.state.read().await.objects.is_empty()
	}

	pub async fn objects(&self) -> Vec<RemoteObject> {
		self.state
			.read()
			.await
			.objects
			.values()
			.map(|(object, _)| object.clone())
			.collect()
	}
}

#[async_trait]
impl RemoteStore for MemoryStore {
	async fn create(
		&self,
		metadata: ObjectMetadata,
		content: Option<Vec<u8>>,
	) -> Result<RemoteObject, Error> {
		let now = Utc::now();
		let object = RemoteObject {
			id: Uuid::new_v4().to_string(),
			name: metadata.name,
			mime_type: metadata
				.mime_type
				.unwrap_or_else(|| "application/octet-stream".to_string()),
			parents: metadata.parent_id.into_iter().collect(),
			created_time: Some(now),
			modified_time: Some(metadata.modified_time.unwrap_or(now)),
			app_properties: metadata.app_properties,
		};

		let mut state = self.state.write().await;
		state
			.objects
			.insert(object.id.clone(), (object.clone(), content.unwrap_or_default()));
		state.log(&object.id, ObjectAction::Create);

		Ok(object)
	}

	async fn update(
		&self,
		id: &str,
		metadata: ObjectMetadata,
		content: Option<Vec<u8>>,
	) -> Result<RemoteObject, Error> {
		let mut state = self.state.write().await;

		let (object, stored) = state
			.objects
			.get_mut(id)
			.ok_or_else(|| Error::NotFound(id.to_string()))?;

		object.name = metadata.name;
		if let Some(mime_type) = metadata.mime_type {
			object.mime_type = mime_type;
		}
		object.modified_time = Some(metadata.modified_time.unwrap_or_else(Utc::now));
		object.app_properties.extend(metadata.app_properties);
		if let Some(content) = content {
			*stored = content;
		}

		let object = object.clone();
		state.log(id, ObjectAction::Update);

		Ok(object)
	}

	async fn delete(&self, id: &str) -> Result<(), Error> {
		let mut state = self.state.write().await;

		// Logged first, so the history still knows where the object lived
		state.log(id, ObjectAction::Delete);
		state
			.objects
			.remove(id)
			.map(|_| ())
			.ok_or_else(|| Error::NotFound(id.to_string()))
	}

	async fn get(&self, id: &str) -> Result<RemoteObject, Error> {
		self.state
			.read()
			.await
			.objects
			.get(id)
			.map(|(object, _)| object.clone())
			.ok_or_else(|| Error::NotFound(id.to_string()))
	}

	async fn find_by_path(
		&self,
		full_path: &Path,
		parent_id: Option<&str>,
	) -> Result<Option<RemoteObject>, Error> {
		Ok(self
			.state
			.read()
			.await
			.objects
			.values()
			.map(|(object, _)| object)
			.find(|object| {
				object.full_path() == Some(full_path)
					&& parent_id.map_or(true, |parent| object.parent_id() == Some(parent))
			})
			.cloned())
	}

	async fn download(&self, id: &str) -> Result<Vec<u8>, Error> {
		self.state
			.read()
			.await
			.objects
			.get(id)
			.map(|(_, content)| content.clone())
			.ok_or_else(|| Error::NotFound(id.to_string()))
	}

	async fn changes_since(
		&self,
		root_id: &str,
		since: DateTime<Utc>,
	) -> Result<Vec<RemoteChangeRecord>, Error> {
		Ok(self
			.state
			.read()
			.await
			.history
			.iter()
			.filter(|(record, ancestors)| {
				record.time >= since && ancestors.iter().any(|ancestor| ancestor == root_id)
			})
			.map(|(record, _)| record.clone())
			.collect())
	}
}
