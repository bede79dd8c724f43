#![cfg(target_os = "linux")]
#![allow(clippy::unwrap_used, clippy::panic)]

use std::{collections::HashMap, future::Future, path::Path, sync::Arc, time::Duration};

use chrono::Utc;
use sp_cloud_api::{
	MemoryStore, ObjectMetadata, RemoteObject, RemoteStore, FULL_PATH_PROPERTY,
};
use sp_core::{config::WatchRoot, ConfigStore, MemoryPathIndex, PathIndex, SyncNode};
use sp_utils::canonicalize;
use tempfile::tempdir;
use tokio::{fs, time::sleep};
use tracing_test::traced_test;

async fn eventually<F, Fut>(mut check: F) -> bool
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	for _ in 0..100 {
		if check().await {
			return true;
		}
		sleep(Duration::from_millis(100)).await;
	}

	false
}

async fn object_at(store: &MemoryStore, path: &Path) -> Option<RemoteObject> {
	store
		.objects()
		.await
		.into_iter()
		.find(|object| object.full_path() == Some(path))
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn local_and_remote_changes_meet() {
	let config_dir = tempdir().unwrap();
	let watched = tempdir().unwrap();
	let watched_root = canonicalize(watched.path()).unwrap();

	let config = ConfigStore::load(config_dir.path().join("config.json"))
		.await
		.unwrap();
	config
		.update(|config| {
			config.watchers.push(WatchRoot {
				dir: watched_root.clone(),
				recursive: None,
				mask: None,
			});
			config.remote.root_folder_id = "root".to_string();
			config.remote.poll_interval_secs = 1;
			config.remote.last_activity_check = Some(Utc::now() - chrono::Duration::seconds(60));
		})
		.await
		.unwrap();

	let store = Arc::new(MemoryStore::new());
	let index = Arc::new(MemoryPathIndex::new());
	let config = Arc::new(config);

	let node = SyncNode::start(
		&config.get().await,
		store.clone(),
		index.clone(),
		config.clone(),
	)
	.await
	.unwrap();
	assert_eq!(node.roots().len(), 1);
	assert_eq!(node.roots()[0].directories, 1);

	// Local file goes out
	let local = watched_root.join("local.txt");
	fs::write(&local, b"from disk").await.unwrap();

	assert!(eventually(|| async { object_at(&store, &local).await.is_some() }).await);
	let uploaded = object_at(&store, &local).await.unwrap();
	assert_eq!(store.download(&uploaded.id).await.unwrap(), b"from disk");
	assert!(
		eventually(|| async {
			index.get_id_by_path(&local).await.unwrap().as_deref() == Some(uploaded.id.as_str())
		})
		.await
	);

	// Remote file comes in, below a directory that doesn't exist yet
	let remote = watched_root.join("inbox").join("remote.txt");
	let created = store
		.create(
			ObjectMetadata {
				name: "remote.txt".to_string(),
				parent_id: Some("root".to_string()),
				app_properties: HashMap::from([(
					FULL_PATH_PROPERTY.to_string(),
					remote.to_string_lossy().into_owned(),
				)]),
				..Default::default()
			},
			Some(b"from remote".to_vec()),
		)
		.await
		.unwrap();

	assert!(
		eventually(|| async {
			fs::read(&remote)
				.await
				.is_ok_and(|content| content == b"from remote")
		})
		.await
	);
	assert!(
		eventually(|| async {
			index.get_id_by_path(&remote).await.unwrap().as_deref() == Some(created.id.as_str())
		})
		.await
	);

	// Local deletion removes the remote object
	fs::remove_file(&local).await.unwrap();
	assert!(eventually(|| async { object_at(&store, &local).await.is_none() }).await);

	node.shutdown().await.unwrap();

	// The checkpoint was written back to the configuration
	let checkpoint = config.get().await.remote.last_activity_check.unwrap();
	assert!(checkpoint > Utc::now() - chrono::Duration::seconds(30));
}
