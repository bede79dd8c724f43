//! Runs the sync engine until Ctrl-C

#[cfg(target_os = "linux")]
pub use linux::run;

#[cfg(not(target_os = "linux"))]
pub async fn run(_config: sp_core::ConfigStore) -> anyhow::Result<()> {
	anyhow::bail!("watching requires inotify, only available on Linux")
}

#[cfg(target_os = "linux")]
mod linux {
	use std::sync::Arc;

	use anyhow::Result;
	use sp_cloud_api::{auth::OAuthToken, ChangeOrigin, DriveStore, MemoryStore, RemoteStore};
	use sp_core::{events::next_change, ConfigStore, SqlitePathIndex, SyncNode};
	use sp_fs_watcher::StopSignal;
	use tokio::sync::watch;
	use tracing::{info, warn};

	/// Root folder id used when no remote is configured
	const DRY_RUN_ROOT: &str = "superpose-dry-run";

	pub async fn run(config: ConfigStore) -> Result<()> {
		let config = Arc::new(config);
		let mut settings = config.get().await;

		let store: Arc<dyn RemoteStore> = if settings.remote.has_credentials() {
			let drive = DriveStore::new(
				settings.remote.credentials.clone(),
				settings.remote.token.clone(),
			);
			persist_tokens(drive.subscribe_tokens(), Arc::clone(&config));
			Arc::new(drive)
		} else {
			warn!("No remote credentials configured, running a dry run against an in-memory store;");
			if settings.remote.root_folder_id.is_empty() {
				settings.remote.root_folder_id = DRY_RUN_ROOT.to_string();
			}
			Arc::new(MemoryStore::new())
		};

		let index = Arc::new(SqlitePathIndex::open(&settings.db_path).await?);

		let node = SyncNode::start(&settings, store, index, Arc::clone(&config) as _).await?;
		for root in node.roots() {
			info!(
				root = %root.root.display(),
				directories = root.directories,
				files = root.files,
				"Watching;"
			);
		}

		let stop = StopSignal::new();
		let mut changes = node.subscribe();
		let reporter = tokio::spawn({
			let stop = stop.clone();
			async move {
				loop {
					let change = tokio::select! {
						() = stop.wait() => break,
						change = next_change(&mut changes, "cli") => change,
					};
					let Some(change) = change else {
						break;
					};

					let direction = match change.origin {
						ChangeOrigin::Local => "outbound",
						ChangeOrigin::Remote => "inbound",
					};
					info!(
						%direction,
						action = %change.action,
						id = %change.object.id,
						path = ?change.object.full_path(),
						"Object changed;"
					);
				}
			}
		});

		println!("Watching, press Ctrl+C to stop");
		tokio::signal::ctrl_c().await?;
		info!("Interrupted, shutting down;");

		stop.stop();
		node.shutdown().await?;
		reporter.await?;

		Ok(())
	}

	/// Writes every refreshed OAuth token back to the configuration file.
	fn persist_tokens(mut tokens: watch::Receiver<OAuthToken>, config: Arc<ConfigStore>) {
		tokio::spawn(async move {
			while tokens.changed().await.is_ok() {
				let token = tokens.borrow_and_update().clone();
				if let Err(e) = config.save_token(token).await {
					warn!(?e, "Failed to persist refreshed token;");
				}
			}
		});
	}
}
