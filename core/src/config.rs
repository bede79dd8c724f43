//! Sync configuration, stored as JSON.
//!
//! The database path may reference the configuration directory through the literal
//! `$CONFIG_PATH`, which is expanded on load and restored on save.

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_cloud_api::auth::{ClientCredentials, OAuthToken};
use sp_fs_watcher::Conditions;
use sp_utils::FileIOError;
use thiserror::Error;
use tokio::{fs, sync::RwLock};
use tracing::{debug, info, warn};

use crate::poller::CheckpointStore;

pub const CONFIG_PATH_VARIABLE: &str = "$CONFIG_PATH";
const CONFIG_FILE_NAME: &str = "config.json";
const CURRENT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to parse configuration: <path='{}'>: {source}", .path.display())]
	Parse {
		path: Box<Path>,
		#[source]
		source: serde_json::Error,
	},
	#[error("failed to serialize configuration: {0}")]
	Serialize(#[from] serde_json::Error),
	#[error("configuration version {0} is newer than the supported one")]
	UnsupportedVersion(u32),
	#[error("unable to find a configuration directory")]
	NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRoot {
	pub dir: PathBuf,
	/// Defaults to recursive
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub recursive: Option<bool>,
	/// Overrides the default mask for this root
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mask: Option<Conditions>,
}

impl WatchRoot {
	#[must_use]
	pub fn is_recursive(&self) -> bool {
		self.recursive.unwrap_or(true)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreEntry {
	/// Glob pattern, directories also match everything below them
	pub dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
	#[serde(default)]
	pub root_folder_id: String,
	/// Remote changes up to this instant were already consumed
	#[serde(default)]
	pub last_activity_check: Option<DateTime<Utc>>,
	#[serde(default = "default_poll_interval_secs")]
	pub poll_interval_secs: u64,
	#[serde(default = "default_max_backoff_secs")]
	pub max_backoff_secs: u64,
	#[serde(flatten)]
	pub credentials: ClientCredentials,
	#[serde(default)]
	pub token: OAuthToken,
}

impl Default for RemoteConfig {
	fn default() -> Self {
		Self {
			root_folder_id: String::new(),
			last_activity_check: None,
			poll_interval_secs: default_poll_interval_secs(),
			max_backoff_secs: default_max_backoff_secs(),
			credentials: ClientCredentials::default(),
			token: OAuthToken::default(),
		}
	}
}

impl RemoteConfig {
	#[must_use]
	pub const fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}

	#[must_use]
	pub const fn max_backoff(&self) -> Duration {
		Duration::from_secs(self.max_backoff_secs)
	}

	/// Credentials are usable once a refresh token was obtained
	#[must_use]
	pub fn has_credentials(&self) -> bool {
		!self.credentials.client_id.is_empty() && !self.token.refresh_token.is_empty()
	}
}

const fn default_poll_interval_secs() -> u64 {
	5
}

const fn default_max_backoff_secs() -> u64 {
	5 * 60
}

fn default_mask() -> Conditions {
	Conditions::CLOSE_WRITE
		| Conditions::DELETE
		| Conditions::MOVED_FROM
		| Conditions::MOVED_TO
		| Conditions::CREATE
		| Conditions::DELETE_SELF
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
	pub version: u32,
	pub config_path: PathBuf,
	#[serde(rename = "db")]
	pub db_path: PathBuf,
	#[serde(default = "default_mask")]
	pub mask: Conditions,
	#[serde(default)]
	pub watchers: Vec<WatchRoot>,
	#[serde(default)]
	pub ignore: Vec<IgnoreEntry>,
	#[serde(default)]
	pub remote: RemoteConfig,
}

impl SyncConfig {
	#[must_use]
	pub fn default_with_dir(config_path: PathBuf) -> Self {
		Self {
			version: CURRENT_VERSION,
			db_path: config_path.join("superpose.db"),
			config_path,
			mask: default_mask(),
			watchers: vec![],
			ignore: vec![],
			remote: RemoteConfig::default(),
		}
	}

	/// Mask requested for `root`, its own override or the default one
	#[must_use]
	pub fn mask_for(&self, root: &WatchRoot) -> Conditions {
		root.mask.unwrap_or(self.mask)
	}

	fn expand_variables(&mut self) {
		self.db_path = replace_in_path(
			&self.db_path,
			CONFIG_PATH_VARIABLE,
			&self.config_path.to_string_lossy(),
		);
	}

	fn collapse_variables(&mut self) {
		let config_path = self.config_path.to_string_lossy().into_owned();
		if !config_path.is_empty() {
			self.db_path = replace_in_path(&self.db_path, &config_path, CONFIG_PATH_VARIABLE);
		}
	}

	fn migrate(&mut self) -> Result<(), ConfigError> {
		match self.version {
			0 => {
				info!("Migrating configuration to version {CURRENT_VERSION};");
				self.version = CURRENT_VERSION;
				Ok(())
			}
			CURRENT_VERSION => Ok(()),
			newer => Err(ConfigError::UnsupportedVersion(newer)),
		}
	}
}

fn replace_in_path(path: &Path, from: &str, to: &str) -> PathBuf {
	PathBuf::from(path.to_string_lossy().replace(from, to))
}

/// Default configuration file location, `<config dir>/superpose/config.json`
pub fn default_config_file() -> Result<PathBuf, ConfigError> {
	dirs::config_dir()
		.map(|dir| dir.join("superpose").join(CONFIG_FILE_NAME))
		.ok_or(ConfigError::NoConfigDir)
}

/// Configuration file shared by the running components, hot values are written back
/// as they change.
#[derive(Debug)]
pub struct ConfigStore {
	file: PathBuf,
	config: RwLock<SyncConfig>,
}

impl ConfigStore {
	/// Loads `file`, creating it with defaults when missing.
	pub async fn load(file: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let file = file.as_ref().to_path_buf();

		let config = match fs::read(&file).await {
			Ok(bytes) => {
				let mut config = serde_json::from_slice::<SyncConfig>(&bytes).map_err(|source| {
					ConfigError::Parse {
						path: file.as_path().into(),
						source,
					}
				})?;
				config.expand_variables();

				let version = config.version;
				config.migrate()?;

				let store = Self {
					file,
					config: RwLock::new(config),
				};
				if version != CURRENT_VERSION {
					store.save().await?;
				}

				return Ok(store);
			}

			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				let config_path = file
					.parent()
					.map_or_else(PathBuf::new, Path::to_path_buf);
				warn!(file = %file.display(), "No configuration found, creating default;");

				SyncConfig::default_with_dir(config_path)
			}

			Err(e) => {
				return Err(FileIOError::from((&file, e, "Failed to read configuration")).into())
			}
		};

		let store = Self {
			file,
			config: RwLock::new(config),
		};
		store.save().await?;

		Ok(store)
	}

	pub fn file(&self) -> &Path {
		&self.file
	}

	pub async fn get(&self) -> SyncConfig {
		self.config.read().await.clone()
	}

	/// Applies `update` and persists the result.
	pub async fn update(&self, update: impl FnOnce(&mut SyncConfig) + Send) -> Result<(), ConfigError> {
		update(&mut *self.config.write().await);
		self.save().await
	}

	pub async fn save(&self) -> Result<(), ConfigError> {
		let mut on_disk = self.config.read().await.clone();
		on_disk.collapse_variables();

		let json = serde_json::to_vec_pretty(&on_disk)?;

		if let Some(parent) = self.file.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| FileIOError::from((parent, e, "Failed to create configuration directory")))?;
		}

		fs::write(&self.file, json)
			.await
			.map_err(|e| FileIOError::from((&self.file, e, "Failed to write configuration")))?;

		debug!(file = %self.file.display(), "Saved configuration;");

		Ok(())
	}

	pub async fn save_token(&self, token: OAuthToken) -> Result<(), ConfigError> {
		self.update(|config| config.remote.token = token).await
	}
}

#[async_trait]
impl CheckpointStore for ConfigStore {
	async fn load_checkpoint(&self) -> Option<DateTime<Utc>> {
		self.config.read().await.remote.last_activity_check
	}

	async fn save_checkpoint(&self, checkpoint: DateTime<Utc>) -> Result<(), crate::CoreError> {
		self.update(|config| config.remote.last_activity_check = Some(checkpoint))
			.await
			.map_err(Into::into)
	}
}
