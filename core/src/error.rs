use sp_cloud_api::Error as RemoteError;
use sp_fs_watcher::WatcherError;
use sp_utils::{path::CanonicalPathError, FileIOError};
use thiserror::Error;

use crate::{config::ConfigError, index::IndexError};

#[derive(Error, Debug)]
pub enum CoreError {
	#[error("Watcher error: (error: {0})")]
	Watcher(#[from] WatcherError),
	#[error("Remote store error: (error: {0})")]
	Remote(#[from] RemoteError),
	#[error("Path index error: (error: {0})")]
	Index(#[from] IndexError),
	#[error("Configuration error: (error: {0})")]
	Config(#[from] ConfigError),
	#[error("Remote root folder is not configured")]
	MissingRemoteRoot,
	#[error("Remote object has no full path: <id='{0}'>")]
	MissingFullPath(String),

	#[error("Invalid log directive: (error: {0})")]
	LogDirective(#[from] tracing_subscriber::filter::ParseError),
	#[error("Failed to install logger: (error: {0})")]
	Logger(#[from] tracing_subscriber::util::TryInitError),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	CanonicalPath(#[from] CanonicalPathError),
}
