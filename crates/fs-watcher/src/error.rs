use std::{io, path::Path};

use sp_utils::{path::CanonicalPathError, FileIOError};
use thiserror::Error;

use crate::source::WatchId;

#[derive(Error, Debug)]
pub enum WatcherError {
	#[error("failed to initialize the kernel notification channel: {0}")]
	Init(#[source] io::Error),
	#[error("failed to add watch: <path='{}'>: {source}", .path.display())]
	AddWatch {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("failed to remove watch: <watch_id={0:?}>: {1}")]
	RemoveWatch(WatchId, #[source] io::Error),
	#[error("failed to read kernel notification records: {0}")]
	Read(#[source] io::Error),
	#[error("kernel notification channel was closed")]
	Closed,
	#[error("unknown condition name: {0}")]
	UnknownCondition(String),
	#[error("invalid ignore pattern: <pattern='{pattern}'>: {source}")]
	Glob {
		pattern: String,
		#[source]
		source: globset::Error,
	},
	#[error("pipeline task failed to join: {0}")]
	Join(#[from] tokio::task::JoinError),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	CanonicalPath(#[from] CanonicalPathError),
}

impl WatcherError {
	/// The path went away between being listed and being stat'ed or watched
	#[must_use]
	pub fn is_vanished_path(&self) -> bool {
		match self {
			Self::AddWatch { source, .. } => source.kind() == io::ErrorKind::NotFound,
			Self::FileIO(e) => e.is_not_found(),
			_ => false,
		}
	}
}
