use std::path::Path;

use sp_utils::FileIOError;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
	filter::LevelFilter,
	fmt::{self, Layer},
	prelude::*,
	EnvFilter,
};

use crate::CoreError;

/// Directives used when `RUST_LOG` is unset
pub const DEFAULT_LOG_DIRECTIVES: &str = "sp_core=info,sp_fs_watcher=info,superpose=info";

#[cfg(debug_assertions)]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::DEBUG;

#[cfg(not(debug_assertions))]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::INFO;

/// Installs the global subscriber: stdout plus a daily rolling file in `log_dir`.
///
/// The returned guard flushes the file writer when dropped, keep it alive for the whole
/// process.
pub fn init(log_dir: impl AsRef<Path>, directives: Option<&str>) -> Result<WorkerGuard, CoreError> {
	let log_dir = log_dir.as_ref();
	std::fs::create_dir_all(log_dir)
		.map_err(|e| FileIOError::from((log_dir, e, "Failed to create logs directory")))?;

	let (non_blocking, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "log"));

	let filter = match directives {
		Some(directives) => EnvFilter::try_new(directives)?,
		None => EnvFilter::try_from_default_env()
			.or_else(|_| EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES))?,
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_filter(CONSOLE_LOG_FILTER))
		.with(
			Layer::default()
				.with_writer(non_blocking)
				.with_ansi(false)
				.with_filter(LevelFilter::DEBUG),
		)
		.try_init()?;

	Ok(guard)
}
