//! Registers the configured roots against the kernel without syncing anything

use anyhow::Result;
use sp_core::{ConfigStore, RootSummary};

use crate::OutputFormat;

pub async fn run(config: &ConfigStore, format: OutputFormat) -> Result<()> {
	let summaries = register(config).await?;

	match format {
		OutputFormat::Human => {
			println!("Configuration: {}", config.file().display());
			if summaries.is_empty() {
				println!("No watch roots configured");
			}
			for summary in &summaries {
				println!(
					"- {} ({}): {} directories watched, {} files tracked, {} ignored",
					summary.root.display(),
					if summary.recursive { "recursive" } else { "flat" },
					summary.directories,
					summary.files,
					summary.ignored,
				);
			}
		}
		OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
	}

	Ok(())
}

#[cfg(target_os = "linux")]
async fn register(config: &ConfigStore) -> Result<Vec<RootSummary>> {
	use std::sync::Arc;

	use sp_core::{ignore_rules, register_roots};
	use sp_fs_watcher::{open_inotify, EventSource, WatchRegistry};

	let config = config.get().await;
	let (backend, mut source) = open_inotify()?;
	let mut registry = WatchRegistry::new(backend, Arc::new(ignore_rules(&config)?));

	let summaries = register_roots(&mut registry, &config)?;
	source.close();

	Ok(summaries)
}

#[cfg(not(target_os = "linux"))]
async fn register(_config: &ConfigStore) -> Result<Vec<RootSummary>> {
	anyhow::bail!("watching requires inotify, only available on Linux")
}
