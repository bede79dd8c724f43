use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use sp_core::{config::default_config_file, logging, ConfigStore};

mod domains;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
	Human,
	Json,
}

#[derive(Parser, Debug)]
#[command(name = "superpose", about = "Keeps a local tree and a remote folder in sync")]
struct Cli {
	/// Configuration file, created with defaults when missing
	#[arg(long)]
	config: Option<PathBuf>,

	/// Tracing directives, overrides RUST_LOG
	#[arg(long)]
	log_level: Option<String>,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Register the configured roots and report what would be watched
	Check,
	/// Run the sync engine until interrupted
	Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let config_file = match cli.config {
		Some(file) => file,
		None => default_config_file()?,
	};
	let config = ConfigStore::load(&config_file).await?;

	let _guard = logging::init(
		config.get().await.config_path.join("logs"),
		cli.log_level.as_deref(),
	)?;

	match cli.command {
		Commands::Check => domains::check::run(&config, cli.format).await,
		Commands::Watch => domains::watch::run(config).await,
	}
}
