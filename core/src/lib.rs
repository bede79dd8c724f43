//! Two-way synchronization between a local directory tree and a remote object store.
//!
//! Local edits flow through the watch pipeline into the [`SyncReconciler`], which uploads
//! or removes remote objects through the [`RemoteClient`]. Remote edits are picked up by
//! the [`RemotePoller`] and broadcast on the [`EventBus`] to the [`Materializer`], which
//! writes them to disk, and to the [`IndexUpdater`], which keeps the [`PathIndex`] current.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod config;
mod error;
pub mod events;
pub mod index;
mod index_updater;
pub mod logging;
mod materializer;
mod node;
mod poller;
mod reconciler;
mod remote;

pub use config::{ConfigError, ConfigStore, SyncConfig};
pub use error::CoreError;
pub use events::EventBus;
pub use index::{IndexError, MemoryPathIndex, PathIndex, PathIndexRecord, SqlitePathIndex};
pub use index_updater::IndexUpdater;
pub use materializer::Materializer;
pub use node::{ignore_rules, register_roots, RootSummary};
pub use poller::{CheckpointStore, RemotePoller};
pub use reconciler::{decide, SyncAction, SyncReconciler};
pub use remote::{RemoteClient, SyncTarget};

#[cfg(target_os = "linux")]
pub use node::SyncNode;
