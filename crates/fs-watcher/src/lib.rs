//! Recursive filesystem watching on top of the flat inotify primitive.
//!
//! [`WatchRegistry`] keeps one kernel watch per directory of every registered tree and
//! [`WatchPipeline`] turns the raw kernel records into an ordered stream of filtered
//! [`WatchEvent`]s, updating the registry as directories come and go.

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

mod conditions;
mod error;
mod ignore;
mod pipeline;
mod registry;
mod source;
mod stop;

#[cfg(test)]
mod testing;

pub use conditions::Conditions;
pub use error::WatcherError;
pub use ignore::{IgnoreRules, PathFilter};
pub use pipeline::{WatchEvent, WatchEventHandler, WatchPipeline};
pub use registry::{PathMetadata, WatchRegistry, WatchedPath};
pub use source::{EventSource, RawEvent, WatchBackend, WatchId};
pub use stop::StopSignal;

#[cfg(target_os = "linux")]
pub use source::inotify::{open as open_inotify, InotifyBackend, InotifySource};
