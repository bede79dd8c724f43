use std::{fs, io, path::Path};

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use sp_utils::{canonicalize, FileIOError};
use tracing::trace;

use crate::error::WatcherError;

/// Path exclusion predicate consulted before anything gets registered or delivered.
pub trait PathFilter: Send + Sync + 'static {
	fn is_ignored(&self, path: &Path) -> Result<bool, WatcherError>;
}

/// Glob based ignore list.
///
/// Patterns are home-expanded and symlink-resolved. A pattern naming an existing directory
/// also matches everything below it. A pattern for a path that doesn't exist must contain a
/// wildcard (`*`, `?`, `[` or `{`), so it can target entries that will only be created later.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
	patterns: Vec<String>,
	set: GlobSet,
}

impl IgnoreRules {
	pub fn new<P: AsRef<str>>(patterns: impl IntoIterator<Item = P>) -> Result<Self, WatcherError> {
		let mut builder = GlobSetBuilder::new();
		let mut compiled = Vec::new();

		for pattern in patterns {
			for glob in expand_pattern(pattern.as_ref())? {
				builder.add(build_glob(&glob)?);
				compiled.push(glob);
			}
		}

		let set = builder.build().map_err(|source| WatcherError::Glob {
			pattern: compiled.join(", "),
			source,
		})?;

		Ok(Self {
			patterns: compiled,
			set,
		})
	}

	#[must_use]
	pub fn empty() -> Self {
		Self {
			patterns: vec![],
			set: GlobSet::empty(),
		}
	}

	/// Globs actually matched against, after expansion
	#[must_use]
	pub fn patterns(&self) -> &[String] {
		&self.patterns
	}
}

impl Default for IgnoreRules {
	fn default() -> Self {
		Self::empty()
	}
}

impl PathFilter for IgnoreRules {
	fn is_ignored(&self, path: &Path) -> Result<bool, WatcherError> {
		let ignored = self.set.is_match(path);
		if ignored {
			trace!(path = %path.display(), "Path matched an ignore rule;");
		}

		Ok(ignored)
	}
}

const GLOB_META: &[char] = &['*', '?', '[', '{'];

fn build_glob(pattern: &str) -> Result<Glob, WatcherError> {
	GlobBuilder::new(pattern)
		.literal_separator(true)
		.build()
		.map_err(|source| WatcherError::Glob {
			pattern: pattern.to_string(),
			source,
		})
}

fn expand_pattern(pattern: &str) -> Result<Vec<String>, WatcherError> {
	let resolved = canonicalize(pattern)?;

	match fs::metadata(&resolved) {
		Ok(metadata) if metadata.is_dir() => {
			let escaped = globset::escape(&resolved.to_string_lossy());
			Ok(vec![format!("{escaped}/**"), escaped])
		}

		Ok(_) => Ok(vec![globset::escape(&resolved.to_string_lossy())]),

		Err(e) if e.kind() == io::ErrorKind::NotFound && pattern.contains(GLOB_META) => {
			Ok(vec![resolved.to_string_lossy().into_owned()])
		}

		Err(e) => Err(FileIOError::from((resolved, e, "Failed to stat ignore pattern")).into()),
	}
}
