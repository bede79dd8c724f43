//! Canonical paths are the join key between the local tree and the remote object
//! space, so every component that stores or looks up a path goes through [`canonicalize`].

use std::{
	env, fs, io,
	path::{Component, Path, PathBuf},
};

use thiserror::Error;

use crate::error::{FileIOError, HomeDirectoryError};

#[derive(Error, Debug)]
pub enum CanonicalPathError {
	#[error(transparent)]
	HomeDirectory(#[from] HomeDirectoryError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

/// Expands a leading `~` into the current user's home directory.
///
/// Only `~` alone and `~/...` are expanded, `~user` forms are left untouched.
pub fn expand_home(path: impl AsRef<Path>) -> Result<PathBuf, HomeDirectoryError> {
	let path = path.as_ref();

	let Ok(rest) = path.strip_prefix("~") else {
		return Ok(path.to_path_buf());
	};

	dirs::home_dir()
		.map(|home| {
			if rest.as_os_str().is_empty() {
				home
			} else {
				home.join(rest)
			}
		})
		.ok_or_else(|| HomeDirectoryError(path.into()))
}

/// Produces an absolute, home-expanded path with symlinks resolved.
///
/// The path doesn't need to exist: the longest existing ancestor is resolved through the
/// filesystem and the remaining components are appended lexically. This keeps paths of
/// deleted files comparable with the ones recorded while they still existed.
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf, CanonicalPathError> {
	let expanded = expand_home(path)?;

	let absolute = if expanded.is_absolute() {
		expanded
	} else {
		env::current_dir()
			.map_err(|e| FileIOError::from((&expanded, e, "Failed to get current directory")))?
			.join(expanded)
	};

	let normalized = normalize_lexically(&absolute);

	let mut existing = normalized.as_path();
	let mut missing = Vec::new();

	loop {
		match fs::canonicalize(existing) {
			Ok(resolved) => {
				return Ok(missing
					.into_iter()
					.rev()
					.fold(resolved, |acc, component| acc.join(component)));
			}

			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
					// Walked up to the root without finding anything, nothing to resolve
					return Ok(normalized);
				};
				missing.push(name);
				existing = parent;
			}

			Err(e) => {
				return Err(
					FileIOError::from((existing, e, "Failed to resolve canonical path")).into(),
				)
			}
		}
	}
}

fn normalize_lexically(path: &Path) -> PathBuf {
	let mut normalized = PathBuf::new();

	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				normalized.pop();
			}
			other => normalized.push(other),
		}
	}

	normalized
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[test]
	fn expands_home_prefix_only() {
		let home = dirs::home_dir().unwrap();

		assert_eq!(expand_home("~").unwrap(), home);
		assert_eq!(expand_home("~/docs/a.txt").unwrap(), home.join("docs/a.txt"));
		assert_eq!(expand_home("/tmp/~").unwrap(), PathBuf::from("/tmp/~"));
		assert_eq!(expand_home("~other/x").unwrap(), PathBuf::from("~other/x"));
	}

	#[test]
	fn resolves_symlinks_of_missing_paths() {
		let dir = tempdir().unwrap();
		let real = dir.path().join("real");
		fs::create_dir(&real).unwrap();

		#[cfg(unix)]
		{
			let link = dir.path().join("link");
			std::os::unix::fs::symlink(&real, &link).unwrap();

			assert_eq!(
				canonicalize(link.join("not-yet/b.txt")).unwrap(),
				fs::canonicalize(&real).unwrap().join("not-yet/b.txt")
			);
		}

		assert_eq!(
			canonicalize(real.join("./x/../b.txt")).unwrap(),
			fs::canonicalize(&real).unwrap().join("b.txt")
		);
	}
}
