use std::{
	collections::HashMap,
	fs::{self, Metadata},
	path::{Path, PathBuf},
	sync::Arc,
	time::SystemTime,
};

use sp_utils::{canonicalize, FileIOError};
use tracing::{debug, instrument, trace, warn};

use crate::{
	conditions::Conditions,
	error::WatcherError,
	ignore::PathFilter,
	source::{WatchBackend, WatchId},
};

/// Last observed state of a registered path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMetadata {
	pub is_dir: bool,
	pub modified: Option<SystemTime>,
}

impl From<&Metadata> for PathMetadata {
	fn from(metadata: &Metadata) -> Self {
		Self {
			is_dir: metadata.is_dir(),
			modified: metadata.modified().ok(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedPath {
	/// Conditions the caller asked for; the kernel watch itself always reports everything
	pub conditions: Conditions,
	pub recursive: bool,
	pub metadata: Option<PathMetadata>,
	/// Only directories (and explicitly registered files) own a kernel watch
	pub watch: Option<WatchId>,
}

impl WatchedPath {
	#[must_use]
	pub fn is_dir(&self) -> bool {
		self.metadata.as_ref().is_some_and(|metadata| metadata.is_dir)
	}
}

/// Software maintained recursive watch tree over a flat kernel watch primitive.
///
/// Every live kernel watch maps to exactly one registered path and the other way around.
pub struct WatchRegistry<B> {
	backend: B,
	filter: Arc<dyn PathFilter>,
	paths: HashMap<PathBuf, WatchedPath>,
	watches: HashMap<WatchId, PathBuf>,
}

impl<B: WatchBackend> WatchRegistry<B> {
	pub fn new(backend: B, filter: Arc<dyn PathFilter>) -> Self {
		Self {
			backend,
			filter,
			paths: HashMap::new(),
			watches: HashMap::new(),
		}
	}

	/// Watches `root` and every directory below it.
	pub fn add_recursive(
		&mut self,
		root: impl AsRef<Path>,
		conditions: Conditions,
	) -> Result<(), WatcherError> {
		let root = canonicalize(root)?;
		self.add(root, conditions, true)
	}

	/// Watches `path` alone, direct children are tracked through its watch but
	/// subdirectories are never descended into.
	pub fn add_non_recursive(
		&mut self,
		path: impl AsRef<Path>,
		conditions: Conditions,
	) -> Result<(), WatcherError> {
		let path = canonicalize(path)?;
		self.add(path, conditions, false)
	}

	/// Walks an already canonical `root`; a failed walk leaves nothing of it registered.
	#[instrument(skip(self), fields(root = %root.display()), err)]
	pub(crate) fn add(
		&mut self,
		root: PathBuf,
		conditions: Conditions,
		recursive: bool,
	) -> Result<(), WatcherError> {
		if let Err(e) = self.walk(&root, conditions, recursive) {
			if let Err(rollback_err) = self.remove(&root) {
				warn!(?rollback_err, "Failed to roll back partially registered tree;");
			}
			return Err(e);
		}

		Ok(())
	}

	fn walk(&mut self, root: &Path, conditions: Conditions, recursive: bool) -> Result<(), WatcherError> {
		let mut to_walk = vec![(root.to_path_buf(), 0_usize)];

		while let Some((path, depth)) = to_walk.pop() {
			let metadata = fs::symlink_metadata(&path)
				.map_err(|e| FileIOError::from((&path, e, "Failed to read metadata")))?;

			if self.filter.is_ignored(&path)? {
				if !metadata.is_dir() {
					// Recorded so lookups answer, the empty mask keeps every event out
					self.record(path, Conditions::empty(), recursive, Some(&metadata), None);
				}
				continue;
			}

			if metadata.is_dir() {
				if depth > 0 && !recursive {
					trace!(path = %path.display(), "Skipping subdirectory of non recursive watch;");
					continue;
				}

				let watch = self.backend.add_watch(&path, Conditions::ALL_EVENTS)?;
				self.record(path.clone(), conditions, recursive, Some(&metadata), Some(watch));

				for entry in fs::read_dir(&path)
					.map_err(|e| FileIOError::from((&path, e, "Failed to read directory")))?
				{
					let entry = entry
						.map_err(|e| FileIOError::from((&path, e, "Failed to read directory entry")))?;
					to_walk.push((entry.path(), depth + 1));
				}
			} else {
				// A file given as root needs its own watch, nested files ride on their parent's
				let watch = if depth == 0 {
					Some(self.backend.add_watch(&path, Conditions::ALL_EVENTS)?)
				} else {
					None
				};
				self.record(path, conditions, recursive, Some(&metadata), watch);
			}
		}

		Ok(())
	}

	fn record(
		&mut self,
		path: PathBuf,
		conditions: Conditions,
		recursive: bool,
		metadata: Option<&Metadata>,
		watch: Option<WatchId>,
	) {
		if let Some(watch) = watch {
			// Same inode watched under another name, that name no longer owns the watch
			if let Some(previous) = self.watches.insert(watch, path.clone()) {
				if previous != path {
					if let Some(entry) = self.paths.get_mut(&previous) {
						entry.watch = None;
					}
				}
			}
		}

		self.paths.insert(
			path,
			WatchedPath {
				conditions,
				recursive,
				metadata: metadata.map(PathMetadata::from),
				watch,
			},
		);
	}

	/// Unregisters `path` and everything below it, releasing their kernel watches.
	///
	/// Returns how many entries were removed.
	#[instrument(skip(self), fields(path = %path.display()))]
	pub fn remove(&mut self, path: &Path) -> Result<usize, WatcherError> {
		let doomed = self
			.paths
			.keys()
			.filter(|registered| registered.starts_with(path))
			.cloned()
			.collect::<Vec<_>>();

		let mut first_err = None;

		for registered in &doomed {
			let Some(entry) = self.paths.remove(registered) else {
				continue;
			};

			if let Some(watch) = entry.watch {
				self.watches.remove(&watch);
				if let Err(e) = self.backend.remove_watch(watch) {
					warn!(?e, path = %registered.display(), "Failed to remove kernel watch;");
					first_err.get_or_insert(e);
				}
			}
		}

		if !doomed.is_empty() {
			debug!(removed = doomed.len(), "Removed watched paths;");
		}

		first_err.map_or(Ok(doomed.len()), Err)
	}

	/// Registers a file that just appeared, inheriting its parent directory's settings.
	pub fn record_file(&mut self, path: &Path) -> Result<(), WatcherError> {
		let Some(parent) = path.parent().and_then(|parent| self.paths.get(parent)) else {
			return Ok(());
		};
		let (conditions, recursive) = (parent.conditions, parent.recursive);

		let metadata = match fs::symlink_metadata(path) {
			Ok(metadata) => metadata,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				trace!(path = %path.display(), "Created file vanished before being recorded;");
				return Ok(());
			}
			Err(e) => return Err(FileIOError::from((path, e, "Failed to read metadata")).into()),
		};

		let watch = self.paths.get(path).and_then(|existing| existing.watch);
		self.record(path.to_path_buf(), conditions, recursive, Some(&metadata), watch);

		Ok(())
	}

	/// Registers a directory that appeared under a recursive entry, returns `false` when
	/// its parent isn't watched recursively.
	pub fn add_child_dir(&mut self, path: &Path) -> Result<bool, WatcherError> {
		let Some(parent) = path
			.parent()
			.and_then(|parent| self.paths.get(parent))
			.filter(|parent| parent.recursive)
		else {
			return Ok(false);
		};
		let conditions = parent.conditions;

		match self.add(path.to_path_buf(), conditions, true) {
			Ok(()) => Ok(true),
			Err(e) if e.is_vanished_path() => {
				debug!(path = %path.display(), "Created directory vanished before being watched;");
				Ok(false)
			}
			Err(e) => Err(e),
		}
	}

	/// Moves a registered directory to its new location with the same settings.
	pub fn reissue(&mut self, from: &Path, to: &Path) -> Result<(), WatcherError> {
		let Some(WatchedPath {
			conditions,
			recursive,
			..
		}) = self.paths.get(from).cloned()
		else {
			// Never watched where it came from, treat it as newly created
			return self.add_child_dir(to).map(|_| ());
		};

		self.remove(from)?;

		match self.add(to.to_path_buf(), conditions, recursive) {
			Err(e) if e.is_vanished_path() => {
				debug!(to = %to.display(), "Moved directory vanished before being watched;");
				Ok(())
			}
			res => res,
		}
	}

	#[must_use]
	pub fn lookup(&self, path: &Path) -> Option<&WatchedPath> {
		self.paths.get(path)
	}

	/// Path whose kernel watch is `watch`
	#[must_use]
	pub fn watched_path(&self, watch: WatchId) -> Option<&Path> {
		self.watches.get(&watch).map(PathBuf::as_path)
	}

	/// Conditions requested for `path`, falling back to its parent directory's for
	/// entries the registry hasn't seen yet.
	#[must_use]
	pub fn conditions_for(&self, path: &Path) -> Option<Conditions> {
		self.paths
			.get(path)
			.or_else(|| {
				path.parent()
					.and_then(|parent| self.paths.get(parent))
					.filter(|parent| parent.watch.is_some())
			})
			.map(|entry| entry.conditions)
	}

	/// Tracked, non ignored files at or below `dir`, sorted
	#[must_use]
	pub fn files_below(&self, dir: &Path) -> Vec<PathBuf> {
		let mut files = self
			.paths
			.iter()
			.filter(|(path, entry)| {
				path.starts_with(dir) && !entry.is_dir() && !entry.conditions.is_empty()
			})
			.map(|(path, _)| path.clone())
			.collect::<Vec<_>>();
		files.sort();

		files
	}

	pub fn is_ignored(&self, path: &Path) -> Result<bool, WatcherError> {
		self.filter.is_ignored(path)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.paths.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.paths.is_empty()
	}

	#[must_use]
	pub fn watch_count(&self) -> usize {
		self.watches.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&Path, &WatchedPath)> {
		self.paths.iter().map(|(path, entry)| (path.as_path(), entry))
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use std::fs;

	use tempfile::tempdir;

	use super::*;
	use crate::{ignore::IgnoreRules, testing::MemoryBackend};

	fn tree() -> (tempfile::TempDir, PathBuf) {
		let dir = tempdir().unwrap();
		let root = dir.path().canonicalize().unwrap();

		fs::create_dir_all(root.join("a/b")).unwrap();
		fs::create_dir_all(root.join("skip/inner")).unwrap();
		fs::write(root.join("top.txt"), b"x").unwrap();
		fs::write(root.join("a/b/leaf.txt"), b"x").unwrap();
		fs::write(root.join("a/note.swp"), b"x").unwrap();

		(dir, root)
	}

	fn registry(backend: &MemoryBackend, ignore: &[String]) -> WatchRegistry<MemoryBackend> {
		WatchRegistry::new(backend.clone(), Arc::new(IgnoreRules::new(ignore).unwrap()))
	}

	#[test]
	fn recursive_add_watches_every_directory_once() {
		let (_dir, root) = tree();
		let backend = MemoryBackend::default();
		let mut registry = registry(&backend, &[]);

		registry.add_recursive(&root, Conditions::CLOSE_WRITE).unwrap();

		let mut watched = backend.live_paths();
		watched.sort();
		assert_eq!(
			watched,
			vec![
				root.clone(),
				root.join("a"),
				root.join("a/b"),
				root.join("skip"),
				root.join("skip/inner"),
			]
		);
		assert_eq!(registry.watch_count(), 5);

		let leaf = registry.lookup(&root.join("a/b/leaf.txt")).unwrap();
		assert_eq!(leaf.conditions, Conditions::CLOSE_WRITE);
		assert!(leaf.recursive);
		assert!(leaf.watch.is_none());
		assert!(!leaf.is_dir());
	}

	#[test]
	fn non_recursive_add_stops_at_first_level() {
		let (_dir, root) = tree();
		let backend = MemoryBackend::default();
		let mut registry = registry(&backend, &[]);

		registry.add_non_recursive(&root, Conditions::ALL_EVENTS).unwrap();

		assert_eq!(backend.live_paths(), vec![root.clone()]);
		assert!(registry.lookup(&root.join("top.txt")).is_some());
		assert!(registry.lookup(&root.join("a")).is_none());
		assert!(registry.lookup(&root.join("a/b/leaf.txt")).is_none());
	}

	#[test]
	fn ignored_paths_never_get_a_watch() {
		let (_dir, root) = tree();
		let backend = MemoryBackend::default();
		let mut registry = registry(
			&backend,
			&[
				root.join("skip").to_string_lossy().into_owned(),
				format!("{}/**/*.swp", root.display()),
			],
		);

		registry.add_recursive(&root, Conditions::ALL_EVENTS).unwrap();

		assert!(backend
			.live_paths()
			.iter()
			.all(|path| !path.starts_with(root.join("skip"))));
		assert!(registry.lookup(&root.join("skip")).is_none());

		let swap = registry.lookup(&root.join("a/note.swp")).unwrap();
		assert!(swap.conditions.is_empty());
		assert!(swap.watch.is_none());
	}

	#[test]
	fn remove_purges_subtree_and_watches() {
		let (_dir, root) = tree();
		let backend = MemoryBackend::default();
		let mut registry = registry(&backend, &[]);
		registry.add_recursive(&root, Conditions::ALL_EVENTS).unwrap();

		// Entries under `a` plus `a` itself: a, a/b, a/b/leaf.txt, a/note.swp
		assert_eq!(registry.remove(&root.join("a")).unwrap(), 4);
		assert!(registry.iter().all(|(path, _)| !path.starts_with(root.join("a"))));
		assert!(!backend.live_paths().contains(&root.join("a/b")));

		// Sibling with a shared name prefix is untouched
		fs::create_dir(root.join("ab")).unwrap();
		assert!(registry.add_child_dir(&root.join("ab")).unwrap());
		assert_eq!(registry.remove(&root.join("a")).unwrap(), 0);
		assert!(registry.lookup(&root.join("ab")).is_some());

		registry.remove(&root).unwrap();
		assert!(registry.is_empty());
		assert!(backend.live_paths().is_empty());
	}

	#[test]
	fn walk_failure_rolls_back() {
		let (_dir, root) = tree();
		let backend = MemoryBackend::default();
		backend.fail_on(root.join("a/b"));
		let mut registry = registry(&backend, &[]);

		assert!(registry.add_recursive(&root, Conditions::ALL_EVENTS).is_err());
		assert!(registry.is_empty());
		assert!(backend.live_paths().is_empty());
	}

	#[test]
	fn reissue_keeps_settings() {
		let (_dir, root) = tree();
		let backend = MemoryBackend::default();
		let mut registry = registry(&backend, &[]);
		registry.add_recursive(&root, Conditions::CLOSE_WRITE).unwrap();

		fs::rename(root.join("a"), root.join("moved")).unwrap();
		registry.reissue(&root.join("a"), &root.join("moved")).unwrap();

		assert!(registry.lookup(&root.join("a")).is_none());
		let moved = registry.lookup(&root.join("moved/b")).unwrap();
		assert_eq!(moved.conditions, Conditions::CLOSE_WRITE);
		assert!(moved.watch.is_some());
		assert_eq!(registry.watch_count(), backend.live_paths().len());
	}

	#[test]
	fn files_below_skips_directories_and_ignored_entries() {
		let (_dir, root) = tree();
		let backend = MemoryBackend::default();
		let mut registry = registry(&backend, &[format!("{}/**/*.swp", root.display())]);
		registry.add_recursive(&root, Conditions::CLOSE_WRITE).unwrap();

		assert_eq!(registry.files_below(&root.join("a")), vec![root.join("a/b/leaf.txt")]);
		assert_eq!(
			registry.files_below(&root),
			vec![root.join("a/b/leaf.txt"), root.join("top.txt")]
		);
	}

	#[test]
	fn conditions_fall_back_to_parent_directory() {
		let (_dir, root) = tree();
		let backend = MemoryBackend::default();
		let mut registry = registry(&backend, &[]);
		registry.add_recursive(&root, Conditions::DELETE).unwrap();

		assert_eq!(
			registry.conditions_for(&root.join("a/unseen.txt")),
			Some(Conditions::DELETE)
		);
		// Parent is a plain file, nothing watches below it
		assert_eq!(registry.conditions_for(&root.join("top.txt/x")), None);
		assert_eq!(registry.conditions_for(Path::new("/elsewhere/x")), None);
	}
}
