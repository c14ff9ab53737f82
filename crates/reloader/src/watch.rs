use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Directories whose name starts with this are never watched.
pub const VCS_PREFIX: &str = ".git";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
	Write(PathBuf),
	Create(PathBuf),
	Remove(PathBuf),
}

#[derive(Debug)]
pub enum WatchError {
	/// The watcher could not be built, or reported an error while running.
	Backend(notify::Error),
	/// A directory could not be registered.
	Register { path: PathBuf, source: notify::Error },
	/// The tree could not be enumerated.
	Walk { path: PathBuf, source: io::Error },
}

impl std::fmt::Display for WatchError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			WatchError::Backend(e) => write!(f, "watcher error: {}", e),
			WatchError::Register { path, source } => {
				write!(f, "failed to watch {}: {}", path.display(), source)
			}
			WatchError::Walk { path, source } => {
				write!(f, "failed to read {}: {}", path.display(), source)
			}
		}
	}
}

impl std::error::Error for WatchError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			WatchError::Backend(e) => Some(e),
			WatchError::Register { source, .. } => Some(source),
			WatchError::Walk { source, .. } => Some(source),
		}
	}
}

impl From<notify::Error> for WatchError {
	fn from(e: notify::Error) -> Self {
		WatchError::Backend(e)
	}
}

/// Registers single directories (non-recursively) with an event source.
pub trait WatchBackend {
	fn watch(&mut self, dir: &Path) -> Result<(), notify::Error>;
}

/// The two streams the supervision loop consumes.
pub struct EventStreams {
	pub events: mpsc::UnboundedReceiver<FsEvent>,
	pub errors: mpsc::UnboundedReceiver<WatchError>,
}

/// `notify`-backed event source. Dropping it closes both streams.
pub struct NotifyBackend {
	watcher: RecommendedWatcher,
}

impl NotifyBackend {
	pub fn new() -> Result<(Self, EventStreams), WatchError> {
		let (events_tx, events) = mpsc::unbounded_channel();
		let (errors_tx, errors) = mpsc::unbounded_channel();

		let watcher = RecommendedWatcher::new(
			move |res: Result<Event, notify::Error>| match res {
				Ok(event) => {
					for fs_event in translate(event) {
						let _ = events_tx.send(fs_event);
					}
				}
				Err(e) => {
					let _ = errors_tx.send(WatchError::Backend(e));
				}
			},
			Config::default(),
		)?;

		Ok((Self { watcher }, EventStreams { events, errors }))
	}
}

impl WatchBackend for NotifyBackend {
	fn watch(&mut self, dir: &Path) -> Result<(), notify::Error> {
		self.watcher.watch(dir, RecursiveMode::NonRecursive)
	}
}

/// Map a raw notify event onto the kinds the loop cares about.
///
/// Content changes are writes, and so are metadata changes on regular
/// files: `touch` only updates timestamps. Close/access notifications
/// are dropped, as they would double every real write.
pub fn translate(event: Event) -> Vec<FsEvent> {
	let Event { kind, paths, .. } = event;
	match kind {
		EventKind::Create(_) => paths.into_iter().map(FsEvent::Create).collect(),
		EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
			paths.into_iter().map(FsEvent::Write).collect()
		}
		EventKind::Modify(ModifyKind::Metadata(_)) => paths
			.into_iter()
			.filter(|p| std::fs::metadata(p).map(|m| m.is_file()).unwrap_or(false))
			.map(FsEvent::Write)
			.collect(),
		EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
			paths.into_iter().map(FsEvent::Create).collect()
		}
		EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
			paths.into_iter().map(FsEvent::Remove).collect()
		}
		EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
			let mut paths = paths.into_iter();
			match (paths.next(), paths.next()) {
				(Some(from), Some(to)) => vec![FsEvent::Remove(from), FsEvent::Create(to)],
				(Some(only), None) => vec![FsEvent::Create(only)],
				_ => Vec::new(),
			}
		}
		EventKind::Remove(_) => paths.into_iter().map(FsEvent::Remove).collect(),
		_ => Vec::new(),
	}
}

pub fn is_vcs_name(name: &OsStr) -> bool {
	name.to_string_lossy().starts_with(VCS_PREFIX)
}

fn is_vcs_dir(path: &Path) -> bool {
	path.file_name().map(is_vcs_name).unwrap_or(false)
}

/// Immediate subdirectories of `dir`, minus version-control metadata.
/// Symlinks are not followed.
fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, WatchError> {
	let walk_err = |source: io::Error| WatchError::Walk {
		path: dir.to_path_buf(),
		source,
	};
	let mut dirs = Vec::new();
	for entry in std::fs::read_dir(dir).map_err(walk_err)? {
		let entry = entry.map_err(walk_err)?;
		let file_type = entry.file_type().map_err(walk_err)?;
		if file_type.is_dir() && !is_vcs_name(&entry.file_name()) {
			dirs.push(entry.path());
		}
	}
	dirs.sort();
	Ok(dirs)
}

/// Every directory currently registered with the backend.
///
/// The set only grows. Directories are added by the initial walk and
/// then one by one as they are created (or recreated).
pub struct DirectoryWatchSet<B> {
	backend: B,
	root: PathBuf,
	dirs: BTreeSet<PathBuf>,
}

impl<B: WatchBackend> DirectoryWatchSet<B> {
	/// Walk `root` and register every directory in it. Any failure aborts
	/// the whole build.
	pub fn build(backend: B, root: impl AsRef<Path>) -> Result<Self, WatchError> {
		let mut set = Self {
			backend,
			root: root.as_ref().to_path_buf(),
			dirs: BTreeSet::new(),
		};
		let root = set.root.clone();
		set.register_tree(&root)?;
		tracing::info!("watching {} directories under {}", set.dirs.len(), root.display());
		Ok(set)
	}

	fn register_tree(&mut self, dir: &Path) -> Result<(), WatchError> {
		self.register(dir)?;
		for child in subdirectories(dir)? {
			self.register_tree(&child)?;
		}
		Ok(())
	}

	/// Initial build only. Returns `false` if the directory was already
	/// registered during this walk.
	fn register(&mut self, dir: &Path) -> Result<bool, WatchError> {
		if self.dirs.contains(dir) {
			return Ok(false);
		}
		self.backend.watch(dir).map_err(|source| WatchError::Register {
			path: dir.to_path_buf(),
			source,
		})?;
		self.dirs.insert(dir.to_path_buf());
		Ok(true)
	}

	/// Start watching a freshly created directory and whatever already
	/// exists beneath it. Failures are logged, never returned.
	///
	/// The backend is always asked, even for a path seen before: a
	/// directory deleted and recreated at the same path lost its watch
	/// along with its inode.
	///
	/// Returns how many directories were registered.
	pub fn extend(&mut self, dir: &Path) -> usize {
		if is_vcs_dir(dir) {
			tracing::debug!("not watching {}", dir.display());
			return 0;
		}
		if let Err(source) = self.backend.watch(dir) {
			let e = WatchError::Register {
				path: dir.to_path_buf(),
				source,
			};
			tracing::warn!("error adding created directory to watcher: {}", e);
			return 0;
		}
		if self.dirs.insert(dir.to_path_buf()) {
			tracing::debug!("watching new directory {}", dir.display());
		} else {
			tracing::debug!("watching recreated directory {}", dir.display());
		}

		let mut added = 1;
		match subdirectories(dir) {
			Ok(children) => {
				for child in children {
					added += self.extend(&child);
				}
			}
			Err(e) => tracing::warn!("error adding created directory to watcher: {}", e),
		}
		added
	}

	pub fn contains(&self, dir: &Path) -> bool {
		self.dirs.contains(dir)
	}

	pub fn len(&self) -> usize {
		self.dirs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.dirs.is_empty()
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn dirs(&self) -> impl Iterator<Item = &Path> {
		self.dirs.iter().map(PathBuf::as_path)
	}

	pub fn backend(&self) -> &B {
		&self.backend
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use notify::event::{AccessKind, AccessMode, CreateKind, DataChange, MetadataKind, RemoveKind};

	fn event(kind: EventKind, paths: &[&str]) -> Event {
		let mut event = Event::new(kind);
		for p in paths {
			event = event.add_path(PathBuf::from(p));
		}
		event
	}

	#[test]
	fn data_change_is_write() {
		let got = translate(event(
			EventKind::Modify(ModifyKind::Data(DataChange::Content)),
			&["/w/main.rs"],
		));
		assert_eq!(got, vec![FsEvent::Write("/w/main.rs".into())]);
	}

	#[test]
	fn metadata_change_on_file_is_write() {
		let dir = std::env::temp_dir().join(format!("reloader-translate-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let file = dir.join("main.rs");
		std::fs::write(&file, "fn main() {}\n").unwrap();

		let got = translate(
			Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)))
				.add_path(file.clone())
				.add_path(dir.clone()),
		);
		assert_eq!(got, vec![FsEvent::Write(file)]);

		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn metadata_change_on_missing_path_is_ignored() {
		let got = translate(event(
			EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
			&["/nonexistent-reloader-path/main.rs"],
		));
		assert!(got.is_empty());
	}

	#[test]
	fn close_write_is_ignored() {
		let got = translate(event(
			EventKind::Access(AccessKind::Close(AccessMode::Write)),
			&["/w/main.rs"],
		));
		assert!(got.is_empty());
	}

	#[test]
	fn create_and_remove() {
		assert_eq!(
			translate(event(EventKind::Create(CreateKind::Folder), &["/w/new"])),
			vec![FsEvent::Create("/w/new".into())]
		);
		assert_eq!(
			translate(event(EventKind::Remove(RemoveKind::File), &["/w/old"])),
			vec![FsEvent::Remove("/w/old".into())]
		);
	}

	#[test]
	fn rename_into_tree_is_create() {
		assert_eq!(
			translate(event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/w/moved"])),
			vec![FsEvent::Create("/w/moved".into())]
		);
		assert_eq!(
			translate(event(
				EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
				&["/w/a", "/w/b"]
			)),
			vec![FsEvent::Remove("/w/a".into()), FsEvent::Create("/w/b".into())]
		);
	}

	#[test]
	fn vcs_prefix_matches_by_name() {
		assert!(is_vcs_dir(Path::new("/repo/.git")));
		assert!(is_vcs_dir(Path::new("/repo/.github")));
		assert!(!is_vcs_dir(Path::new("/repo/src")));
		assert!(!is_vcs_dir(Path::new("/repo/my.git")));
		assert!(!is_vcs_dir(Path::new(".")));
	}
}
