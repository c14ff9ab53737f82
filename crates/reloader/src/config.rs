use std::path::{Path, PathBuf};

pub const DEFAULT_SHELL: &str = "sh";

/// Everything the supervisor needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	/// Raw command line handed to the shell with `-c`.
	pub command: String,
	/// Working directory for the command. `None` inherits ours.
	pub dir: Option<PathBuf>,
	/// Root of the watched tree.
	pub watch_root: PathBuf,
	pub shell: String,
}

impl Config {
	/// An empty `dir` means "run where the supervisor runs".
	pub fn new(command: impl Into<String>, dir: &str) -> Self {
		let dir = if dir.is_empty() { None } else { Some(PathBuf::from(dir)) };
		Self {
			command: command.into(),
			dir,
			watch_root: PathBuf::from("."),
			shell: DEFAULT_SHELL.to_string(),
		}
	}

	pub fn with_watch_root(mut self, root: impl AsRef<Path>) -> Self {
		self.watch_root = root.as_ref().to_path_buf();
		self
	}

	pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
		self.shell = shell.into();
		self
	}
}
