use std::future::poll_fn;
use std::path::PathBuf;
use std::task::Poll;

use crate::config::Config;
use crate::process::{ExitReport, ManagedProcess};
use crate::signals::SignalGateway;
use crate::watch::{DirectoryWatchSet, EventStreams, FsEvent, NotifyBackend, WatchBackend, WatchError};

/// Setup failures. Any of these ends the program before a command runs.
#[derive(Debug)]
pub enum SetupError {
	Root { path: PathBuf, source: std::io::Error },
	Signals(std::io::Error),
	Watch(WatchError),
}

impl std::fmt::Display for SetupError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SetupError::Root { path, source } => {
				write!(f, "cannot watch {}: {}", path.display(), source)
			}
			SetupError::Signals(e) => write!(f, "failed to install signal handlers: {}", e),
			SetupError::Watch(e) => write!(f, "{}", e),
		}
	}
}

impl std::error::Error for SetupError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			SetupError::Root { source, .. } => Some(source),
			SetupError::Signals(e) => Some(e),
			SetupError::Watch(e) => Some(e),
		}
	}
}

impl From<WatchError> for SetupError {
	fn from(e: WatchError) -> Self {
		SetupError::Watch(e)
	}
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
	pub writes: u64,
	/// Process groups successfully killed for a restart.
	pub reloads: u64,
	/// Directory registrations made for create events, recreated ones included.
	pub directories_added: u64,
	pub watch_errors: u64,
	pub exits: u64,
}

pub struct Supervisor<B> {
	processes: Vec<ManagedProcess>,
	watch_set: DirectoryWatchSet<B>,
	summary: RunSummary,
}

impl<B: WatchBackend> Supervisor<B> {
	pub fn new(processes: Vec<ManagedProcess>, watch_set: DirectoryWatchSet<B>) -> Self {
		Self {
			processes,
			watch_set,
			summary: RunSummary::default(),
		}
	}

	pub fn processes(&self) -> &[ManagedProcess] {
		&self.processes
	}

	pub fn watch_set(&self) -> &DirectoryWatchSet<B> {
		&self.watch_set
	}

	pub fn summary(&self) -> &RunSummary {
		&self.summary
	}

	pub fn start_all(&mut self) {
		for process in &mut self.processes {
			process.start();
		}
	}

	/// Kill every group, then start every command again. Returns how many
	/// groups were actually signalled.
	pub fn restart_all(&mut self) -> usize {
		let mut signalled = 0;
		for process in &mut self.processes {
			match process.terminate() {
				Ok(_) => {
					println!("Reloading...");
					signalled += 1;
				}
				Err(e) => tracing::warn!("{}", e),
			}
		}
		self.summary.reloads += signalled as u64;
		self.start_all();
		signalled
	}

	fn terminate_all(&mut self) {
		for process in &mut self.processes {
			match process.terminate() {
				Ok(pgid) => tracing::debug!("killed process group {}", pgid),
				Err(e) => tracing::debug!("{}", e),
			}
		}
	}

	pub fn handle_event(&mut self, event: FsEvent) {
		match event {
			FsEvent::Write(path) => {
				tracing::debug!("modified: {}", path.display());
				self.summary.writes += 1;
				self.restart_all();
			}
			FsEvent::Create(path) => {
				let metadata = match std::fs::metadata(&path) {
					Ok(m) => m,
					Err(e) => {
						tracing::warn!("error fetching info for {}: {}", path.display(), e);
						return;
					}
				};
				if metadata.is_dir() {
					self.summary.directories_added += self.watch_set.extend(&path) as u64;
				}
			}
			FsEvent::Remove(path) => {
				tracing::trace!("ignoring removal of {}", path.display());
			}
		}
	}

	pub fn handle_watch_error(&mut self, err: WatchError) {
		self.summary.watch_errors += 1;
		tracing::error!("{}", err);
	}

	pub fn handle_exit(&mut self, index: usize, report: ExitReport) {
		let Some(process) = self.processes.get_mut(index) else {
			return;
		};
		if process.observe_exit(&report) {
			self.summary.exits += 1;
			match report.pid {
				Some(pid) => tracing::info!(
					"`{}` (pid {}) exited: {}",
					process.command(),
					pid,
					report.describe()
				),
				None => tracing::info!("`{}` did not start: {}", process.command(), report.describe()),
			}
		} else {
			tracing::debug!(
				"reaped replaced generation {} ({})",
				report.generation,
				report.describe()
			);
		}
	}

	/// Start every command and react to events until the event stream
	/// closes. Running commands are killed on the way out.
	pub async fn run(mut self, streams: EventStreams) -> RunSummary {
		let EventStreams {
			mut events,
			mut errors,
		} = streams;

		self.start_all();

		loop {
			tokio::select! {
				event = events.recv() => match event {
					Some(event) => self.handle_event(event),
					None => {
						tracing::info!("filesystem event stream closed");
						break;
					}
				},
				Some(err) = errors.recv() => self.handle_watch_error(err),
				(index, report) = next_exit(&mut self.processes) => self.handle_exit(index, report),
			}
		}

		self.terminate_all();
		self.summary
	}
}

/// Resolves with the first exit report available on any process.
async fn next_exit(processes: &mut [ManagedProcess]) -> (usize, ExitReport) {
	poll_fn(|cx| {
		for (index, process) in processes.iter_mut().enumerate() {
			if let Poll::Ready(Some(report)) = process.poll_exit(cx) {
				return Poll::Ready((index, report));
			}
		}
		Poll::Pending
	})
	.await
}

/// Wire everything together for the configured command and run until
/// the watcher shuts down. A termination signal exits the process from
/// inside the signal gateway and never returns here.
pub async fn run(config: &Config) -> Result<RunSummary, SetupError> {
	let root = config
		.watch_root
		.canonicalize()
		.map_err(|source| SetupError::Root {
			path: config.watch_root.clone(),
			source,
		})?;

	if config.command.trim().is_empty() {
		tracing::warn!("no command given, the shell will exit immediately");
	}

	let processes = vec![
		ManagedProcess::new(config.command.clone(), config.dir.clone()).with_shell(config.shell.clone()),
	];

	let groups = processes.iter().map(ManagedProcess::group_handle).collect();
	SignalGateway::new(groups).install().map_err(SetupError::Signals)?;

	let (backend, streams) = NotifyBackend::new()?;
	let watch_set = DirectoryWatchSet::build(backend, &root)?;

	let summary = Supervisor::new(processes, watch_set).run(streams).await;
	tracing::debug!("{:?}", summary);
	Ok(summary)
}
