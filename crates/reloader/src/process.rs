use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::task::{Context, Poll};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::config::DEFAULT_SHELL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
	Unstarted,
	Running { pid: u32 },
	Exited { code: Option<i32> },
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running { .. })
	}
}

/// What the wait task observed when a spawned command went away.
#[derive(Debug)]
pub struct ExitReport {
	/// Which `start()` this report belongs to.
	pub generation: u64,
	/// `None` when the spawn itself failed.
	pub pid: Option<u32>,
	pub outcome: Result<ExitStatus, std::io::Error>,
}

impl ExitReport {
	pub fn code(&self) -> Option<i32> {
		self.outcome.as_ref().ok().and_then(|s| s.code())
	}

	pub fn describe(&self) -> String {
		match &self.outcome {
			Ok(status) => status.to_string(),
			Err(e) => format!("error: {}", e),
		}
	}
}

#[derive(Debug)]
pub enum TerminateError {
	/// No process group has been spawned since the last terminate.
	NotStarted,
	/// `killpg` was refused, typically ESRCH once the group is gone.
	Signal { pgid: Pid, errno: Errno },
}

impl std::fmt::Display for TerminateError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TerminateError::NotStarted => write!(f, "no process group to kill"),
			TerminateError::Signal { pgid, errno } => {
				write!(f, "failed to kill process group {}: {}", pgid, errno)
			}
		}
	}
}

impl std::error::Error for TerminateError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			TerminateError::NotStarted => None,
			TerminateError::Signal { errno, .. } => Some(errno),
		}
	}
}

/// SIGKILL every member of the group, not only the shell that leads it.
pub fn kill_group(pgid: Pid) -> Result<(), TerminateError> {
	killpg(pgid, Signal::SIGKILL).map_err(|errno| TerminateError::Signal { pgid, errno })
}

/// Read-only view of a managed process's current group, usable from
/// another task.
#[derive(Clone)]
pub struct GroupHandle {
	group: watch::Receiver<Option<Pid>>,
}

impl GroupHandle {
	pub fn pgid(&self) -> Option<Pid> {
		*self.group.borrow()
	}

	pub fn kill(&self) -> Result<Pid, TerminateError> {
		let pgid = self.pgid().ok_or(TerminateError::NotStarted)?;
		kill_group(pgid)?;
		Ok(pgid)
	}
}

/// One shell command, respawned in place on every restart.
///
/// Each spawn gets its own process group so that `terminate()` reaches
/// everything the command forks. The exit of every spawn lands on a
/// single-slot completion channel exactly once.
pub struct ManagedProcess {
	command: String,
	dir: Option<PathBuf>,
	shell: String,
	state: ProcessState,
	generation: u64,
	/// Group still owed a kill. Cleared by `terminate()`, and once an
	/// exited group is confirmed empty.
	pgid: Option<Pid>,
	/// Last group published to the signal gateway. Only ever replaced by
	/// the next spawn, so there is no window where it reads `None`
	/// between a kill and the respawn.
	group: watch::Sender<Option<Pid>>,
	exit_tx: mpsc::Sender<ExitReport>,
	exit_rx: mpsc::Receiver<ExitReport>,
}

impl ManagedProcess {
	pub fn new(command: impl Into<String>, dir: Option<PathBuf>) -> Self {
		let (group, _) = watch::channel(None);
		let (exit_tx, exit_rx) = mpsc::channel(1);
		Self {
			command: command.into(),
			dir,
			shell: DEFAULT_SHELL.to_string(),
			state: ProcessState::Unstarted,
			generation: 0,
			pgid: None,
			group,
			exit_tx,
			exit_rx,
		}
	}

	pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
		self.shell = shell.into();
		self
	}

	pub fn command(&self) -> &str {
		&self.command
	}

	pub fn dir(&self) -> Option<&Path> {
		self.dir.as_deref()
	}

	pub fn state(&self) -> ProcessState {
		self.state
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn pid(&self) -> Option<u32> {
		match self.state {
			ProcessState::Running { pid } => Some(pid),
			_ => None,
		}
	}

	pub fn pgid(&self) -> Option<Pid> {
		self.pgid
	}

	pub fn group_handle(&self) -> GroupHandle {
		GroupHandle {
			group: self.group.subscribe(),
		}
	}

	/// Spawn the command and hand its wait to a background task.
	///
	/// Must be called from within a tokio runtime. A spawn failure is not
	/// returned; it is delivered as this generation's exit report.
	pub fn start(&mut self) {
		while let Ok(stale) = self.exit_rx.try_recv() {
			tracing::debug!(
				"discarding exit of generation {} ({})",
				stale.generation,
				stale.describe()
			);
		}

		self.generation += 1;
		let generation = self.generation;
		let tx = self.exit_tx.clone();

		let mut cmd = Command::new(&self.shell);
		cmd.args(["-c", &self.command]).process_group(0);
		if let Some(dir) = &self.dir {
			cmd.current_dir(dir);
		}

		let mut child = match cmd.spawn() {
			Ok(child) => child,
			Err(e) => {
				tracing::error!("failed to spawn `{}`: {}", self.command, e);
				self.state = ProcessState::Unstarted;
				self.pgid = None;
				self.group.send_replace(None);
				let report = ExitReport {
					generation,
					pid: None,
					outcome: Err(e),
				};
				tokio::spawn(async move {
					let _ = tx.send(report).await;
				});
				return;
			}
		};

		let pid = child.id();
		if let Some(pid) = pid {
			// process_group(0) makes the child's pid its group id
			let pgid = Pid::from_raw(pid as i32);
			self.pgid = Some(pgid);
			self.group.send_replace(Some(pgid));
			self.state = ProcessState::Running { pid };
			tracing::info!("started `{}` (pid {})", self.command, pid);
		}

		tokio::spawn(async move {
			let outcome = child.wait().await;
			let _ = tx.send(ExitReport { generation, pid, outcome }).await;
		});
	}

	/// Kill the whole process group. Fire-and-forget: the old group may
	/// still be tearing down when this returns.
	pub fn terminate(&mut self) -> Result<Pid, TerminateError> {
		let pgid = self.pgid.take().ok_or(TerminateError::NotStarted)?;
		self.state = ProcessState::Unstarted;
		kill_group(pgid)?;
		Ok(pgid)
	}

	/// Record an exit report taken off the completion channel. Reports
	/// from replaced generations are ignored.
	///
	/// The group id is kept while descendants of the exited leader are
	/// still in it, and forgotten once the group is empty so a recycled
	/// pid is never signalled.
	pub fn observe_exit(&mut self, report: &ExitReport) -> bool {
		if report.generation != self.generation {
			return false;
		}
		if self.state.is_running() || report.pid.is_none() {
			self.state = ProcessState::Exited { code: report.code() };
		}
		if let Some(pgid) = self.pgid {
			if killpg(pgid, None) == Err(Errno::ESRCH) {
				self.pgid = None;
				self.group.send_replace(None);
			}
		}
		true
	}

	pub async fn wait_exit(&mut self) -> Option<ExitReport> {
		self.exit_rx.recv().await
	}

	pub fn poll_exit(&mut self, cx: &mut Context<'_>) -> Poll<Option<ExitReport>> {
		self.exit_rx.poll_recv(cx)
	}
}
