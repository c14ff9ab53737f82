use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::process::GroupHandle;

/// Status the program exits with after a termination signal.
pub const SHUTDOWN_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationRequest {
	Interrupt,
	Terminate,
}

impl std::fmt::Display for TerminationRequest {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TerminationRequest::Interrupt => write!(f, "SIGINT"),
			TerminationRequest::Terminate => write!(f, "SIGTERM"),
		}
	}
}

/// Kill each group once. Failures are logged, never retried. Returns
/// how many groups were signalled.
pub fn terminate_groups(groups: &[GroupHandle]) -> usize {
	let mut killed = 0;
	for group in groups {
		match group.kill() {
			Ok(pgid) => {
				tracing::debug!("killed process group {}", pgid);
				killed += 1;
			}
			Err(e) => tracing::warn!("{}", e),
		}
	}
	killed
}

/// Turns the first SIGINT/SIGTERM into: kill every managed group, exit 1.
pub struct SignalGateway {
	groups: Vec<GroupHandle>,
}

impl SignalGateway {
	pub fn new(groups: Vec<GroupHandle>) -> Self {
		Self { groups }
	}

	/// Install the handlers now and wait for a signal on a background
	/// task. Must be called from within a tokio runtime.
	pub fn install(self) -> std::io::Result<JoinHandle<()>> {
		let mut interrupt = signal(SignalKind::interrupt())?;
		let mut terminate = signal(SignalKind::terminate())?;

		Ok(tokio::spawn(async move {
			let request = tokio::select! {
				_ = interrupt.recv() => TerminationRequest::Interrupt,
				_ = terminate.recv() => TerminationRequest::Terminate,
			};
			tracing::info!("received {}, shutting down", request);
			terminate_groups(&self.groups);
			std::process::exit(SHUTDOWN_EXIT_CODE);
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_names_the_signal() {
		assert_eq!(TerminationRequest::Interrupt.to_string(), "SIGINT");
		assert_eq!(TerminationRequest::Terminate.to_string(), "SIGTERM");
	}

	#[test]
	fn no_groups_nothing_killed() {
		assert_eq!(terminate_groups(&[]), 0);
	}
}
