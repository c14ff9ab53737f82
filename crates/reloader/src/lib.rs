//! # reloader
//!
//! Run a shell command and restart it whenever something in the directory
//! tree changes.
//!
//! The command runs in its own process group, so a restart (or Ctrl-C)
//! kills everything it forked. Every directory under the watch root is
//! watched except version-control metadata (`.git*`), and directories
//! created later are picked up as they appear.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use reloader::Config;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config::new("cargo run", "").with_watch_root(".");
//! reloader::run(&config).await.unwrap();
//! # }
//! ```

pub mod config;
pub mod process;
pub mod signals;
pub mod supervisor;
pub mod watch;

pub use config::Config;
pub use process::{ExitReport, GroupHandle, ManagedProcess, ProcessState, TerminateError};
pub use signals::{SignalGateway, TerminationRequest, SHUTDOWN_EXIT_CODE};
pub use supervisor::{run, RunSummary, SetupError, Supervisor};
pub use watch::{DirectoryWatchSet, EventStreams, FsEvent, NotifyBackend, WatchBackend, WatchError};
