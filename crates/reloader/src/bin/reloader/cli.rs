use clap::Parser;
use reloader::config::DEFAULT_SHELL;
use reloader::Config;
use std::path::PathBuf;

/// Long flags that may also be spelled with a single dash (`-cmd make`).
const SINGLE_DASH_FLAGS: &[&str] = &["cmd", "dir", "watch", "shell", "verbose"];

/// Run a shell command and restart it whenever a file in the tree changes.
#[derive(Parser, Debug)]
#[command(name = "reloader", version, about)]
pub struct Cli {
	/// Command to run
	#[arg(long, default_value = "")]
	pub cmd: String,

	/// Directory to run the command in (default: current directory)
	#[arg(long, default_value = "")]
	pub dir: String,

	/// Directory tree to watch
	#[arg(long, default_value = ".")]
	pub watch: PathBuf,

	/// Shell used to interpret the command
	#[arg(long, default_value = DEFAULT_SHELL)]
	pub shell: String,

	/// Debug logging (watch registrations, reaped processes)
	#[arg(short, long)]
	pub verbose: bool,
}

impl Cli {
	pub fn parse_args() -> Self {
		Self::parse_from(normalize_args(std::env::args()))
	}

	pub fn config(&self) -> Config {
		Config::new(self.cmd.clone(), &self.dir)
			.with_watch_root(&self.watch)
			.with_shell(self.shell.clone())
	}
}

/// Rewrite `-cmd` / `-cmd=x` style flags to `--cmd` so clap accepts them.
/// Nothing after a bare `--` is touched.
pub fn normalize_args<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
	let mut passthrough = false;
	args.into_iter()
		.map(|arg| {
			if passthrough {
				return arg;
			}
			if arg == "--" {
				passthrough = true;
				return arg;
			}
			match arg.strip_prefix('-') {
				Some(rest) if !rest.starts_with('-') => {
					let name = rest.split('=').next().unwrap_or(rest);
					if SINGLE_DASH_FLAGS.contains(&name) {
						format!("-{}", arg)
					} else {
						arg
					}
				}
				_ => arg,
			}
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args(list: &[&str]) -> Vec<String> {
		list.iter().map(|s| s.to_string()).collect()
	}

	fn parse(list: &[&str]) -> Cli {
		Cli::try_parse_from(normalize_args(args(list))).unwrap()
	}

	#[test]
	fn single_dash_long_flags() {
		let got = normalize_args(args(&["reloader", "-cmd", "go run .", "-dir=api"]));
		assert_eq!(got, args(&["reloader", "--cmd", "go run .", "--dir=api"]));
	}

	#[test]
	fn other_args_untouched() {
		let got = normalize_args(args(&["reloader", "-v", "--cmd", "x", "-V"]));
		assert_eq!(got, args(&["reloader", "-v", "--cmd", "x", "-V"]));
	}

	#[test]
	fn stops_at_double_dash() {
		let got = normalize_args(args(&["reloader", "--", "-cmd"]));
		assert_eq!(got, args(&["reloader", "--", "-cmd"]));
	}

	#[test]
	fn go_style_invocation() {
		let cli = parse(&["reloader", "-cmd", "sleep 100", "-dir", "."]);
		let config = cli.config();
		assert_eq!(config.command, "sleep 100");
		assert_eq!(config.dir, Some(PathBuf::from(".")));
		assert_eq!(config.watch_root, PathBuf::from("."));
		assert!(!cli.verbose);
	}

	#[test]
	fn defaults() {
		let config = parse(&["reloader"]).config();
		assert_eq!(config.command, "");
		assert_eq!(config.dir, None);
		assert_eq!(config.shell, "sh");
	}

	#[test]
	fn watch_root_and_verbose() {
		let cli = parse(&["reloader", "--cmd", "make", "-watch", "src", "-v"]);
		assert!(cli.verbose);
		assert_eq!(cli.config().watch_root, PathBuf::from("src"));
	}
}
