mod cli;

use cli::Cli;
use owo_colors::OwoColorize;
use tracing::Level;

#[tokio::main]
async fn main() {
	let cli = Cli::parse_args();

	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_target(false)
		.with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
		.init();

	tracing::debug!(?cli, "parsed CLI arguments");

	let config = cli.config();
	if let Err(e) = reloader::run(&config).await {
		eprintln!("{} {}", "error:".red().bold(), e);
		std::process::exit(1);
	}
}
