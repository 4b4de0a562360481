use std::path::PathBuf;
use std::process::ExitCode;

// used for the global flags
use clap::Parser;
// used for logging to stderr
use tracing_subscriber::EnvFilter;

use falocalrepo::config::{Config, Overrides};
use falocalrepo::dispatch::Dispatcher;
use falocalrepo::error::RepoError;

#[derive(Debug, Parser)]
#[command(
    name = "falocalrepo",
    version,
    about = "Search, export and edit a local archive of users, submissions and journals",
    long_about = None
)]
struct Cli {
    /// Colour the table output.
    #[arg(long, conflicts_with = "no_color")]
    color: bool,
    /// Plain table output.
    #[arg(long)]
    no_color: bool,
    /// Log debug messages to stderr.
    #[arg(long)]
    debug: bool,
    /// Database file, or a folder holding FA.db.
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,
    /// Command, operation and their arguments (try 'help').
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    tokens: Vec<String>,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_with_error(error: &RepoError) -> ExitCode {
    eprintln!("{error}");
    ExitCode::from(error.exit_code())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let color = match (cli.color, cli.no_color) {
        (_, true) => Some(false),
        (true, false) => Some(true),
        (false, false) => None,
    };
    let overrides = Overrides { debug: cli.debug, database: cli.database, color };
    let config = match Config::load(overrides) {
        Ok(config) => config,
        Err(error) => return exit_with_error(&error),
    };
    init_tracing(config.debug);
    colored::control::set_override(config.color);

    let mut dispatcher = Dispatcher::new(config);
    match dispatcher.dispatch(&cli.tokens) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => exit_with_error(&error),
    }
}
