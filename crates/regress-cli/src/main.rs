//! Regress CLI: run visual regression tests of a rendering application
//!
//! ## Usage
//!
//! ```bash
//! regress run --app build/bin/app -o out          # Run every test under ./modules
//! regress run --app app -o out --range 0:10       # First ten discovered tests
//! regress list --build-dir build                  # Tests of the modules enabled in a build
//! regress report out                              # Re-render out/report.html
//! regress history base volume -o out              # Runs and series of one test
//! ```

use clap::Parser;
use regress_cli::{handlers, Cli, CliConfig, CliResult, Commands};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let config = CliConfig::from_flags(cli.quiet, cli.verbose, cli.color.clone().into());
    init_logging(&config);
    let mut reporter = config.reporter();

    match cli.command {
        Commands::Run(args) => handlers::execute_run(&mut reporter, &args).map(|_| ()),
        Commands::List(args) => handlers::execute_list(&args),
        Commands::Report(args) => handlers::execute_report(&reporter, &args).map(|_| ()),
        Commands::History(args) => handlers::execute_history(&args),
        Commands::Config(args) => handlers::execute_config(&config, &args),
    }
}

/// `RUST_LOG` wins over the verbosity flags
fn init_logging(config: &CliConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.log_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(config.color.should_color())
        .with_target(false)
        .try_init();
}
