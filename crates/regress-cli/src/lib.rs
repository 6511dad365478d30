//! Regress CLI Library
//!
//! Command-line interface for the Regress visual regression harness.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::format_push_string)] // String building is clear and correct
#![allow(clippy::missing_errors_doc)] // Error types are self-documenting

mod commands;
mod config;
mod error;
pub mod handlers;
mod output;

pub use commands::{
    parse_range, Cli, ColorArg, Commands, ConfigArgs, HistoryArgs, ListArgs, ListFormat,
    ReportArgs, RunArgs, SelectionArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{ProgressReporter, Tally};
