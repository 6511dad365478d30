//! CLI configuration built from the global flags

use crate::output::ProgressReporter;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;

/// How much the CLI prints and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    /// Only failing tests and errors
    Quiet,
    /// PASS/FAIL lines and the summary
    #[default]
    Normal,
    /// Also per-test `info` events
    Verbose,
    /// Also every command line
    Debug,
}

impl Verbosity {
    /// `-q` wins over any number of `-v`
    #[must_use]
    pub const fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    /// Check if quiet mode
    #[must_use]
    pub const fn is_quiet(self) -> bool {
        matches!(self, Self::Quiet)
    }

    /// Log filter used when `RUST_LOG` is not set
    #[must_use]
    pub const fn log_filter(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn",
            Self::Verbose => "info",
            Self::Debug => "debug",
        }
    }
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorChoice {
    /// Always use colors
    Always,
    /// Color when stderr is a terminal
    #[default]
    Auto,
    /// Never use colors
    Never,
}

impl ColorChoice {
    /// Progress and logs go to stderr, so that is the stream probed in auto mode
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::stderr().is_terminal(),
        }
    }
}

/// Settings shared by every subcommand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Verbosity level
    pub verbosity: Verbosity,
    /// Color output choice
    pub color: ColorChoice,
}

impl CliConfig {
    /// Build from `-q`, the `-v` count and `--color`
    #[must_use]
    pub const fn from_flags(quiet: bool, verbose: u8, color: ColorChoice) -> Self {
        Self {
            verbosity: Verbosity::from_flags(quiet, verbose),
            color,
        }
    }

    /// Reporter printing test progress with these settings
    #[must_use]
    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.color.should_color(), self.verbosity.is_quiet())
    }
}
