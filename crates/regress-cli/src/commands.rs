//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::ops::Range;
use std::path::PathBuf;

/// Regress: run visual regression tests of a rendering application
#[derive(Parser, Debug)]
#[command(name = "regress")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run regression tests and write report.json, report.html and history
    Run(RunArgs),

    /// List the tests a run would execute
    List(ListArgs),

    /// Re-render the HTML report of an output directory
    Report(ReportArgs),

    /// Show the recorded history of one test
    History(HistoryArgs),

    /// Show resolved project root and tool paths
    Config(ConfigArgs),
}

/// Which tests to consider
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Directory that contains the modules (repeatable). Defaults to `<root>/modules`
    #[arg(short, long = "modules", value_name = "DIR")]
    pub module_roots: Vec<PathBuf>,

    /// Project root. Defaults to the first ancestor of the current directory with the root markers
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Only tests whose discovery index is in START:END (END exclusive)
    #[arg(long, value_parser = parse_range, value_name = "START:END")]
    pub range: Option<Range<usize>>,

    /// Only tests whose `module/test` name contains TEXT
    #[arg(short, long, value_name = "TEXT")]
    pub filter: Option<String>,

    /// Only tests of these modules (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "NAMES", conflicts_with = "build_dir")]
    pub active_modules: Option<Vec<String>>,

    /// Take the active modules from `<DIR>/CMakeCache.txt`
    #[arg(long, value_name = "DIR")]
    pub build_dir: Option<PathBuf>,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Rendering application to test
    #[arg(short, long, env = "REGRESS_APP", value_name = "PATH")]
    pub app: PathBuf,

    /// Output directory, must exist
    #[arg(short, long, env = "REGRESS_OUTPUT", value_name = "DIR")]
    pub output: PathBuf,

    /// Test selection
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Tool config file read after `<root>/regress.ini`
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Version-control executable, overrides the config files
    #[arg(long, value_name = "PATH")]
    pub git: Option<PathBuf>,

    /// Deadline per workspace in seconds
    #[arg(short, long, default_value = "15", value_name = "SECONDS")]
    pub timeout: f64,

    /// Compare images whose pixel modes differ
    #[arg(long)]
    pub allow_mode_mismatch: bool,

    /// Scale factor applied to the difference image
    #[arg(long, default_value = "10")]
    pub enhance: u8,

    /// HTML fragment inserted at the top of the report
    #[arg(long, value_name = "FILE")]
    pub header: Option<PathBuf>,

    /// HTML fragment inserted at the bottom of the report
    #[arg(long, value_name = "FILE")]
    pub footer: Option<PathBuf>,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Test selection
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ListFormat,
}

/// Listing output format
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListFormat {
    /// One `module/test` per line
    #[default]
    Text,
    /// JSON array of tests
    Json,
}

/// Arguments for the report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Output directory of an earlier run
    pub output: PathBuf,

    /// HTML fragment inserted at the top of the report
    #[arg(long, value_name = "FILE")]
    pub header: Option<PathBuf>,

    /// HTML fragment inserted at the bottom of the report
    #[arg(long, value_name = "FILE")]
    pub footer: Option<PathBuf>,
}

/// Arguments for the history command
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Module name
    pub module: String,

    /// Test name
    pub test: String,

    /// Output directory holding report.sqlite
    #[arg(short, long, env = "REGRESS_OUTPUT", value_name = "DIR")]
    pub output: PathBuf,

    /// Number of runs to list
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Project root. Defaults to the first ancestor of the current directory with the root markers
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Tool config file read after `<root>/regress.ini`
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Parse `START:END` or `START..END` into a half-open range
pub fn parse_range(text: &str) -> Result<Range<usize>, String> {
    let (start, end) = text
        .split_once(':')
        .or_else(|| text.split_once(".."))
        .ok_or_else(|| format!("expected START:END, got '{text}'"))?;
    let parse = |s: &str, default: usize| -> Result<usize, String> {
        let s = s.trim();
        if s.is_empty() {
            Ok(default)
        } else {
            s.parse().map_err(|_| format!("'{s}' is not a test index"))
        }
    };
    let start = parse(start, 0)?;
    let end = parse(end, usize::MAX)?;
    if start > end {
        return Err(format!("range start {start} is after end {end}"));
    }
    Ok(start..end)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    mod cli_tests {
        use super::*;

        #[test]
        fn test_parse_run() {
            let cli = Cli::parse_from([
                "regress", "run", "--app", "bin/app", "-o", "out", "-m", "modules", "-m", "extra",
                "--timeout", "2.5", "--range", "1:4",
            ]);
            let Commands::Run(args) = cli.command else {
                panic!("expected Run command");
            };
            assert_eq!(args.app, PathBuf::from("bin/app"));
            assert_eq!(args.output, PathBuf::from("out"));
            assert_eq!(args.selection.module_roots.len(), 2);
            assert_eq!(args.selection.range, Some(1..4));
            assert!((args.timeout - 2.5).abs() < f64::EPSILON);
            assert_eq!(args.enhance, 10);
            assert!(!args.allow_mode_mismatch);
        }

        #[test]
        fn test_parse_active_modules() {
            let cli = Cli::parse_from(["regress", "list", "--active-modules", "base,OpenGL"]);
            let Commands::List(args) = cli.command else {
                panic!("expected List command");
            };
            assert_eq!(
                args.selection.active_modules,
                Some(vec!["base".to_string(), "OpenGL".to_string()])
            );
            assert_eq!(args.format, ListFormat::Text);
        }

        #[test]
        fn test_active_modules_conflict_with_build_dir() {
            let result = Cli::try_parse_from([
                "regress", "list", "--active-modules", "base", "--build-dir", "build",
            ]);
            assert!(result.is_err());
        }

        #[test]
        fn test_parse_history() {
            let cli = Cli::parse_from(["regress", "history", "base", "volume", "-o", "out"]);
            let Commands::History(args) = cli.command else {
                panic!("expected History command");
            };
            assert_eq!(args.module, "base");
            assert_eq!(args.test, "volume");
            assert_eq!(args.limit, 10);
        }

        #[test]
        fn test_global_flags() {
            let cli = Cli::parse_from(["regress", "-vv", "--color", "never", "config"]);
            assert_eq!(cli.verbose, 2);
            assert!(matches!(cli.color, ColorArg::Never));
            assert!(matches!(cli.command, Commands::Config(_)));
        }

        #[test]
        fn test_subcommand_required() {
            assert!(Cli::try_parse_from(["regress"]).is_err());
        }
    }

    mod range_tests {
        use super::*;

        #[test]
        fn test_colon_and_dots() {
            assert_eq!(parse_range("2:5").unwrap(), 2..5);
            assert_eq!(parse_range("2..5").unwrap(), 2..5);
        }

        #[test]
        fn test_open_ends() {
            assert_eq!(parse_range(":3").unwrap(), 0..3);
            assert_eq!(parse_range("3:").unwrap(), 3..usize::MAX);
        }

        #[test]
        fn test_rejects_garbage() {
            assert!(parse_range("3").is_err());
            assert!(parse_range("a:b").is_err());
            assert!(parse_range("5:2").is_err());
        }
    }

    #[test]
    fn test_color_arg_conversion() {
        use crate::config::ColorChoice;

        let never: ColorChoice = ColorArg::Never.into();
        assert_eq!(never, ColorChoice::Never);
        let auto: ColorChoice = ColorArg::Auto.into();
        assert_eq!(auto, ColorChoice::Auto);
    }
}
