//! Report command handler

use crate::error::CliResult;
use crate::output::ProgressReporter;
use crate::ReportArgs;
use std::path::{Path, PathBuf};

/// Execute the report command
pub fn execute_report(reporter: &ProgressReporter, args: &ReportArgs) -> CliResult<PathBuf> {
    let header = read_fragment(args.header.as_deref())?;
    let footer = read_fragment(args.footer.as_deref())?;
    let (html, copy) = regress::render_report(&args.output, header, footer)?;
    reporter.success(&format!("Report written to {}", html.display()));
    reporter.info(&format!("Copy kept as {}", copy.display()));
    Ok(html)
}

/// Read an optional HTML fragment file
pub fn read_fragment(path: Option<&Path>) -> CliResult<Option<String>> {
    path.map(std::fs::read_to_string)
        .transpose()
        .map_err(Into::into)
}
