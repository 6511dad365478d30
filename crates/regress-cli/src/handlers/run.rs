//! Run command handler

use super::project::{active_modules, load_tools, module_roots, name_filter, resolve_root};
use super::report::read_fragment;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use crate::RunArgs;
use regress::{ImageCompareConfig, Orchestrator, OrchestratorConfig, RunSummary, TestState};
use std::time::Duration;

/// Build the orchestrator configuration from the command line
pub fn orchestrator_config(args: &RunArgs) -> CliResult<OrchestratorConfig> {
    if !args.timeout.is_finite() || args.timeout <= 0.0 {
        return Err(CliError::invalid_argument(format!(
            "timeout must be a positive number of seconds, got {}",
            args.timeout
        )));
    }

    let root = resolve_root(args.selection.root.as_deref())?;
    let tools = load_tools(root.as_deref(), args.config.as_deref())?;
    let git = args.git.clone().unwrap_or(tools.git);

    let compare = ImageCompareConfig::default()
        .with_allow_mode_mismatch(args.allow_mode_mismatch)
        .with_enhance(args.enhance);

    Ok(OrchestratorConfig::new(
        &args.app,
        &args.output,
        module_roots(&args.selection, root.as_deref())?,
    )
    .with_git(git)
    .with_timeout(Duration::from_secs_f64(args.timeout))
    .with_range(args.selection.range.clone())
    .with_active_modules(active_modules(&args.selection)?)
    .with_compare(compare)
    .with_html_fragments(
        read_fragment(args.header.as_deref())?,
        read_fragment(args.footer.as_deref())?,
    ))
}

/// Execute the run command. A failing test is reported as [`CliError::Regression`].
pub fn execute_run(reporter: &mut ProgressReporter, args: &RunArgs) -> CliResult<RunSummary> {
    let config = orchestrator_config(args)?;
    let orchestrator = Orchestrator::new(config)?;

    reporter.header(&format!("Regression tests of {}", args.app.display()));
    let summary = orchestrator.run_with(name_filter(&args.selection), reporter)?;
    reporter.finish();

    if summary.reports.new_reports().next().is_none() {
        reporter.warning("no test matched the selection");
    }

    reporter.summary(reporter.tally(), reporter.elapsed());
    reporter.info(&format!("Report: {}", summary.html.display()));

    if summary.success {
        Ok(summary)
    } else {
        let failed = summary
            .reports
            .new_reports()
            .filter(|report| report.state() == TestState::Fail)
            .count();
        Err(CliError::Regression {
            failed,
            report: summary.html.display().to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::SelectionArgs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn args(tmp: &TempDir) -> RunArgs {
        RunArgs {
            app: tmp.path().join("app"),
            output: tmp.path().join("out"),
            selection: SelectionArgs {
                module_roots: vec![tmp.path().join("modules")],
                ..SelectionArgs::default()
            },
            config: None,
            git: None,
            timeout: 15.0,
            allow_mode_mismatch: false,
            enhance: 10,
            header: None,
            footer: None,
        }
    }

    #[test]
    fn test_config_from_args() {
        let tmp = TempDir::new().unwrap();
        let mut args = args(&tmp);
        args.git = Some(PathBuf::from("/opt/git"));
        args.timeout = 2.5;
        args.allow_mode_mismatch = true;
        args.enhance = 3;
        args.selection.range = Some(0..2);

        let config = orchestrator_config(&args).unwrap();
        assert_eq!(config.app, tmp.path().join("app"));
        assert_eq!(config.module_roots, vec![tmp.path().join("modules")]);
        assert_eq!(config.git, PathBuf::from("/opt/git"));
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.range, Some(0..2));
        assert!(config.compare.allow_mode_mismatch);
        assert_eq!(config.compare.enhance, 3);
        assert_eq!(config.header, None);
    }

    #[test]
    fn test_config_reads_fragments() {
        let tmp = TempDir::new().unwrap();
        let mut args = args(&tmp);
        let header = tmp.path().join("header.html");
        std::fs::write(&header, "<b>nightly</b>").unwrap();
        args.header = Some(header);

        let config = orchestrator_config(&args).unwrap();
        assert_eq!(config.header.as_deref(), Some("<b>nightly</b>"));
    }

    #[test]
    fn test_rejects_bad_timeout() {
        let tmp = TempDir::new().unwrap();
        let mut args = args(&tmp);
        args.timeout = 0.0;
        assert!(matches!(
            orchestrator_config(&args),
            Err(CliError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_missing_output_dir() {
        let tmp = TempDir::new().unwrap();
        let err = execute_run(&mut ProgressReporter::new(false, true), &args(&tmp)).unwrap_err();
        assert!(matches!(
            err,
            CliError::Regress(regress::RegressError::NotFound { .. })
        ));
    }
}
