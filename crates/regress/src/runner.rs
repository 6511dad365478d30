//! Runs the rendering application for one test.
//!
//! Command line contract:
//!
//! ```text
//! <app> -q -o <outputdir> -g screenshot.png -s imgtest/UPN -l log.txt -w <workspace> [-p <script>]
//! ```
//!
//! The working directory of the child is the directory of `<app>`.

use crate::discovery::Test;
use crate::paths::absolute;
use crate::process::{command_line, run_with_timeout};
use crate::report::RunReport;
use crate::result::{RegressError, RegressResult};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Default per-workspace deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Screenshot file written by the application
pub const SCREENSHOT_NAME: &str = "screenshot.png";
/// Log file written by the application
pub const LOG_NAME: &str = "log.txt";
/// Directory of produced images inside a run directory
pub const IMGTEST_DIR: &str = "imgtest";
/// Image dump pattern; `UPN` asks the application to use processor names
pub const IMAGE_DUMP_PATTERN: &str = "imgtest/UPN";
/// Command transcript written into every run directory
pub const COMMAND_FILE: &str = "command.txt";

/// Drives the external rendering application
#[derive(Debug, Clone)]
pub struct AppRunner {
    executable: PathBuf,
    timeout: Duration,
}

impl AppRunner {
    /// Create a runner for `executable`.
    ///
    /// # Errors
    ///
    /// Returns [`RegressError::ToolNotFound`] if the executable does not exist.
    pub fn new(executable: &Path) -> RegressResult<Self> {
        if !executable.is_file() {
            return Err(RegressError::tool_not_found(
                executable.display().to_string(),
            ));
        }
        Ok(Self {
            executable: absolute(executable)?,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Override the per-workspace deadline
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executable path
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Deadline per workspace
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the command for one workspace
    #[must_use]
    pub fn command(&self, run_dir: &Path, workspace: &Path, script: Option<&Path>) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg("-q")
            .arg("-o")
            .arg(run_dir)
            .arg("-g")
            .arg(SCREENSHOT_NAME)
            .arg("-s")
            .arg(IMAGE_DUMP_PATTERN)
            .arg("-l")
            .arg(LOG_NAME)
            .arg("-w")
            .arg(workspace);
        if let Some(script) = script {
            command.arg("-p").arg(script);
        }
        if let Some(dir) = self.executable.parent() {
            command.current_dir(dir);
        }
        command
    }

    /// Run every workspace of `test` into a fresh run directory under `output_dir`.
    ///
    /// The run directory is `<output_dir>/<module>/<test>/<date>` where `<date>`
    /// comes from `report.date`. Several workspaces are run in order; their
    /// streams and commands are concatenated, elapsed times summed, the first
    /// non-zero return code wins and any timeout marks the whole run.
    ///
    /// # Errors
    ///
    /// A missing executable and failures to create the run directory are
    /// errors. Everything else the child does is recorded in the report.
    pub fn run(
        &self,
        test: &Test,
        mut report: RunReport,
        output_dir: &Path,
    ) -> RegressResult<RunReport> {
        let run_dir = absolute(output_dir)?
            .join(&test.module)
            .join(&test.name)
            .join(report.run_dir_name());
        std::fs::create_dir_all(run_dir.join(IMGTEST_DIR))?;

        report.outputdir = run_dir.clone();
        report.screenshot = SCREENSHOT_NAME.to_string();
        report.log = LOG_NAME.to_string();
        report.returncode = None;
        report.timeout = false;
        report.elapsed_time = 0.0;

        let script = (!report.script.is_empty()).then(|| PathBuf::from(&report.script));
        let mut commands = Vec::new();

        for (i, workspace) in test.workspaces.iter().enumerate() {
            let mut command = self.command(&run_dir, workspace, script.as_deref());
            let line = command_line(&command);
            tracing::debug!(test = %test.key(), command = %line, "running workspace");

            let output = run_with_timeout(&mut command, self.timeout)?;

            if i == 0 || report.returncode == Some(0) {
                report.returncode = output.returncode;
            }
            report.timeout |= output.timed_out;
            report.elapsed_time += output.elapsed.as_secs_f64();
            report.output.push_str(&output.stdout);
            report.errors.push_str(&output.stderr);
            if output.timed_out {
                let _ = writeln!(
                    report.errors,
                    "Timed out after {}s: {line}",
                    self.timeout.as_secs_f64()
                );
            }
            commands.push(line);
        }

        if test.workspaces.is_empty() {
            tracing::warn!(test = %test.key(), "test has no workspace");
        }

        report.command = commands.join("\n");
        let mut transcript = report.command.clone();
        transcript.push('\n');
        std::fs::write(run_dir.join(COMMAND_FILE), transcript)?;

        Ok(report)
    }
}
