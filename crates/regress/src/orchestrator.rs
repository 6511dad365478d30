//! One invocation of the harness, from discovery to the written reports.
//!
//! 1. load the previous `report.json` (entries become `old`)
//! 2. discover tests, apply the index range, the caller filter and the
//!    active-module list
//! 3. per test: probe git, run, build and check the report, persist it
//! 4. write `report.json`, `report.html` and `report-<ts>.html`
//! 5. succeed iff every enabled test of this invocation passed
//!
//! Environment problems abort the invocation. Anything that goes wrong inside
//! one test is recorded in that test's report and the loop moves on.

use crate::checks::{run_checks, ReportBuilder};
use crate::discovery::{discover_tests, Test};
use crate::git::{CommitInfo, Git};
use crate::history::{Database, DATABASE_FILE};
use crate::html::HtmlReport;
use crate::image_compare::{ImageCompareConfig, ImageComparator};
use crate::paths::{absolute, default_executable};
use crate::report::{ReportSet, RunReport};
use crate::result::{RegressError, RegressResult};
use crate::runner::{AppRunner, DEFAULT_TIMEOUT};
use chrono::Utc;
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// JSON snapshot file name inside the output directory
pub const REPORT_JSON: &str = "report.json";

/// Everything one invocation needs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Rendering application
    pub app: PathBuf,
    /// Existing directory receiving run directories and reports
    pub output_dir: PathBuf,
    /// Directories whose children are modules
    pub module_roots: Vec<PathBuf>,
    /// Version-control executable
    pub git: PathBuf,
    /// Deadline per workspace
    pub timeout: Duration,
    /// Index range into the discovered tests
    pub range: Option<Range<usize>>,
    /// Only tests of these modules run, when set
    pub active_modules: Option<Vec<String>>,
    /// Image comparison options
    pub compare: ImageCompareConfig,
    /// Raw HTML placed above the report
    pub header: Option<String>,
    /// Raw HTML placed below the report
    pub footer: Option<String>,
}

impl OrchestratorConfig {
    /// Configuration with defaults for everything optional
    #[must_use]
    pub fn new(app: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, module_roots: Vec<PathBuf>) -> Self {
        Self {
            app: app.into(),
            output_dir: output_dir.into(),
            module_roots,
            git: PathBuf::from(default_executable("git")),
            timeout: DEFAULT_TIMEOUT,
            range: None,
            active_modules: None,
            compare: ImageCompareConfig::default(),
            header: None,
            footer: None,
        }
    }

    /// Set the version-control executable
    #[must_use]
    pub fn with_git(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    /// Set the deadline per workspace
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Only run tests with discovery index in `range`
    #[must_use]
    pub fn with_range(mut self, range: Option<Range<usize>>) -> Self {
        self.range = range;
        self
    }

    /// Only run tests of `modules`
    #[must_use]
    pub fn with_active_modules(mut self, modules: Option<Vec<String>>) -> Self {
        self.active_modules = modules;
        self
    }

    /// Set image comparison options
    #[must_use]
    pub const fn with_compare(mut self, compare: ImageCompareConfig) -> Self {
        self.compare = compare;
        self
    }

    /// Set header and footer HTML fragments
    #[must_use]
    pub fn with_html_fragments(mut self, header: Option<String>, footer: Option<String>) -> Self {
        self.header = header;
        self.footer = footer;
        self
    }
}

/// Callbacks while tests run
pub trait Progress {
    /// `index` of `total` is about to run
    fn test_started(&mut self, _index: usize, _total: usize, _test: &Test) {}
    /// The report of a finished test
    fn test_finished(&mut self, _report: &RunReport) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Result of one invocation
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Old and new reports
    pub reports: ReportSet,
    /// Every enabled test of this invocation passed
    pub success: bool,
    /// Written JSON snapshot
    pub json: PathBuf,
    /// Written report page
    pub html: PathBuf,
    /// Timestamped copy of the report page
    pub html_copy: PathBuf,
}

/// Drives one invocation
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    output_dir: PathBuf,
}

impl Orchestrator {
    /// Validate the output directory and prepare an invocation
    ///
    /// # Errors
    ///
    /// Returns [`RegressError::NotFound`] if the output directory does not exist.
    pub fn new(config: OrchestratorConfig) -> RegressResult<Self> {
        if !config.output_dir.is_dir() {
            return Err(RegressError::not_found(format!(
                "output directory {}",
                config.output_dir.display()
            )));
        }
        let output_dir = absolute(&config.output_dir)?;
        Ok(Self { config, output_dir })
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Absolute output directory
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Discovered tests after range, `filter` and active modules are applied
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails.
    pub fn select_tests(&self, filter: impl Fn(&Test) -> bool) -> RegressResult<Vec<Test>> {
        let roots = self
            .config
            .module_roots
            .iter()
            .map(|root| absolute(root))
            .collect::<RegressResult<Vec<_>>>()?;
        let tests = discover_tests(&roots)?;
        Ok(filter_tests(
            tests,
            self.config.range.as_ref(),
            self.config.active_modules.as_deref(),
            filter,
        ))
    }

    /// Run every selected test
    ///
    /// # Errors
    ///
    /// Environment errors only: missing application or version-control tool,
    /// unwritable output directory.
    pub fn run(&self) -> RegressResult<RunSummary> {
        self.run_with(|_| true, &mut NoProgress)
    }

    /// Run the tests accepted by `filter`, reporting to `progress`
    ///
    /// # Errors
    ///
    /// Environment errors only, see [`Orchestrator::run`].
    pub fn run_with(
        &self,
        filter: impl Fn(&Test) -> bool,
        progress: &mut dyn Progress,
    ) -> RegressResult<RunSummary> {
        let json = self.output_dir.join(REPORT_JSON);
        let mut reports = ReportSet::load(&json).unwrap_or_else(|e| {
            tracing::warn!(file = %json.display(), error = %e, "ignoring unreadable report snapshot");
            ReportSet::new()
        });

        let tests = self.select_tests(filter)?;
        tracing::info!(count = tests.len(), "running tests");

        let runner = AppRunner::new(&self.config.app)?.with_timeout(self.config.timeout);
        let builder = ReportBuilder::new(ImageComparator::new(self.config.compare));
        let git = Git::new(&self.config.git);
        let db = Database::open(&self.output_dir.join(DATABASE_FILE))?;
        let mut commits: HashMap<PathBuf, CommitInfo> = HashMap::new();

        for (index, test) in tests.iter().enumerate() {
            progress.test_started(index, tests.len(), test);
            tracing::info!(test = %test.key(), "running");

            let info = match commits.get(&test.module_path) {
                Some(info) => info.clone(),
                None => {
                    let info = commit_info(&git, &test.module_path)?;
                    commits.insert(test.module_path.clone(), info.clone());
                    info
                }
            };

            let report = self.run_test(&runner, &builder, test, info)?;

            if let Err(e) = db.add_report(&report) {
                tracing::warn!(test = %test.key(), error = %e, "failed to record history");
            }
            progress.test_finished(&report);
            reports.insert(report);
        }

        reports.save(&json)?;
        let (html, html_copy) = HtmlReport::new(&self.output_dir, &reports, &db)?
            .with_header(self.config.header.clone())
            .with_footer(self.config.footer.clone())
            .save()?;

        let success = reports.overall_success();
        tracing::info!(success, "invocation finished");
        Ok(RunSummary {
            reports,
            success,
            json,
            html,
            html_copy,
        })
    }

    fn run_test(
        &self,
        runner: &AppRunner,
        builder: &ReportBuilder,
        test: &Test,
        git: CommitInfo,
    ) -> RegressResult<RunReport> {
        let mut report = RunReport::new(test, &Utc::now());
        report.git = git;

        match runner.run(test, report.clone(), &self.output_dir) {
            Ok(ran) => Ok(builder.build(test, ran)),
            Err(e) if e.is_environment_error() => Err(e),
            Err(e) => {
                tracing::warn!(test = %test.key(), error = %e, "run failed");
                report.errors = e.to_string();
                run_checks(&mut report);
                Ok(report)
            }
        }
    }
}

/// Probe `dir`; a missing tool is fatal, other failures end up in the message
fn commit_info(git: &Git, dir: &Path) -> RegressResult<CommitInfo> {
    match git.commit_info(dir) {
        Ok(info) => Ok(info),
        Err(e @ RegressError::ToolNotFound { .. }) => Err(e),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "could not read commit");
            Ok(CommitInfo {
                message: e.to_string(),
                ..CommitInfo::default()
            })
        }
    }
}

/// Keep the tests whose discovery index is in `range`, that `filter` accepts
/// and whose module is in `active_modules` (case-insensitive) when given.
pub fn filter_tests(
    tests: Vec<Test>,
    range: Option<&Range<usize>>,
    active_modules: Option<&[String]>,
    filter: impl Fn(&Test) -> bool,
) -> Vec<Test> {
    tests
        .into_iter()
        .enumerate()
        .filter(|(i, _)| range.map_or(true, |r| r.contains(i)))
        .map(|(_, test)| test)
        .filter(|test| filter(test))
        .filter(|test| {
            active_modules.map_or(true, |active| {
                active.iter().any(|m| m.eq_ignore_ascii_case(&test.module))
            })
        })
        .collect()
}

/// Re-render the HTML pages from an existing output directory
///
/// # Errors
///
/// Returns an error if the directory, snapshot or database cannot be read.
pub fn render_report(
    output_dir: &Path,
    header: Option<String>,
    footer: Option<String>,
) -> RegressResult<(PathBuf, PathBuf)> {
    if !output_dir.is_dir() {
        return Err(RegressError::not_found(format!(
            "output directory {}",
            output_dir.display()
        )));
    }
    let output_dir = absolute(output_dir)?;
    let reports = ReportSet::load(&output_dir.join(REPORT_JSON))?;
    let db = Database::open(&output_dir.join(DATABASE_FILE))?;
    HtmlReport::new(&output_dir, &reports, &db)?
        .with_header(header)
        .with_footer(footer)
        .save()
}
