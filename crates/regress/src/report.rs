//! Run reports and the JSON snapshot of a report set.

use crate::discovery::{Test, TestConfig};
use crate::git::CommitInfo;
use crate::image_compare::ImageComparison;
use crate::result::RegressResult;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Timestamp layout used for report dates and run directory names.
/// Fixed width, so lexicographic order is chronological order.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Format a timestamp the way reports store it
#[must_use]
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a report date back into a timestamp
#[must_use]
pub fn parse_date(date: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(date, DATE_FORMAT)
        .ok()
        .map(|d| d.and_utc())
        .or_else(|| DateTime::parse_from_rfc3339(date).ok().map(|d| d.with_timezone(&Utc)))
}

/// Per-run directory name for a report date: colons become underscores
#[must_use]
pub fn run_dir_name(date: &str) -> String {
    date.replace(':', "_")
}

/// Whether a report came from this invocation or the previous snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Loaded from the previous snapshot
    Old,
    /// Produced by this invocation
    #[default]
    New,
}

/// Overall state of one test for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    /// Every check held
    Ok,
    /// At least one check failed
    Fail,
    /// Disabled in `config.json`
    Disabled,
}

impl TestState {
    /// CSS class / label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
            Self::Disabled => "disabled",
        }
    }
}

/// Everything known about one run of one test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run start, see [`DATE_FORMAT`]
    pub date: String,
    /// Owning module
    pub module: String,
    /// Test name
    pub name: String,
    /// Test directory
    pub path: PathBuf,
    /// Script passed to the application, empty when none
    pub script: String,
    /// Test configuration
    pub config: TestConfig,
    /// Command line(s) executed
    pub command: String,
    /// Process exit code; `None` when killed or never started
    pub returncode: Option<i32>,
    /// Whether the run hit its deadline
    pub timeout: bool,
    /// Captured stdout
    pub output: String,
    /// Captured stderr
    pub errors: String,
    /// Wall-clock seconds
    pub elapsed_time: f64,
    /// Per-run output directory
    pub outputdir: PathBuf,
    /// Screenshot file name inside `outputdir`
    pub screenshot: String,
    /// Log file name inside `outputdir`
    pub log: String,
    /// Reference image names
    pub refs: Vec<String>,
    /// Produced image names
    pub imgs: Vec<String>,
    /// Produced images without a reference
    pub missing_refs: Vec<String>,
    /// References without a produced image
    pub missing_imgs: Vec<String>,
    /// One record per image present in both sets
    pub image_tests: Vec<ImageComparison>,
    /// Commit under test
    pub git: CommitInfo,
    /// Checks that held
    pub successes: BTreeSet<String>,
    /// Checks that failed, with messages
    pub failures: BTreeMap<String, Vec<String>>,
    /// Snapshot bookkeeping
    #[serde(default)]
    pub status: ReportStatus,
}

impl RunReport {
    /// Start a report for `test` run at `date`
    #[must_use]
    pub fn new(test: &Test, date: &DateTime<Utc>) -> Self {
        Self {
            date: format_date(date),
            module: test.module.clone(),
            name: test.name.clone(),
            path: test.path.clone(),
            script: test
                .script()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            config: test.config.clone(),
            refs: test.images.clone(),
            ..Self::default()
        }
    }

    /// `module/name`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.module, self.name)
    }

    /// Run directory name derived from the date
    #[must_use]
    pub fn run_dir_name(&self) -> String {
        run_dir_name(&self.date)
    }

    /// Test is not disabled in its configuration
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// No check failed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Display state
    #[must_use]
    pub fn state(&self) -> TestState {
        if !self.is_enabled() {
            TestState::Disabled
        } else if self.passed() {
            TestState::Ok
        } else {
            TestState::Fail
        }
    }

    /// Path of the log file
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.outputdir.join(&self.log)
    }

    /// Comparison record for `image`
    #[must_use]
    pub fn image_test(&self, image: &str) -> Option<&ImageComparison> {
        self.image_tests.iter().find(|c| c.image == image)
    }
}

/// Reports keyed by `module/test`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportSet {
    reports: BTreeMap<String, RunReport>,
}

impl ReportSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a previous snapshot and mark every entry `old`. A missing file yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> RegressResult<Self> {
        if !path.is_file() {
            return Ok(Self::new());
        }
        let mut set: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        for report in set.reports.values_mut() {
            report.status = ReportStatus::Old;
        }
        Ok(set)
    }

    /// Write the snapshot atomically (temp file + rename)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> RegressResult<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Insert a fresh report, replacing any older one with the same key
    pub fn insert(&mut self, mut report: RunReport) {
        report.status = ReportStatus::New;
        self.reports.insert(report.key(), report);
    }

    /// Report for `module/test`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RunReport> {
        self.reports.get(key)
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RunReport)> {
        self.reports.iter()
    }

    /// Number of reports
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// No reports
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Reports produced by this invocation
    pub fn new_reports(&self) -> impl Iterator<Item = &RunReport> {
        self.reports
            .values()
            .filter(|r| r.status == ReportStatus::New)
    }

    /// True iff every enabled report of this invocation passed all checks
    #[must_use]
    pub fn overall_success(&self) -> bool {
        self.new_reports()
            .filter(|r| r.is_enabled())
            .all(RunReport::passed)
    }

    /// Count of (ok, fail, disabled) over all reports
    #[must_use]
    pub fn summary(&self) -> (usize, usize, usize) {
        self.reports
            .values()
            .fold((0, 0, 0), |(ok, fail, off), r| match r.state() {
                TestState::Ok => (ok + 1, fail, off),
                TestState::Fail => (ok, fail + 1, off),
                TestState::Disabled => (ok, fail, off + 1),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn report(module: &str, name: &str) -> RunReport {
        RunReport {
            module: module.to_string(),
            name: name.to_string(),
            ..RunReport::default()
        }
    }

    #[test]
    fn test_date_format_round_trip_and_dir_name() {
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let text = format_date(&date);
        assert_eq!(text, "2024-03-05T07:08:09.000000");
        assert_eq!(parse_date(&text).unwrap(), date);
        assert_eq!(run_dir_name(&text), "2024-03-05T07_08_09.000000");
    }

    #[test]
    fn test_run_dir_names_sort_chronologically() {
        let a = format_date(&Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap());
        let b = format_date(&Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap());
        let c = format_date(&Utc.with_ymd_and_hms(2024, 11, 1, 0, 0, 0).unwrap());
        let mut names = vec![run_dir_name(&c), run_dir_name(&a), run_dir_name(&b)];
        names.sort();
        assert_eq!(names, vec![run_dir_name(&a), run_dir_name(&b), run_dir_name(&c)]);
    }

    #[test]
    fn test_state() {
        let mut r = report("base", "t");
        assert_eq!(r.state(), TestState::Ok);
        r.failures.insert("log".into(), vec!["Error: x".into()]);
        assert_eq!(r.state(), TestState::Fail);
        r.config.enabled = Some(false);
        assert_eq!(r.state(), TestState::Disabled);
    }

    #[test]
    fn test_snapshot_save_load_marks_old() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.json");

        let mut set = ReportSet::new();
        set.insert(report("base", "a"));
        set.insert(report("base", "b"));
        set.save(&path).unwrap();

        let loaded = ReportSet::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|(_, r)| r.status == ReportStatus::Old));
        assert!(loaded.get("base/a").is_some());
        assert_eq!(loaded.new_reports().count(), 0);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(ReportSet::load(&tmp.path().join("none.json"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_overall_success_ignores_disabled_and_old() {
        let mut set = ReportSet::new();
        set.insert(report("base", "ok"));

        let mut disabled = report("base", "off");
        disabled.config.enabled = Some(false);
        disabled.failures.insert("returncode".into(), vec!["1".into()]);
        set.insert(disabled);
        assert!(set.overall_success());

        let mut failing = report("base", "bad");
        failing.failures.insert("timeout".into(), vec!["timed out".into()]);
        set.insert(failing);
        assert!(!set.overall_success());
        assert_eq!(set.summary(), (1, 1, 1));
    }

    #[test]
    fn test_json_keyed_by_module_and_name() {
        let mut set = ReportSet::new();
        set.insert(report("opengl", "volume"));
        let json: serde_json::Value = serde_json::to_value(&set).unwrap();
        assert_eq!(json["opengl/volume"]["module"], "opengl");
        assert_eq!(json["opengl/volume"]["status"], "new");
    }
}
