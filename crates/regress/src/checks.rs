//! Report assembly after a run, and the fixed suite of checks.

use crate::discovery::Test;
use crate::image_compare::{DiffOutputs, ImageComparator, ImageComparison};
use crate::report::RunReport;
use crate::runner::IMGTEST_DIR;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Run subdirectories whose identical files are shared with the previous run
pub const LINKED_DIRS: [&str; 4] = [IMGTEST_DIR, "imgref", "imgdiff", "imgmask"];

/// One predicate applied to a finished report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Check {
    /// Process exit code is 0
    ReturnCode,
    /// Run finished before its deadline
    Timeout,
    /// Every produced image has a reference
    MissingRefs,
    /// Every reference image was produced
    MissingImgs,
    /// Every compared image is identical to its reference
    ImageTests,
    /// Log has no `Error:` line
    Log,
}

impl Check {
    /// The complete suite, in evaluation order
    pub const ALL: [Self; 6] = [
        Self::ReturnCode,
        Self::Timeout,
        Self::MissingRefs,
        Self::MissingImgs,
        Self::ImageTests,
        Self::Log,
    ];

    /// Stable key used in `successes` / `failures`
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::ReturnCode => "returncode",
            Self::Timeout => "timeout",
            Self::MissingRefs => "missing_refs",
            Self::MissingImgs => "missing_imgs",
            Self::ImageTests => "image_tests",
            Self::Log => "log",
        }
    }

    /// Failure messages; empty when the check holds
    #[must_use]
    pub fn evaluate(self, report: &RunReport) -> Vec<String> {
        match self {
            Self::ReturnCode => match report.returncode {
                Some(0) => Vec::new(),
                Some(code) => vec![format!("Return code: {code}")],
                None if report.command.is_empty() => vec!["Application was not run".to_string()],
                None => vec!["Application did not exit normally".to_string()],
            },
            Self::Timeout => {
                if report.timeout {
                    vec![format!(
                        "Timed out after {:.1}s",
                        report.elapsed_time
                    )]
                } else {
                    Vec::new()
                }
            }
            Self::MissingRefs => report
                .missing_refs
                .iter()
                .map(|img| format!("Missing reference image: {img}"))
                .collect(),
            Self::MissingImgs => report
                .missing_imgs
                .iter()
                .map(|img| format!("Missing produced image: {img}"))
                .collect(),
            Self::ImageTests => report
                .image_tests
                .iter()
                .filter(|c| !c.is_identical())
                .map(describe_comparison)
                .collect(),
            Self::Log => LogSummary::from_file(&report.log_path()).errors,
        }
    }
}

fn describe_comparison(c: &ImageComparison) -> String {
    match (c.difference, c.max_difference, c.different_pixels) {
        (Some(diff), Some(max), Some(pixels)) => format!(
            "{}: difference {diff:.6}%, max difference {max:.6}, {pixels} different pixels",
            c.image
        ),
        _ => format!(
            "{}: not comparable ({})",
            c.image,
            c.mismatch_note().unwrap_or_default()
        ),
    }
}

/// Evaluate every check and fill `successes` / `failures`
pub fn run_checks(report: &mut RunReport) {
    report.successes.clear();
    report.failures.clear();
    for check in Check::ALL {
        let messages = check.evaluate(report);
        if messages.is_empty() {
            report.successes.insert(check.key().to_string());
        } else {
            report.failures.insert(check.key().to_string(), messages);
        }
    }
}

/// Line counts of an application log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSummary {
    /// Lines containing `Error:`
    pub errors: Vec<String>,
    /// Number of lines containing `Warn:`
    pub warnings: usize,
    /// Number of lines containing `Info:`
    pub infos: usize,
}

impl LogSummary {
    /// Summarize log text
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut summary = Self::default();
        for line in text.lines() {
            if line.contains("Error:") {
                summary.errors.push(line.trim().to_string());
            }
            if line.contains("Warn:") {
                summary.warnings += 1;
            }
            if line.contains("Info:") {
                summary.infos += 1;
            }
        }
        summary
    }

    /// Summarize a log file. A missing or undecodable file yields an empty summary.
    #[must_use]
    pub fn from_file(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(log = %path.display(), error = %e, "log not readable");
                return Self::default();
            }
        };
        match String::from_utf8(bytes) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                tracing::warn!(log = %path.display(), error = %e, "log is not valid UTF-8");
                Self::default()
            }
        }
    }
}

/// Fills image sets and comparisons into a report after the runner returns
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    comparator: ImageComparator,
}

impl ReportBuilder {
    /// Builder using `comparator` for image pairs
    #[must_use]
    pub const fn new(comparator: ImageComparator) -> Self {
        Self { comparator }
    }

    /// Compute image sets, compare images, share unchanged files with the
    /// previous run and evaluate all checks.
    #[must_use]
    pub fn build(&self, test: &Test, mut report: RunReport) -> RunReport {
        let run_dir = report.outputdir.clone();

        let refs: BTreeSet<String> = test.images.iter().cloned().collect();
        let imgs = png_names(&run_dir.join(IMGTEST_DIR));

        report.refs = refs.iter().cloned().collect();
        report.imgs = imgs.iter().cloned().collect();
        report.missing_refs = imgs.difference(&refs).cloned().collect();
        report.missing_imgs = refs.difference(&imgs).cloned().collect();
        report.image_tests = refs
            .intersection(&imgs)
            .map(|name| self.compare(test, &run_dir, name))
            .collect();

        if let Some(previous) = previous_run_dir(&run_dir) {
            link_identical(&previous, &run_dir);
        }

        run_checks(&mut report);
        report
    }

    fn compare(&self, test: &Test, run_dir: &Path, name: &str) -> ImageComparison {
        let test_img = run_dir.join(IMGTEST_DIR).join(name);
        let ref_img = test.path.join(name);
        let outputs = DiffOutputs::in_run_dir(run_dir, name);

        self.comparator
            .compare_files(name, &test_img, &ref_img, &outputs)
            .unwrap_or_else(|e| {
                tracing::warn!(test = %test.key(), image = name, error = %e, "image comparison failed");
                ImageComparison {
                    image: name.to_string(),
                    test_size: (0, 0),
                    test_mode: "unreadable".to_string(),
                    ref_size: (0, 0),
                    ref_mode: "unreadable".to_string(),
                    difference: None,
                    max_difference: None,
                    different_pixels: None,
                }
            })
    }
}

fn png_names(dir: &Path) -> BTreeSet<String> {
    std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        })
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect()
}

/// The sibling run directory sorting immediately before `run_dir`
#[must_use]
pub fn previous_run_dir(run_dir: &Path) -> Option<PathBuf> {
    let parent = run_dir.parent()?;
    let current = run_dir.file_name()?;
    std::fs::read_dir(parent)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir() && e.file_name().as_os_str() < current)
        .max_by_key(std::fs::DirEntry::file_name)
        .map(|e| e.path())
}

fn same_content(a: &Path, b: &Path) -> bool {
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(ma), Ok(mb)) if ma.len() == mb.len() => {
            matches!((std::fs::read(a), std::fs::read(b)), (Ok(x), Ok(y)) if x == y)
        }
        _ => false,
    }
}

/// Replace every file in the linked subdirectories of `current` with a hard
/// link to the byte-identical file of `previous`. Returns the number of links.
///
/// Failures are logged and leave the current file in place.
pub fn link_identical(previous: &Path, current: &Path) -> usize {
    let mut linked = 0;
    for sub in LINKED_DIRS {
        let Ok(entries) = std::fs::read_dir(current.join(sub)) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let new_file = entry.path();
            let old_file = previous.join(sub).join(entry.file_name());
            if !new_file.is_file() || !same_content(&old_file, &new_file) {
                continue;
            }
            let mut tmp_name = entry.file_name();
            tmp_name.push(".link");
            let tmp = current.join(sub).join(tmp_name);
            let result = std::fs::hard_link(&old_file, &tmp)
                .and_then(|()| std::fs::rename(&tmp, &new_file));
            match result {
                Ok(()) => linked += 1,
                Err(e) => {
                    let _ = std::fs::remove_file(&tmp);
                    tracing::warn!(file = %new_file.display(), error = %e, "hard link failed, keeping copy");
                }
            }
        }
    }
    tracing::debug!(previous = %previous.display(), linked, "linked unchanged artifacts");
    linked
}
