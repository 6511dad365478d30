//! Terminal output for test runs

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use regress::{Progress, RunReport, Test, TestState};
use std::time::{Duration, Instant};

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Per-state counts of the tests finished so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Tests in state `Ok`
    pub passed: usize,
    /// Tests in state `Fail`
    pub failed: usize,
    /// Tests skipped because their configuration disables them
    pub disabled: usize,
}

impl Tally {
    /// Count one more test in `state`
    pub fn record(&mut self, state: TestState) {
        match state {
            TestState::Ok => self.passed += 1,
            TestState::Fail => self.failed += 1,
            TestState::Disabled => self.disabled += 1,
        }
    }

    /// Tests seen in any state
    #[must_use]
    pub const fn total(&self) -> usize {
        self.passed + self.failed + self.disabled
    }
}

/// Line kinds the reporter writes, each with its own tag
#[derive(Debug, Clone, Copy)]
enum Tag {
    Pass,
    Fail,
    Skip,
    Warn,
    Info,
}

impl Tag {
    const fn plain(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
            Self::Warn => "WARN",
            Self::Info => "INFO",
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Pass => "✓",
            Self::Fail => "✗",
            Self::Skip => "-",
            Self::Warn => "⚠",
            Self::Info => "ℹ",
        }
    }

    fn style(self) -> Style {
        match self {
            Self::Pass => Style::new().green().bold(),
            Self::Fail => Style::new().red().bold(),
            Self::Skip => Style::new().yellow(),
            Self::Warn => Style::new().yellow().bold(),
            Self::Info => Style::new().blue().bold(),
        }
    }
}

/// Reports test progress on stderr, with a bar when stderr is a terminal
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    bar: Option<ProgressBar>,
    started: Option<Instant>,
    tally: Tally,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode: only failures are written
    pub quiet: bool,
}

impl ProgressReporter {
    /// Create a reporter writing to stderr
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            bar: None,
            started: None,
            tally: Tally::default(),
            use_color,
            quiet,
        }
    }

    /// Start the clock, and the bar when output is interactive
    pub fn start_progress(&mut self, total: usize) {
        self.started = Some(Instant::now());
        if self.quiet || !self.term.is_term() {
            return;
        }

        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        self.bar = Some(ProgressBar::new(total as u64).with_style(style));
    }

    /// Clear the bar once all tests are done
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    /// Counts of the tests finished so far
    #[must_use]
    pub const fn tally(&self) -> Tally {
        self.tally
    }

    /// Time since the first test started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.map_or(Duration::ZERO, |t| t.elapsed())
    }

    fn write_line(&self, line: &str) {
        let write = || {
            let _ = self.term.write_line(line);
        };
        match &self.bar {
            Some(bar) => bar.suspend(write),
            None => write(),
        }
    }

    fn tagged(&self, tag: Tag, message: &str) {
        // failures are written even when quiet
        if self.quiet && !matches!(tag, Tag::Fail) {
            return;
        }
        let prefix = if self.use_color {
            tag.style().apply_to(tag.symbol()).to_string()
        } else {
            tag.plain().to_string()
        };
        self.write_line(&format!("{prefix} {message}"));
    }

    /// Print a passing test
    pub fn success(&self, message: &str) {
        self.tagged(Tag::Pass, message);
    }

    /// Print a failing test
    pub fn failure(&self, message: &str) {
        self.tagged(Tag::Fail, message);
    }

    /// Print a disabled test
    pub fn skipped(&self, message: &str) {
        self.tagged(Tag::Skip, message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        self.tagged(Tag::Warn, message);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        self.tagged(Tag::Info, message);
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }
        let title = if self.use_color {
            Style::new().bold().underlined().apply_to(title).to_string()
        } else {
            format!("=== {title} ===")
        };
        self.write_line("");
        self.write_line(&title);
    }

    /// One-line verdict of the run; quiet mode prints it only on failure
    pub fn summary(&self, tally: Tally, duration: Duration) {
        if self.quiet && tally.failed == 0 {
            return;
        }

        let (verdict, verdict_style) = if tally.failed > 0 {
            ("FAILED", Style::new().red().bold())
        } else {
            ("PASSED", Style::new().green().bold())
        };
        let paint = |text: String, style: Style| {
            if self.use_color {
                style.apply_to(text).to_string()
            } else {
                text
            }
        };

        self.write_line("");
        self.write_line(&format!(
            "{} {} tests in {:.2}s ({}, {}, {})",
            paint(verdict.to_string(), verdict_style),
            tally.total(),
            duration.as_secs_f64(),
            paint(format!("{} passed", tally.passed), Tag::Pass.style()),
            paint(format!("{} failed", tally.failed), Tag::Fail.style()),
            paint(format!("{} disabled", tally.disabled), Tag::Skip.style()),
        ));
    }
}

impl Progress for ProgressReporter {
    fn test_started(&mut self, index: usize, total: usize, test: &Test) {
        if index == 0 && self.started.is_none() {
            self.start_progress(total);
        }
        if let Some(bar) = &self.bar {
            bar.set_message(test.key());
        }
    }

    fn test_finished(&mut self, report: &RunReport) {
        let state = report.state();
        self.tally.record(state);

        let line = format!("{} ({:.2}s)", report.key(), report.elapsed_time);
        match state {
            TestState::Ok => self.success(&line),
            TestState::Disabled => self.skipped(&line),
            TestState::Fail => {
                self.failure(&line);
                for message in report.failures.values().flatten() {
                    self.write_line(&format!("    {message}"));
                }
            }
        }

        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }
}
