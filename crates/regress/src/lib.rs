//! Regress: visual regression harness for a rendering application
//!
//! Runs every regression test found under a set of module directories,
//! compares the images the application produced against committed references,
//! checks exit code, deadline and log, and records each run in a history
//! database rendered as a self-contained HTML report.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    REGRESS Architecture                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Discovery  │───►│ AppRunner  │───►│ Report     │            │
//! │   │ (tests)    │    │ (process)  │    │ Builder +  │            │
//! │   └────────────┘    └────────────┘    │ Checks     │            │
//! │                                       └─────┬──────┘            │
//! │   ┌────────────┐    ┌────────────┐          │                   │
//! │   │ HtmlReport │◄───│ Database   │◄─────────┘                   │
//! │   │ report.json│    │ (sqlite)   │                              │
//! │   └────────────┘    └────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod checks;
mod discovery;
mod git;
mod image_compare;
mod orchestrator;
mod paths;
mod process;
mod report;
mod result;
mod runner;

/// SQLite run history
pub mod history;

/// HTML report rendering
pub mod html;

pub use checks::{
    link_identical, previous_run_dir, run_checks, Check, LogSummary, ReportBuilder, LINKED_DIRS,
};
pub use discovery::{discover_tests, Test, TestConfig, WORKSPACE_EXTENSION};
pub use git::{normalize_origin, split_message, CommitInfo, CommitMessage, Git, GIT_TIMEOUT};
pub use history::{DailyResults, DailyValue, Database, DATABASE_FILE};
pub use html::{escape_html, HtmlReport, REPORT_HTML};
pub use image_compare::{
    diff_buffers, mode_name, DiffOutputs, DiffStats, ImageCompareConfig, ImageComparator,
    ImageComparison, ImageDiff, PixelMode,
};
pub use orchestrator::{
    filter_tests, render_report, NoProgress, Orchestrator, OrchestratorConfig, Progress,
    RunSummary, REPORT_JSON,
};
pub use paths::{
    absolute, active_modules_from_cmake_cache, default_executable, find_project_root, parse_ini,
    to_path, IniSections, ToolConfig, CONFIG_FILE_NAME, ROOT_MARKERS,
};
pub use process::{command_line, run_with_timeout, ChildExt, ProcessOutput};
pub use report::{
    format_date, parse_date, run_dir_name, ReportSet, ReportStatus, RunReport, TestState,
    DATE_FORMAT,
};
pub use result::{RegressError, RegressResult};
pub use runner::{
    AppRunner, COMMAND_FILE, DEFAULT_TIMEOUT, IMAGE_DUMP_PATTERN, IMGTEST_DIR, LOG_NAME,
    SCREENSHOT_NAME,
};

/// Everything needed to drive an invocation
pub mod prelude {
    pub use super::{
        discover_tests, find_project_root, CommitInfo, Database, ImageCompareConfig, Orchestrator,
        OrchestratorConfig, Progress, RegressError, RegressResult, ReportSet, RunReport,
        RunSummary, Test, TestState, ToolConfig,
    };
}
