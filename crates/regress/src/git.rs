//! Source-control probe.
//!
//! Runs read-only `git` queries against a working directory and collects the
//! commit metadata every run report is keyed to.

use crate::process::{command_line, run_with_timeout};
use crate::result::{RegressError, RegressResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

/// Per-query timeout for the version-control tool
pub const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Commit metadata for the revision under test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full commit hash
    pub hash: String,
    /// Committer date, ISO-8601
    pub date: String,
    /// Committer name
    pub author: String,
    /// Full commit message
    pub message: String,
    /// Normalized `https://<host>/<path>` origin, or empty
    pub server: String,
}

impl CommitInfo {
    /// Abbreviated hash for display
    #[must_use]
    pub fn short_hash(&self) -> &str {
        self.hash.get(..7).unwrap_or(&self.hash)
    }

    /// Link to the commit on its server, if both are known
    #[must_use]
    pub fn commit_url(&self) -> Option<String> {
        (!self.server.is_empty() && !self.hash.is_empty())
            .then(|| format!("{}/commit/{}", self.server, self.hash))
    }

    /// Compare link from `self` (older) to `other` (newer) on this commit's server
    #[must_use]
    pub fn compare_url(&self, other: &Self) -> Option<String> {
        (!self.server.is_empty() && !self.hash.is_empty() && !other.hash.is_empty())
            .then(|| format!("{}/compare/{}...{}", self.server, self.hash, other.hash))
    }
}

/// A commit message split into its conventional parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage<'a> {
    /// First paragraph
    pub header: &'a str,
    /// Middle paragraphs
    pub body: &'a str,
    /// Last paragraph, when there are at least three
    pub footer: &'a str,
}

/// Split a message into header, body and footer on blank lines.
#[must_use]
pub fn split_message(message: &str) -> CommitMessage<'_> {
    let message = message.trim();
    let (header, rest) = message.split_once("\n\n").unwrap_or((message, ""));
    let (body, footer) = match rest.rsplit_once("\n\n") {
        Some((body, footer)) => (body, footer),
        None => (rest, ""),
    };
    CommitMessage {
        header: header.trim(),
        body: body.trim(),
        footer: footer.trim(),
    }
}

fn origin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:(?:https?|ssh|git)://)?(?:[^@/\s]+@)?([A-Za-z0-9.\-]+)(?::\d+)?[:/]([^\s/][^\s]*?)(?:\.git)?/?$",
        )
        .expect("origin pattern is valid")
    })
}

/// Normalize a remote URL to `https://<host>/<path>`; empty string when unrecognized.
#[must_use]
pub fn normalize_origin(url: &str) -> String {
    origin_pattern()
        .captures(url.trim())
        .map(|caps| format!("https://{}/{}", &caps[1], &caps[2]))
        .unwrap_or_default()
}

/// Wrapper around the external version-control executable
#[derive(Debug, Clone)]
pub struct Git {
    executable: PathBuf,
    timeout: Duration,
}

impl Git {
    /// Create a probe using `executable`
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: GIT_TIMEOUT,
        }
    }

    /// Override the per-query timeout
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

    fn query(&self, dir: &Path, args: &[&str]) -> RegressResult<String> {
        let mut command = Command::new(&self.executable);
        command.args(args).current_dir(dir);
        let line = command_line(&command);

        let output = run_with_timeout(&mut command, self.timeout)?;
        if output.timed_out {
            return Err(RegressError::Timeout {
                what: line,
                seconds: self.timeout.as_secs(),
            });
        }
        if output.returncode != Some(0) {
            return Err(RegressError::tool_failed(line, output.stderr.trim().to_string()));
        }
        Ok(output.stdout.trim_end().to_string())
    }

    /// Collect hash, date, author, message and origin for `dir`'s `HEAD`.
    ///
    /// # Errors
    ///
    /// Tool missing, timeouts and failing queries are errors. A missing or
    /// malformed origin only leaves `server` empty.
    pub fn commit_info(&self, dir: &Path) -> RegressResult<CommitInfo> {
        let hash = self.query(dir, &["rev-parse", "HEAD"])?;
        let date = self.query(dir, &["log", "-1", "--format=%cI", "HEAD"])?;
        let author = self.query(dir, &["log", "-1", "--format=%cn", "HEAD"])?;
        let message = self.query(dir, &["log", "-1", "--format=%B", "HEAD"])?;

        let server = match self.query(dir, &["config", "--get", "remote.origin.url"]) {
            Ok(url) => normalize_origin(&url),
            Err(RegressError::ToolFailed { .. }) => String::new(),
            Err(e) => return Err(e),
        };

        Ok(CommitInfo {
            hash: hash.trim().to_string(),
            date: date.trim().to_string(),
            author: author.trim().to_string(),
            message: message.trim().to_string(),
            server,
        })
    }
}
