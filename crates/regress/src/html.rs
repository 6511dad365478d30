//! Self-contained HTML report.
//!
//! One page per invocation with an embedded stylesheet, a collapsible section
//! per test, commit panels, links to earlier versions of the page and inline
//! SVG trend lines drawn from the history database.

use crate::checks::LogSummary;
use crate::git::{split_message, CommitInfo};
use crate::history::{DailyResults, DailyValue, Database, SeriesData, TestRun};
use crate::image_compare::ImageComparison;
use crate::report::{parse_date, ReportSet, RunReport, TestState};
use crate::result::RegressResult;
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};

/// Canonical report page name
pub const REPORT_HTML: &str = "report.html";
/// Number of days shown in trend lines
pub const HISTORY_DAYS: i64 = 31;
/// Values shown when nothing falls into the trend window
pub const FALLBACK_POINTS: usize = 30;
/// Earlier report versions linked from the header
pub const MAX_PREVIOUS_REPORTS: usize = 10;

const SPARK_WIDTH: f64 = 100.0;
const SPARK_HEIGHT: f64 = 20.0;
const CHART_WIDTH: f64 = 300.0;
const CHART_HEIGHT: f64 = 60.0;

const STYLE: &str = r#"
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 20px; color: #222; }
        h1 { margin-bottom: 4px; }
        a { color: #1565c0; }
        pre { background: #f7f7f7; padding: 8px; overflow-x: auto; white-space: pre-wrap; }
        .subtitle { color: #666; margin-bottom: 12px; }
        .version { margin-right: 6px; }
        .git { display: table; margin-bottom: 16px; border-collapse: collapse; }
        .git .box { display: table-row; }
        .git .box span { display: table-cell; padding: 2px 10px 2px 0; }
        .git .boxheader span { font-weight: bold; }
        .summary { background: #f5f5f5; padding: 12px 20px; border-radius: 8px; margin-bottom: 20px; }
        .summary span { margin-right: 16px; }
        details.test { margin: 4px 0; border-radius: 4px; padding: 4px 8px; }
        details.test > summary { cursor: pointer; display: flex; gap: 16px; align-items: center; }
        details.ok { background: #e8f5e9; border-left: 4px solid #4caf50; }
        details.fail { background: #ffebee; border-left: 4px solid #f44336; }
        details.disabled { background: #eceff1; border-left: 4px solid #9e9e9e; }
        .testmodule { width: 120px; color: #555; }
        .testname { width: 260px; font-weight: bold; }
        .testdate { color: #666; }
        .item { margin: 6px 0; }
        .key { font-weight: bold; margin-right: 6px; }
        .status-ok { color: #2e7d32; }
        .status-fail { color: #c62828; }
        .images { display: grid; grid-template-columns: repeat(4, minmax(0, 220px)); gap: 8px; }
        .images img { max-width: 100%; border: 1px solid #ccc; image-rendering: pixelated; }
        .imagestats { grid-column: 1 / span 4; font-family: monospace; }
        .screenshot { max-width: 400px; border: 1px solid #ccc; }
        .commit .header { font-weight: bold; }
        .commit .body, .commit .footer { white-space: pre-wrap; color: #555; }
        svg.spark { vertical-align: middle; }
        svg.spark polyline { fill: none; stroke: #1565c0; stroke-width: 1; }
        svg.spark circle { fill: #c62828; }
        svg.spark rect.band { fill: #dfe8f4; }
        .trends { margin-bottom: 20px; display: flex; gap: 24px; }
        svg.chart { background: #fafafa; border: 1px solid #ddd; }
        svg.chart polyline { fill: none; stroke-width: 1.5; }
        svg.chart .passed { stroke: #4caf50; }
        svg.chart .failed { stroke: #f44336; }
        svg.chart .disabled { stroke: #9e9e9e; }
        svg.chart .runtime { stroke: #1565c0; }
        .error { color: #d32f2f; font-family: monospace; white-space: pre-wrap; }
"#;

/// Escape text for HTML content and attribute values
#[must_use]
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// File name of the timestamped copy of a report page, to the microsecond
#[must_use]
pub fn timestamped_name(created: &DateTime<Utc>) -> String {
    format!("report-{}.html", created.format("%Y-%m-%dT%H_%M_%S%.6f"))
}

/// Earlier `report-<ts>.html` pages in `basedir`, newest first
#[must_use]
pub fn previous_reports(basedir: &Path) -> Vec<PathBuf> {
    let mut pages: Vec<PathBuf> = std::fs::read_dir(basedir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("report-") && n.ends_with(".html"))
        })
        .collect();
    pages.sort();
    pages.reverse();
    pages
}

fn format_time(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Link target for `path`, relative to `basedir` when possible
fn href(basedir: &Path, path: &Path) -> String {
    let shown = path.strip_prefix(basedir).unwrap_or(path);
    escape_html(&shown.to_string_lossy().replace('\\', "/"))
}

fn abbreviate(text: &str, max: usize) -> String {
    let first = text.lines().next().unwrap_or("");
    if first.chars().count() > max || text.lines().nth(1).is_some() {
        let short: String = first.chars().take(max).collect();
        format!("{short}...")
    } else {
        first.to_string()
    }
}

/// Maps `(timestamp, value)` pairs onto a `width` x `height` box
#[derive(Debug, Clone, Copy)]
struct Plot {
    xmin: f64,
    xmax: f64,
    lo: f64,
    hi: f64,
    width: f64,
    height: f64,
}

impl Plot {
    fn x(&self, t: f64) -> f64 {
        if self.xmax > self.xmin {
            (t - self.xmin) / (self.xmax - self.xmin) * self.width
        } else {
            self.width
        }
    }

    fn y(&self, v: f64) -> f64 {
        if self.hi > self.lo {
            self.height - 1.0 - (v - self.lo) / (self.hi - self.lo) * (self.height - 2.0)
        } else {
            self.height / 2.0
        }
    }

    fn points(&self, values: impl IntoIterator<Item = (f64, f64)>) -> String {
        values
            .into_iter()
            .map(|(t, v)| format!("{:.1},{:.1}", self.x(t), self.y(v)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn polyline(&self, class: &str, values: impl IntoIterator<Item = (f64, f64)>) -> String {
        format!(r#"<polyline class="{class}" points="{}"/>"#, self.points(values))
    }

    /// Shaded band between `from` and `to`, clipped to the box
    fn band(&self, from: f64, to: f64) -> String {
        let top = self.y(to).clamp(0.0, self.height);
        let bottom = self.y(from).clamp(0.0, self.height);
        format!(
            r#"<rect class="band" x="0" y="{top:.1}" width="{}" height="{:.1}"/>"#,
            self.width,
            bottom - top
        )
    }
}

/// Mean and population standard deviation
fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

/// Turn a line into steps: each value holds until halfway to the next point
fn steps(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(points.len() * 3);
    for pair in points.windows(2) {
        let ((x1, y1), (x2, y2)) = (pair[0], pair[1]);
        let xm = (x1 + x2) / 2.0;
        out.extend([(x1, y1), (xm, y1), (xm, y2)]);
    }
    out.extend(points.last().copied());
    out
}

/// Inline SVG trend line for `data`, ending at `now`.
///
/// Shows values from the last [`HISTORY_DAYS`] days, or the last
/// [`FALLBACK_POINTS`] values when that window is empty. The newest point is
/// marked. With `normal_range` a band covering mean ± one standard deviation
/// of the whole series is drawn behind the line.
#[must_use]
pub fn sparkline(data: &SeriesData, now: &DateTime<Utc>, normal_range: bool) -> String {
    let xmax = now.timestamp() as f64;
    let window = (*now - Duration::days(HISTORY_DAYS)).max(data.series.created);

    let mut values: Vec<_> = data
        .measurements
        .iter()
        .filter(|m| m.created > window)
        .collect();
    if values.is_empty() {
        let skip = data.measurements.len().saturating_sub(FALLBACK_POINTS);
        values = data.measurements.iter().skip(skip).collect();
    }
    if values.is_empty() {
        return String::new();
    }

    let lo = values.iter().map(|m| m.value).fold(f64::INFINITY, f64::min);
    let hi = values.iter().map(|m| m.value).fold(f64::NEG_INFINITY, f64::max);
    let plot = Plot {
        xmin: values
            .first()
            .map_or(xmax, |m| m.created.timestamp() as f64)
            .min(window.timestamp() as f64),
        xmax,
        lo,
        hi,
        width: SPARK_WIDTH,
        height: SPARK_HEIGHT,
    };

    let all: Vec<f64> = data.measurements.iter().map(|m| m.value).collect();
    let band = match mean_std(&all) {
        Some((mean, std)) if normal_range && std > 0.0 => plot.band(mean - std, mean + std),
        _ => String::new(),
    };
    let line = plot.polyline(
        "trend",
        values.iter().map(|m| (m.created.timestamp() as f64, m.value)),
    );
    let (last_x, last_y) = values
        .last()
        .map_or((0.0, 0.0), |m| (plot.x(m.created.timestamp() as f64), plot.y(m.value)));

    format!(
        r#"<svg class="spark" width="{SPARK_WIDTH}" height="{SPARK_HEIGHT}" viewBox="0 0 {SPARK_WIDTH} {SPARK_HEIGHT}"><title>{name}: {lo:.4} .. {hi:.4} {unit}</title>{band}{line}<circle cx="{last_x:.1}" cy="{last_y:.1}" r="1.5"/></svg>"#,
        name = escape_html(&data.series.name),
        unit = escape_html(&data.series.quantity.unit),
    )
}

/// Suite-wide trends: stepped pass/fail/disabled counts and total run time per day
#[must_use]
pub fn history_chart(results: &[DailyResults], elapsed: &[DailyValue]) -> String {
    if results.is_empty() && elapsed.is_empty() {
        return String::new();
    }
    let svg = |title: String, body: String| {
        format!(
            r#"<svg class="chart" width="{CHART_WIDTH}" height="{CHART_HEIGHT}" viewBox="0 0 {CHART_WIDTH} {CHART_HEIGHT}"><title>{title}</title>{body}</svg>"#
        )
    };
    let mut html = String::from(r#"<div class="trends">"#);

    if let (Some(first), Some(last)) = (results.first(), results.last()) {
        let peak = results
            .iter()
            .map(|d| d.passed.max(d.failed).max(d.disabled))
            .max()
            .unwrap_or_default();
        let plot = Plot {
            xmin: first.date.timestamp() as f64,
            xmax: last.date.timestamp() as f64,
            lo: 0.0,
            hi: peak as f64,
            width: CHART_WIDTH,
            height: CHART_HEIGHT,
        };
        let series = |count: fn(&DailyResults) -> usize| {
            steps(
                &results
                    .iter()
                    .map(|d| (d.date.timestamp() as f64, count(d) as f64))
                    .collect::<Vec<_>>(),
            )
        };
        let body = [
            plot.polyline("passed", series(|d| d.passed)),
            plot.polyline("failed", series(|d| d.failed)),
            plot.polyline("disabled", series(|d| d.disabled)),
        ]
        .concat();
        html.push_str(&svg(
            format!(
                "Results per day, {} .. {}: {} passed, {} failed, {} disabled on the last day",
                first.date.format("%Y-%m-%d"),
                last.date.format("%Y-%m-%d"),
                last.passed,
                last.failed,
                last.disabled
            ),
            body,
        ));
    }

    if let (Some(first), Some(last)) = (elapsed.first(), elapsed.last()) {
        let lo = elapsed.iter().map(|d| d.value).fold(f64::INFINITY, f64::min);
        let hi = elapsed.iter().map(|d| d.value).fold(f64::NEG_INFINITY, f64::max);
        let plot = Plot {
            xmin: first.date.timestamp() as f64,
            xmax: last.date.timestamp() as f64,
            lo: lo.min(0.0),
            hi,
            width: CHART_WIDTH,
            height: CHART_HEIGHT,
        };
        let body = plot.polyline(
            "runtime",
            elapsed.iter().map(|d| (d.date.timestamp() as f64, d.value)),
        );
        html.push_str(&svg(
            format!("Total run time per day: {lo:.2} .. {hi:.2} s"),
            body,
        ));
    }

    html.push_str("</div>\n");
    html
}

/// Commit details: date, author, linked hash and split message
#[must_use]
pub fn commit_html(commit: &CommitInfo) -> String {
    let hash = match commit.commit_url() {
        Some(url) => format!(
            r#"<a href="{}">{}</a>"#,
            escape_html(&url),
            escape_html(commit.short_hash())
        ),
        None => escape_html(commit.short_hash()),
    };
    let message = split_message(&commit.message);
    let mut html = format!(
        r#"<div class="commit"><div>{} {} {}</div><div class="header">{}</div>"#,
        escape_html(&commit.date),
        escape_html(&commit.author),
        hash,
        escape_html(message.header)
    );
    if !message.body.is_empty() {
        html.push_str(&format!(
            r#"<div class="body">{}</div>"#,
            escape_html(message.body)
        ));
    }
    if !message.footer.is_empty() {
        html.push_str(&format!(
            r#"<div class="footer">{}</div>"#,
            escape_html(message.footer)
        ));
    }
    html.push_str("</div>");
    html
}

fn item(key: &str, value: &str, status: &str) -> String {
    let class = if status.is_empty() {
        String::new()
    } else {
        format!(" status-{status}")
    };
    format!(r#"<div class="item{class}"><span class="key">{key}</span>{value}</div>"#)
}

fn pre(text: &str) -> String {
    if text.trim().is_empty() {
        "<em>empty</em>".to_string()
    } else {
        format!("<pre>{}</pre>", escape_html(text))
    }
}

fn check_status(report: &RunReport, key: &str) -> &'static str {
    if report.failures.contains_key(key) {
        "fail"
    } else if report.successes.contains(key) {
        "ok"
    } else {
        ""
    }
}

fn image_stats(c: &ImageComparison) -> String {
    match (c.difference, c.max_difference, c.different_pixels) {
        (Some(diff), Some(max), Some(pixels)) => format!(
            "{}: difference {diff:.6}%, max {max:.6}, {pixels} different pixels",
            escape_html(&c.image)
        ),
        _ => format!(
            "{}: {}",
            escape_html(&c.image),
            escape_html(&c.mismatch_note().unwrap_or_default())
        ),
    }
}

/// HTML rendering of a report set with its history
#[derive(Debug)]
pub struct HtmlReport<'a> {
    basedir: PathBuf,
    reports: &'a ReportSet,
    db: &'a Database,
    created: DateTime<Utc>,
    header: Option<String>,
    footer: Option<String>,
}

impl<'a> HtmlReport<'a> {
    /// Report over `reports` stored in `basedir`, dated by the newest run in `db`
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn new(basedir: &Path, reports: &'a ReportSet, db: &'a Database) -> RegressResult<Self> {
        let created = db.last_run_date()?.unwrap_or_else(Utc::now);
        Ok(Self {
            basedir: basedir.to_path_buf(),
            reports,
            db,
            created,
            header: None,
            footer: None,
        })
    }

    /// Raw HTML inserted at the top of the body
    #[must_use]
    pub fn with_header(mut self, header: Option<String>) -> Self {
        self.header = header;
        self
    }

    /// Raw HTML inserted at the bottom of the body
    #[must_use]
    pub fn with_footer(mut self, footer: Option<String>) -> Self {
        self.footer = footer;
        self
    }

    /// Report timestamp
    #[must_use]
    pub const fn created(&self) -> &DateTime<Utc> {
        &self.created
    }

    /// Write `report.html` and its timestamped copy; returns both paths.
    ///
    /// A copy that already exists for this run date is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried or a file cannot be written.
    pub fn save(&self) -> RegressResult<(PathBuf, PathBuf)> {
        let html = self.render()?;
        let canonical = self.basedir.join(REPORT_HTML);
        let copy = self.basedir.join(timestamped_name(&self.created));
        std::fs::write(&canonical, &html)?;
        if copy.exists() {
            tracing::info!(copy = %copy.display(), "keeping existing timestamped report");
        } else {
            std::fs::write(&copy, &html)?;
        }
        tracing::info!(report = %canonical.display(), "wrote html report");
        Ok((canonical, copy))
    }

    /// Render the page
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn render(&self) -> RegressResult<String> {
        let mut html = String::new();
        let timestamp = format_time(&self.created);

        html.push_str(&format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Regression Report {timestamp}</title>
    <style>{STYLE}    </style>
</head>
<body>
"#
        ));

        if let Some(header) = &self.header {
            html.push_str(header);
            html.push('\n');
        }

        html.push_str("<h1>Regression Report</h1>\n");
        html.push_str(&self.versions(&timestamp));
        html.push_str(&self.commits()?);

        let (ok, fail, disabled) = self.reports.summary();
        html.push_str(&format!(
            r#"<div class="summary"><span>Tests: {}</span><span class="status-ok">Ok: {ok}</span><span class="status-fail">Failed: {fail}</span><span>Disabled: {disabled}</span></div>
"#,
            self.reports.len()
        ));
        html.push_str(&history_chart(
            &self.db.result_counts_over_time()?,
            &self.db.elapsed_time_over_time()?,
        ));

        for (_, report) in self.reports.iter() {
            html.push_str(&self.test(report)?);
        }

        if let Some(footer) = &self.footer {
            html.push_str(footer);
            html.push('\n');
        }
        html.push_str("</body>\n</html>\n");
        Ok(html)
    }

    fn versions(&self, timestamp: &str) -> String {
        let mut html = format!(
            r#"<div class="subtitle"><span class="testdate">{timestamp}</span> <a class="version" href="{REPORT_HTML}" title="{timestamp}">latest</a>"#
        );
        for (i, page) in previous_reports(&self.basedir)
            .iter()
            .take(MAX_PREVIOUS_REPORTS)
            .enumerate()
        {
            let name = page
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let title = name
                .trim_start_matches("report-")
                .trim_end_matches(".html")
                .replacen('T', " ", 1)
                .replace('_', ":");
            html.push_str(&format!(
                r#"<a class="version" href="{}" title="{}">-{}</a>"#,
                escape_html(&name),
                escape_html(&title),
                i + 1
            ));
        }
        html.push_str("</div>\n");
        html
    }

    fn commits(&self) -> RegressResult<String> {
        let mut html = String::from(
            r#"<div class="git"><div class="box boxheader"><span>Repository</span><span>Date</span><span>Commit</span><span>Author</span><span>Message</span></div>"#,
        );
        for commit in self.db.latest_commits()? {
            let info = commit.info();
            let server = if info.server.is_empty() {
                "local".to_string()
            } else {
                let name = info.server.rsplit('/').next().unwrap_or(&info.server);
                format!(
                    r#"<a href="{}">{}</a>"#,
                    escape_html(&info.server),
                    escape_html(name)
                )
            };
            let hash = info.commit_url().map_or_else(
                || escape_html(info.short_hash()),
                |url| {
                    format!(
                        r#"<a href="{}">{}</a>"#,
                        escape_html(&url),
                        escape_html(info.short_hash())
                    )
                },
            );
            html.push_str(&format!(
                r#"<div class="box"><span>{server}</span><span>{}</span><span>{hash}</span><span>{}</span><span>{}</span></div>"#,
                escape_html(&info.date),
                escape_html(&info.author),
                escape_html(split_message(&info.message).header)
            ));
        }
        html.push_str("</div>\n");
        Ok(html)
    }

    fn run_info(key: &str, run: Option<&TestRun>) -> String {
        match run {
            Some(run) => item(
                key,
                &format!(
                    "{} {}{}",
                    format_time(&run.created),
                    escape_html(&abbreviate(&run.commit.message, 50)),
                    commit_html(&run.commit.info())
                ),
                "",
            ),
            None => item(key, "None", ""),
        }
    }

    fn trend(&self, report: &RunReport, name: &str, normal_range: bool) -> RegressResult<String> {
        Ok(self
            .db
            .get_series(&report.module, &report.name, name)?
            .map(|data| sparkline(&data, &self.created, normal_range))
            .unwrap_or_default())
    }

    fn test(&self, report: &RunReport) -> RegressResult<String> {
        let state = report.state();
        let date = parse_date(&report.date).map_or_else(|| report.date.clone(), |d| format_time(&d));
        let open = if state == TestState::Fail { " open" } else { "" };

        let mut html = format!(
            r#"<details class="test {}"{open}><summary><span class="testmodule">{}</span><span class="testname">{}</span><span>{} failures {}</span><span>{:.2}s {}</span><span class="testdate">{}</span></summary>
"#,
            state.as_str(),
            escape_html(&report.module),
            escape_html(&report.name),
            report.failures.len(),
            self.trend(report, "number_of_test_failures", false)?,
            report.elapsed_time,
            self.trend(report, "elapsed_time", true)?,
            escape_html(&date)
        );

        html.push_str(&self.images(report)?);
        for (key, list) in [
            ("missing_imgs", &report.missing_imgs),
            ("missing_refs", &report.missing_refs),
        ] {
            html.push_str(&item(
                key,
                &escape_html(&list.join(", ")),
                check_status(report, key),
            ));
        }

        let returncode = report
            .returncode
            .map_or_else(|| "none".to_string(), |c| c.to_string());
        html.push_str(&item("returncode", &returncode, check_status(report, "returncode")));
        html.push_str(&item(
            "timeout",
            if report.timeout { "yes" } else { "no" },
            check_status(report, "timeout"),
        ));
        html.push_str(&self.log(report));

        let last = self.db.last_testrun(&report.module, &report.name)?;
        html.push_str(&Self::run_info("Current Version", last.as_ref()));
        if state != TestState::Ok {
            let (success, failure) = self
                .db
                .last_success_first_failure(&report.module, &report.name)?;
            html.push_str(&Self::run_info("Last Success", success.as_ref()));
            html.push_str(&Self::run_info("First Failure", failure.as_ref()));
            if let (Some(success), Some(failure)) = (&success, &failure) {
                if let Some(url) = success.commit.info().compare_url(&failure.commit.info()) {
                    html.push_str(&item(
                        "Diff",
                        &format!(r#"<a href="{0}">{0}</a>"#, escape_html(&url)),
                        "",
                    ));
                }
            }
        }

        html.push_str(&item(
            "Paths",
            &format!(
                "{}<br>{}",
                escape_html(&report.path.to_string_lossy()),
                escape_html(&report.outputdir.to_string_lossy())
            ),
            "",
        ));
        html.push_str(&item("command", &pre(&report.command), ""));
        html.push_str(&item("output", &pre(&report.output), ""));
        html.push_str(&item("errors", &pre(&report.errors), ""));

        let screenshot = report.outputdir.join(&report.screenshot);
        if !report.screenshot.is_empty() && screenshot.is_file() {
            html.push_str(&item(
                "screenshot",
                &format!(
                    r#"<img class="screenshot" src="{}" alt="screenshot">"#,
                    href(&self.basedir, &screenshot)
                ),
                "",
            ));
        }

        html.push_str(&self.plots(report)?);
        html.push_str(&Self::failures(report));
        html.push_str("</details>\n");
        Ok(html)
    }

    fn images(&self, report: &RunReport) -> RegressResult<String> {
        let status = check_status(report, "image_tests");
        if report.image_tests.is_empty() {
            return Ok(item("Images", "no comparisons", status));
        }
        let mut html = format!(
            r#"<div class="item"><span class="key{}">Images</span><div class="images">"#,
            if status.is_empty() {
                String::new()
            } else {
                format!(" status-{status}")
            }
        );
        for comparison in &report.image_tests {
            for dir in ["imgtest", "imgref", "imgdiff", "imgmask"] {
                let path = report.outputdir.join(dir).join(&comparison.image);
                if path.is_file() {
                    html.push_str(&format!(
                        r#"<div><div>{dir}</div><img src="{}" alt="{dir} {}"></div>"#,
                        href(&self.basedir, &path),
                        escape_html(&comparison.image)
                    ));
                } else {
                    html.push_str(&format!("<div><div>{dir}</div><em>none</em></div>"));
                }
            }
            let trend =
                self.trend(report, &format!("image_test_diff.{}", comparison.image), true)?;
            html.push_str(&format!(
                r#"<div class="imagestats">{} {trend}</div>"#,
                image_stats(comparison)
            ));
        }
        html.push_str("</div></div>\n");
        Ok(html)
    }

    fn log(&self, report: &RunReport) -> String {
        let path = report.log_path();
        let summary = LogSummary::from_file(&path);
        let link = if path.is_file() {
            format!(
                r#" <a href="{}">{}</a>"#,
                href(&self.basedir, &path),
                escape_html(&report.log)
            )
        } else {
            String::new()
        };
        let mut value = format!(
            "Errors: {} Warnings: {} Info: {}{link}",
            summary.errors.len(),
            summary.warnings,
            summary.infos
        );
        for line in &summary.errors {
            value.push_str(&format!(r#"<div class="error">{}</div>"#, escape_html(line)));
        }
        item("log", &value, check_status(report, "log"))
    }

    fn plots(&self, report: &RunReport) -> RegressResult<String> {
        let serieses = self.db.get_serieses(&report.module, &report.name)?;
        if serieses.is_empty() {
            return Ok(String::new());
        }
        let mut value = String::new();
        for data in &serieses {
            let last = data
                .measurements
                .last()
                .map_or_else(String::new, |m| format!("{:.4}", m.value));
            value.push_str(&format!(
                "<div>{} {} {} {}</div>",
                escape_html(&data.series.name),
                last,
                escape_html(&data.series.quantity.unit),
                sparkline(data, &self.created, true)
            ));
        }
        Ok(item("Plots", &value, ""))
    }

    fn failures(report: &RunReport) -> String {
        if report.failures.is_empty() {
            return item("Failures", "No failures", "ok");
        }
        let mut value = format!("{} failures<ol>", report.failures.len());
        for (key, messages) in &report.failures {
            for message in messages {
                value.push_str(&format!(
                    r#"<li><span class="key">{}</span><span class="error">{}</span></li>"#,
                    escape_html(key),
                    escape_html(message)
                ));
            }
        }
        value.push_str("</ol>");
        item("Failures", &value, "fail")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::history::{Measurement, Quantity, Series};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn series(points: &[(DateTime<Utc>, f64)]) -> SeriesData {
        let created = points.first().map_or_else(Utc::now, |p| p.0);
        let quantity = Quantity {
            id: 1,
            created,
            name: "time".to_string(),
            unit: "s".to_string(),
        };
        SeriesData {
            series: Series {
                id: 1,
                created,
                test_id: 1,
                quantity,
                name: "elapsed_time".to_string(),
            },
            measurements: points
                .iter()
                .enumerate()
                .map(|(i, (t, v))| Measurement {
                    id: i as i64,
                    created: *t,
                    series_id: 1,
                    testrun_id: i as i64,
                    value: *v,
                })
                .collect(),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_timestamped_name() {
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(timestamped_name(&t), "report-2024-03-05T07_08_09.000000.html");
        let later = t + Duration::microseconds(250);
        assert_eq!(timestamped_name(&later), "report-2024-03-05T07_08_09.000250.html");
    }

    #[test]
    fn test_previous_reports_newest_first() {
        let tmp = TempDir::new().unwrap();
        for name in [
            "report-2024-01-01T00_00_00.html",
            "report-2024-02-01T00_00_00.html",
            "report.html",
            "report.json",
        ] {
            std::fs::write(tmp.path().join(name), "").unwrap();
        }
        let pages = previous_reports(tmp.path());
        assert_eq!(pages.len(), 2);
        assert!(pages[0].ends_with("report-2024-02-01T00_00_00.html"));
    }

    #[test]
    fn test_sparkline_window() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let data = series(&[
            (now - Duration::days(60), 100.0),
            (now - Duration::days(2), 1.0),
            (now - Duration::days(1), 2.0),
        ]);
        let svg = sparkline(&data, &now, false);
        assert!(svg.starts_with("<svg"));
        assert!(!svg.contains("band"));
        // the 60 day old value is outside the window
        assert!(svg.contains("1.0000 .. 2.0000 s"));
    }

    #[test]
    fn test_sparkline_falls_back_to_last_values() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let old = now - Duration::days(90);
        let points: Vec<_> = (0..40)
            .map(|i| (old - Duration::days(40 - i), f64::from(i as u32)))
            .collect();
        let svg = sparkline(&series(&points), &now, false);
        assert!(svg.contains("10.0000 .. 39.0000"));
    }

    #[test]
    fn test_sparkline_empty() {
        assert!(sparkline(&series(&[]), &Utc::now(), true).is_empty());
    }

    #[test]
    fn test_sparkline_normal_range_band() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let data = series(&[
            (now - Duration::days(3), 1.0),
            (now - Duration::days(2), 3.0),
            (now - Duration::days(1), 1.0),
            (now - Duration::hours(1), 3.0),
        ]);
        let svg = sparkline(&data, &now, true);
        // mean 2, std 1: the band spans the whole 1..3 value range
        assert!(svg.contains(r#"<rect class="band" x="0" y="1.0" width="100" height="18.0"/>"#));
        assert!(svg.find("<rect").unwrap() < svg.find("<polyline").unwrap());

        let flat = series(&[(now - Duration::days(1), 5.0), (now, 5.0)]);
        assert!(!sparkline(&flat, &now, true).contains("band"));
    }

    #[test]
    fn test_mean_std() {
        assert_eq!(mean_std(&[]), None);
        assert_eq!(mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), Some((5.0, 2.0)));
    }

    #[test]
    fn test_steps_hold_until_midpoint() {
        assert_eq!(
            steps(&[(0.0, 1.0), (10.0, 3.0)]),
            vec![(0.0, 1.0), (5.0, 1.0), (5.0, 3.0), (10.0, 3.0)]
        );
        assert!(steps(&[]).is_empty());
    }

    #[test]
    fn test_history_chart() {
        assert!(history_chart(&[], &[]).is_empty());

        let day = |d: u32| Utc.with_ymd_and_hms(2024, 5, d, 12, 0, 0).unwrap();
        let results = [
            DailyResults {
                date: day(1),
                passed: 3,
                failed: 1,
                disabled: 0,
            },
            DailyResults {
                date: day(2),
                passed: 4,
                failed: 0,
                disabled: 1,
            },
        ];
        let elapsed = [
            DailyValue {
                date: day(1),
                value: 12.5,
            },
            DailyValue {
                date: day(2),
                value: 10.0,
            },
        ];
        let html = history_chart(&results, &elapsed);
        assert!(html.starts_with(r#"<div class="trends">"#));
        for class in ["passed", "failed", "disabled", "runtime"] {
            assert!(html.contains(&format!(r#"<polyline class="{class}""#)), "{class}");
        }
        assert!(html.contains("4 passed, 0 failed, 1 disabled on the last day"));
        assert!(html.contains("Total run time per day: 10.00 .. 12.50 s"));
    }

    #[test]
    fn test_commit_html_links_and_splits() {
        let commit = CommitInfo {
            hash: "0123456789abcdef".to_string(),
            date: "2024-05-01".to_string(),
            author: "A <b>".to_string(),
            message: "Header\n\nBody\n\nFooter".to_string(),
            server: "https://github.com/x/y".to_string(),
        };
        let html = commit_html(&commit);
        assert!(html.contains(r#"href="https://github.com/x/y/commit/0123456789abcdef""#));
        assert!(html.contains(">0123456<"));
        assert!(html.contains("A &lt;b&gt;"));
        assert!(html.contains(r#"<div class="footer">Footer</div>"#));
    }

    #[test]
    fn test_render_contains_tests_and_history() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();

        let mut report = RunReport {
            date: "2024-06-01T10:00:00.000000".to_string(),
            module: "base".to_string(),
            name: "volume<1>".to_string(),
            command: "app -q".to_string(),
            returncode: Some(1),
            outputdir: tmp.path().join("base/volume/run"),
            log: "log.txt".to_string(),
            ..RunReport::default()
        };
        report
            .failures
            .insert("returncode".to_string(), vec!["Return code: 1".to_string()]);
        db.add_report(&report).unwrap();

        let mut set = ReportSet::new();
        set.insert(report);
        let html = HtmlReport::new(tmp.path(), &set, &db)
            .unwrap()
            .with_header(Some("<div id=\"hdr\"></div>".to_string()))
            .render()
            .unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<style>"));
        assert!(html.contains("<div id=\"hdr\"></div>"));
        assert!(html.contains("volume&lt;1&gt;"));
        assert!(html.contains(r#"<details class="test fail" open>"#));
        assert!(html.contains("Return code: 1"));
        assert!(html.contains("Last Success"));
        assert!(html.contains("<svg class=\"spark\""));
        assert!(html.contains("Failed: 1"));
        assert!(html.contains(r#"<div class="trends">"#));
        assert!(html.contains(r#"<polyline class="failed""#));
    }

    #[test]
    fn test_save_writes_both_pages() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let set = ReportSet::new();
        let (canonical, copy) = HtmlReport::new(tmp.path(), &set, &db)
            .unwrap()
            .save()
            .unwrap();
        assert!(canonical.ends_with(REPORT_HTML));
        assert_eq!(
            std::fs::read_to_string(&canonical).unwrap(),
            std::fs::read_to_string(&copy).unwrap()
        );
    }

    #[test]
    fn test_save_keeps_existing_copy() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let set = ReportSet::new();
        let report = HtmlReport::new(tmp.path(), &set, &db).unwrap();

        let (_, copy) = report.save().unwrap();
        std::fs::write(&copy, "first render").unwrap();
        let (canonical, again) = report.save().unwrap();

        assert_eq!(copy, again);
        assert_eq!(std::fs::read_to_string(&again).unwrap(), "first render");
        assert!(std::fs::read_to_string(&canonical).unwrap().starts_with("<!DOCTYPE html>"));
    }
}
