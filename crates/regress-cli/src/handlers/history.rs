//! History command handler

use crate::error::{CliError, CliResult};
use crate::HistoryArgs;
use regress::history::{SeriesData, TestRun};
use regress::{Database, DATABASE_FILE};

/// Execute the history command
pub fn execute_history(args: &HistoryArgs) -> CliResult<()> {
    let path = args.output.join(DATABASE_FILE);
    if !path.is_file() {
        return Err(CliError::config(format!(
            "no history database at {}",
            path.display()
        )));
    }
    let db = Database::open(&path)?;
    print!("{}", format_history(&db, &args.module, &args.test, args.limit)?);
    Ok(())
}

/// Render runs, last success, first failure and series of one test
pub fn format_history(db: &Database, module: &str, test: &str, limit: usize) -> CliResult<String> {
    let runs = db.testruns(module, test)?;
    if runs.is_empty() {
        return Err(CliError::invalid_argument(format!(
            "no recorded runs for {module}/{test}"
        )));
    }

    let mut out = format!("{module}/{test}: {} run(s)\n", runs.len());

    let (last_success, first_failure) = db.last_success_first_failure(module, test)?;
    out.push_str(&format!("Last run:      {}\n", run_line(&runs[0])));
    if let Some(run) = &last_success {
        out.push_str(&format!("Last success:  {}\n", run_line(run)));
    }
    if let Some(run) = &first_failure {
        out.push_str(&format!("First failure: {}\n", run_line(run)));
    }

    out.push_str("\nRuns:\n");
    for run in runs.iter().take(limit) {
        out.push_str(&format!("  {}\n", run_line(run)));
        for failure in &run.failures {
            out.push_str(&format!("      {}: {}\n", failure.key, failure.message));
        }
    }

    let series = db.get_serieses(module, test)?;
    if !series.is_empty() {
        out.push_str("\nSeries:\n");
        for data in &series {
            out.push_str(&format!("  {}\n", series_line(data)));
        }
    }
    Ok(out)
}

fn run_line(run: &TestRun) -> String {
    let commit = &run.commit;
    let hash: String = commit.hash.chars().take(8).collect();
    let header = commit.message.lines().next().unwrap_or_default();
    format!(
        "{} {} {} {} \"{}\"",
        run.created.format("%Y-%m-%d %H:%M:%S"),
        if run.passed() { "ok  " } else { "fail" },
        hash,
        commit.author,
        header
    )
}

fn series_line(data: &SeriesData) -> String {
    let values: Vec<f64> = data.measurements.iter().map(|m| m.value).collect();
    let unit = &data.series.quantity.unit;
    match (values.last(), min_max(&values)) {
        (Some(last), Some((lo, hi))) => format!(
            "{}: last {last} {unit}, range {lo} .. {hi} over {} value(s)",
            data.series.name,
            values.len()
        ),
        _ => format!("{}: no values", data.series.name),
    }
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use regress::CommitInfo;

    fn commit(hash: &str) -> CommitInfo {
        CommitInfo {
            hash: hash.to_string(),
            date: "2026-01-02T03:04:05+00:00".to_string(),
            author: "Dev".to_string(),
            message: format!("Change {hash}\n\nbody"),
            server: String::new(),
        }
    }

    fn record(db: &Database, hash: &str, failure: Option<&str>, elapsed: f64) {
        let module = db.get_or_add_module("base").unwrap();
        let test = db.get_or_add_test(&module, "volume").unwrap();
        let commit = db.get_or_add_commit(&commit(hash)).unwrap();
        let mut run = db.add_testrun(&test, &commit).unwrap();
        if let Some(message) = failure {
            db.add_testfailure(&mut run, "returncode", message).unwrap();
        }
        let quantity = db.get_or_add_quantity("time", "s").unwrap();
        let series = db.get_or_add_series(&test, &quantity, "elapsed_time").unwrap();
        db.add_measurement(&series, &run, elapsed).unwrap();
    }

    #[test]
    fn test_unknown_test_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        assert!(format_history(&db, "base", "volume", 10).is_err());
    }

    #[test]
    fn test_history_lists_success_and_failure() {
        let db = Database::open_in_memory().unwrap();
        record(&db, "aaaaaaaaaaaa", None, 1.0);
        record(&db, "bbbbbbbbbbbb", Some("Return code: 1"), 3.0);

        let text = format_history(&db, "base", "volume", 10).unwrap();
        assert!(text.starts_with("base/volume: 2 run(s)"));
        assert!(text.contains("Last success:"));
        assert!(text.contains("aaaaaaaa Dev \"Change aaaaaaaaaaaa\""));
        assert!(text.contains("First failure:"));
        assert!(text.contains("returncode: Return code: 1"));
        assert!(text.contains("elapsed_time: last 3 s, range 1 .. 3 over 2 value(s)"));
    }

    #[test]
    fn test_limit_caps_run_list() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            record(&db, &format!("{i}{i}{i}{i}{i}{i}{i}{i}"), None, f64::from(i));
        }
        let text = format_history(&db, "base", "volume", 2).unwrap();
        let listed = text
            .split("\nRuns:\n")
            .nth(1)
            .unwrap()
            .split("\n\n")
            .next()
            .unwrap()
            .lines()
            .count();
        assert_eq!(listed, 2);
    }

    #[test]
    fn test_min_max() {
        assert_eq!(min_max(&[]), None);
        assert_eq!(min_max(&[2.0, -1.0, 5.0]), Some((-1.0, 5.0)));
    }
}
