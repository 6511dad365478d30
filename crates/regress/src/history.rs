//! Append-only run history in SQLite.
//!
//! Every row carries an integer id and a creation timestamp (RFC 3339, UTC,
//! nanoseconds, so text order is time order). Natural keys are resolved with
//! `get_or_add_*` helpers; test runs, failures and measurements are always new
//! rows.

use crate::git::CommitInfo;
use crate::report::RunReport;
use crate::result::RegressResult;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// Current schema version stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 3;

/// File name of the history database inside the output directory
pub const DATABASE_FILE: &str = "report.sqlite";

/// Run-produced extra measurements inside a run directory
pub const STATS_FILE: &str = "stats.json";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS module (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TEXT NOT NULL,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS test (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TEXT NOT NULL,
    module_id INTEGER NOT NULL REFERENCES module(id),
    name TEXT NOT NULL,
    UNIQUE(module_id, name)
);
CREATE TABLE IF NOT EXISTS quantity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TEXT NOT NULL,
    name TEXT NOT NULL UNIQUE,
    unit TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS series (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TEXT NOT NULL,
    test_id INTEGER NOT NULL REFERENCES test(id),
    quantity_id INTEGER NOT NULL REFERENCES quantity(id),
    name TEXT NOT NULL,
    UNIQUE(test_id, quantity_id, name)
);
CREATE TABLE IF NOT EXISTS "commit" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TEXT NOT NULL,
    hash TEXT NOT NULL UNIQUE,
    date TEXT NOT NULL,
    author TEXT NOT NULL,
    message TEXT NOT NULL,
    server TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS testrun (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TEXT NOT NULL,
    test_id INTEGER NOT NULL REFERENCES test(id),
    commit_id INTEGER NOT NULL REFERENCES "commit"(id),
    enabled INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS testfailure (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TEXT NOT NULL,
    testrun_id INTEGER NOT NULL REFERENCES testrun(id),
    key TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS measurement (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TEXT NOT NULL,
    series_id INTEGER NOT NULL REFERENCES series(id),
    testrun_id INTEGER NOT NULL REFERENCES testrun(id),
    value REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_testrun_test ON testrun(test_id, created);
CREATE INDEX IF NOT EXISTS idx_measurement_series ON measurement(series_id, created);
"#;

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn created_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn columns(conn: &Connection, table: &str) -> RegressResult<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> RegressResult<()> {
    if !columns(conn, table)?.contains(column) {
        conn.execute(
            &format!("ALTER TABLE \"{table}\" ADD COLUMN {column} {definition}"),
            [],
        )?;
        tracing::info!(table, column, "added missing column");
    }
    Ok(())
}

/// A module row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Row id
    pub id: i64,
    /// Insertion time
    pub created: DateTime<Utc>,
    /// Name
    pub name: String,
}

/// A test row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    /// Row id
    pub id: i64,
    /// Insertion time
    pub created: DateTime<Utc>,
    /// Owning module
    pub module_id: i64,
    /// Name
    pub name: String,
}

/// A quantity row: what is measured and in which unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantity {
    /// Row id
    pub id: i64,
    /// Insertion time
    pub created: DateTime<Utc>,
    /// Name
    pub name: String,
    /// Unit label
    pub unit: String,
}

/// A series row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    /// Row id
    pub id: i64,
    /// Insertion time
    pub created: DateTime<Utc>,
    /// Owning test
    pub test_id: i64,
    /// Measured quantity
    pub quantity: Quantity,
    /// Name
    pub name: String,
}

/// A commit row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Row id
    pub id: i64,
    /// Insertion time
    pub created: DateTime<Utc>,
    /// Full commit hash
    pub hash: String,
    /// Committer date, ISO-8601
    pub date: String,
    /// Committer name
    pub author: String,
    /// Full message
    pub message: String,
    /// Normalized origin, or empty
    pub server: String,
}

impl Commit {
    /// Commit metadata without the row bookkeeping
    #[must_use]
    pub fn info(&self) -> CommitInfo {
        CommitInfo {
            hash: self.hash.clone(),
            date: self.date.clone(),
            author: self.author.clone(),
            message: self.message.clone(),
            server: self.server.clone(),
        }
    }
}

/// A recorded failure of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    /// Row id
    pub id: i64,
    /// Insertion time
    pub created: DateTime<Utc>,
    /// Owning run
    pub testrun_id: i64,
    /// Check key
    pub key: String,
    /// Full message
    pub message: String,
}

/// One run of one test against one commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    /// Row id
    pub id: i64,
    /// Insertion time
    pub created: DateTime<Utc>,
    /// Owning test
    pub test_id: i64,
    /// Commit under test
    pub commit: Commit,
    /// False when the test was disabled by its configuration
    pub enabled: bool,
    /// Recorded failures
    pub failures: Vec<TestFailure>,
}

impl TestRun {
    /// No failure was recorded
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One value of a series
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Row id
    pub id: i64,
    /// Insertion time
    pub created: DateTime<Utc>,
    /// Owning series
    pub series_id: i64,
    /// Owning run
    pub testrun_id: i64,
    /// Measured value
    pub value: f64,
}

/// A series together with its values, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesData {
    /// Series row
    pub series: Series,
    /// Values, oldest first
    pub measurements: Vec<Measurement>,
}

/// Run outcomes of one day; `date` is the newest run of that day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyResults {
    /// Newest run of the day
    pub date: DateTime<Utc>,
    /// Enabled runs without failures
    pub passed: usize,
    /// Enabled runs with at least one failure
    pub failed: usize,
    /// Runs of disabled tests
    pub disabled: usize,
}

/// One aggregated value of one day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyValue {
    /// Newest contributing row of the day
    pub date: DateTime<Utc>,
    /// Aggregated value
    pub value: f64,
}

/// Row shape of `stats.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    /// Name
    pub name: String,
    /// Measured quantity
    pub quantity: String,
    /// Unit label
    pub unit: String,
    /// Measured value
    pub value: f64,
}

/// Read `stats.json` from a run directory; missing file gives no rows.
///
/// # Errors
///
/// Returns an error if the file exists but is not valid.
pub fn read_stats(run_dir: &Path) -> RegressResult<Vec<StatRecord>> {
    let path = run_dir.join(STATS_FILE);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

/// History database handle
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> RegressResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Fresh in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> RegressResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> RegressResult<Self> {
        conn.execute_batch(SCHEMA)?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < 2 {
            // version 1 stored commits without their origin
            add_column_if_missing(&conn, "commit", "server", "TEXT NOT NULL DEFAULT ''")?;
        }
        if version < 3 {
            // version 2 did not tell disabled runs apart
            add_column_if_missing(&conn, "testrun", "enabled", "INTEGER NOT NULL DEFAULT 1")?;
        }
        if version != SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tracing::debug!(from = version, to = SCHEMA_VERSION, "history schema migrated");
        }
        Ok(Self { conn })
    }

    /// Schema version of the open file
    ///
    /// # Errors
    ///
    /// Returns an error if the pragma cannot be read.
    pub fn schema_version(&self) -> RegressResult<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    // -------------------------------------------------------------------------
    // get-or-add
    // -------------------------------------------------------------------------

    /// Module named `name`, created on first use
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_or_add_module(&self, name: &str) -> RegressResult<Module> {
        let find = |conn: &Connection| {
            conn.query_row(
                "SELECT id, created, name FROM module WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Module {
                        id: row.get(0)?,
                        created: created_at(row, 1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()
        };
        if let Some(module) = find(&self.conn)? {
            return Ok(module);
        }
        self.conn.execute(
            "INSERT INTO module (created, name) VALUES (?1, ?2)",
            params![now(), name],
        )?;
        Ok(find(&self.conn)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
    }

    /// Test `name` of `module`, created on first use
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_or_add_test(&self, module: &Module, name: &str) -> RegressResult<TestRecord> {
        let find = |conn: &Connection| {
            conn.query_row(
                "SELECT id, created, module_id, name FROM test WHERE module_id = ?1 AND name = ?2",
                params![module.id, name],
                |row| {
                    Ok(TestRecord {
                        id: row.get(0)?,
                        created: created_at(row, 1)?,
                        module_id: row.get(2)?,
                        name: row.get(3)?,
                    })
                },
            )
            .optional()
        };
        if let Some(test) = find(&self.conn)? {
            return Ok(test);
        }
        self.conn.execute(
            "INSERT INTO test (created, module_id, name) VALUES (?1, ?2, ?3)",
            params![now(), module.id, name],
        )?;
        Ok(find(&self.conn)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
    }

    /// Quantity `name`; the unit is fixed by the first caller
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_or_add_quantity(&self, name: &str, unit: &str) -> RegressResult<Quantity> {
        if let Some(quantity) = self.quantity_by_name(name)? {
            if unit_conflict(&quantity, unit) {
                tracing::warn!(
                    quantity = name,
                    stored = %quantity.unit,
                    incoming = unit,
                    "unit differs from the stored one, keeping the stored unit"
                );
            }
            return Ok(quantity);
        }
        self.conn.execute(
            "INSERT INTO quantity (created, name, unit) VALUES (?1, ?2, ?3)",
            params![now(), name, unit],
        )?;
        Ok(self
            .quantity_by_name(name)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?)
    }

    fn quantity_by_name(&self, name: &str) -> RegressResult<Option<Quantity>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, created, name, unit FROM quantity WHERE name = ?1",
                params![name],
                quantity_row,
            )
            .optional()?)
    }

    fn quantity_by_id(&self, id: i64) -> RegressResult<Quantity> {
        Ok(self.conn.query_row(
            "SELECT id, created, name, unit FROM quantity WHERE id = ?1",
            params![id],
            quantity_row,
        )?)
    }

    /// Series `name` of `test` measuring `quantity`, created on first use
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_or_add_series(
        &self,
        test: &TestRecord,
        quantity: &Quantity,
        name: &str,
    ) -> RegressResult<Series> {
        let find = |conn: &Connection| {
            conn.query_row(
                "SELECT id, created, test_id, name FROM series \
                 WHERE test_id = ?1 AND quantity_id = ?2 AND name = ?3",
                params![test.id, quantity.id, name],
                |row| {
                    Ok(Series {
                        id: row.get(0)?,
                        created: created_at(row, 1)?,
                        test_id: row.get(2)?,
                        quantity: quantity.clone(),
                        name: row.get(3)?,
                    })
                },
            )
            .optional()
        };
        if let Some(series) = find(&self.conn)? {
            return Ok(series);
        }
        self.conn.execute(
            "INSERT INTO series (created, test_id, quantity_id, name) VALUES (?1, ?2, ?3, ?4)",
            params![now(), test.id, quantity.id, name],
        )?;
        Ok(find(&self.conn)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
    }

    /// Commit row for `info.hash`, created on first use
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_or_add_commit(&self, info: &CommitInfo) -> RegressResult<Commit> {
        let find = |conn: &Connection| {
            conn.query_row(
                "SELECT id, created, hash, date, author, message, server FROM \"commit\" WHERE hash = ?1",
                params![info.hash],
                commit_row,
            )
            .optional()
        };
        if let Some(commit) = find(&self.conn)? {
            return Ok(commit);
        }
        self.conn.execute(
            "INSERT INTO \"commit\" (created, hash, date, author, message, server) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![now(), info.hash, info.date, info.author, info.message, info.server],
        )?;
        Ok(find(&self.conn)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
    }

    // -------------------------------------------------------------------------
    // append
    // -------------------------------------------------------------------------

    /// New run of `test` at `commit`
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn add_testrun(&self, test: &TestRecord, commit: &Commit) -> RegressResult<TestRun> {
        let created = now();
        self.conn.execute(
            "INSERT INTO testrun (created, test_id, commit_id) VALUES (?1, ?2, ?3)",
            params![created, test.id, commit.id],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(TestRun {
            id,
            created: DateTime::parse_from_rfc3339(&created)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            test_id: test.id,
            commit: commit.clone(),
            enabled: true,
            failures: Vec::new(),
        })
    }

    /// Flag `testrun` as belonging to a disabled test
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn mark_disabled(&self, testrun: &mut TestRun) -> RegressResult<()> {
        self.conn.execute(
            "UPDATE testrun SET enabled = 0 WHERE id = ?1",
            params![testrun.id],
        )?;
        testrun.enabled = false;
        Ok(())
    }

    /// Record a failure on `testrun`
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn add_testfailure(
        &self,
        testrun: &mut TestRun,
        key: &str,
        message: &str,
    ) -> RegressResult<TestFailure> {
        self.conn.execute(
            "INSERT INTO testfailure (created, testrun_id, key, message) VALUES (?1, ?2, ?3, ?4)",
            params![now(), testrun.id, key, message],
        )?;
        let failure = self.failure_by_id(self.conn.last_insert_rowid())?;
        testrun.failures.push(failure.clone());
        Ok(failure)
    }

    fn failure_by_id(&self, id: i64) -> RegressResult<TestFailure> {
        Ok(self.conn.query_row(
            "SELECT id, created, testrun_id, key, message FROM testfailure WHERE id = ?1",
            params![id],
            failure_row,
        )?)
    }

    /// Record `value` for `series` in `testrun`
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn add_measurement(
        &self,
        series: &Series,
        testrun: &TestRun,
        value: f64,
    ) -> RegressResult<Measurement> {
        self.conn.execute(
            "INSERT INTO measurement (created, series_id, testrun_id, value) VALUES (?1, ?2, ?3, ?4)",
            params![now(), series.id, testrun.id, value],
        )?;
        Ok(self.conn.query_row(
            "SELECT id, created, series_id, testrun_id, value FROM measurement WHERE id = ?1",
            params![self.conn.last_insert_rowid()],
            measurement_row,
        )?)
    }

    /// Persist one finished report: its run, failures, standard series and any
    /// `stats.json` rows found in its run directory.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure. An unreadable `stats.json` is
    /// logged and skipped.
    pub fn add_report(&self, report: &RunReport) -> RegressResult<TestRun> {
        let module = self.get_or_add_module(&report.module)?;
        let test = self.get_or_add_test(&module, &report.name)?;
        let commit = self.get_or_add_commit(&report.git)?;
        let mut run = self.add_testrun(&test, &commit)?;
        if !report.is_enabled() {
            self.mark_disabled(&mut run)?;
        }

        for (key, messages) in &report.failures {
            for message in messages {
                self.add_testfailure(&mut run, key, message)?;
            }
        }

        let time = self.get_or_add_quantity("time", "s")?;
        let count = self.get_or_add_quantity("count", "")?;
        let fraction = self.get_or_add_quantity("fraction", "%")?;

        let series = self.get_or_add_series(&test, &time, "elapsed_time")?;
        self.add_measurement(&series, &run, report.elapsed_time)?;

        let series = self.get_or_add_series(&test, &count, "number_of_test_failures")?;
        self.add_measurement(&series, &run, report.failures.len() as f64)?;

        for comparison in &report.image_tests {
            if let Some(difference) = comparison.difference {
                let name = format!("image_test_diff.{}", comparison.image);
                let series = self.get_or_add_series(&test, &fraction, &name)?;
                self.add_measurement(&series, &run, difference)?;
            }
        }

        match read_stats(&report.outputdir) {
            Ok(stats) => {
                for stat in stats {
                    let quantity = self.get_or_add_quantity(&stat.quantity, &stat.unit)?;
                    let series = self.get_or_add_series(&test, &quantity, &stat.name)?;
                    self.add_measurement(&series, &run, stat.value)?;
                }
            }
            Err(e) => {
                tracing::warn!(test = %report.key(), error = %e, "ignoring unreadable stats.json");
            }
        }

        Ok(run)
    }

    // -------------------------------------------------------------------------
    // queries
    // -------------------------------------------------------------------------

    fn commit_by_id(&self, id: i64) -> RegressResult<Commit> {
        Ok(self.conn.query_row(
            "SELECT id, created, hash, date, author, message, server FROM \"commit\" WHERE id = ?1",
            params![id],
            commit_row,
        )?)
    }

    fn failures_of(&self, testrun_id: i64) -> RegressResult<Vec<TestFailure>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created, testrun_id, key, message FROM testfailure \
             WHERE testrun_id = ?1 ORDER BY id",
        )?;
        let failures = stmt
            .query_map(params![testrun_id], failure_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(failures)
    }

    /// Runs of `module/test`, newest first
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn testruns(&self, module: &str, test: &str) -> RegressResult<Vec<TestRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT tr.id, tr.created, tr.test_id, tr.commit_id, tr.enabled FROM testrun tr \
             JOIN test t ON t.id = tr.test_id \
             JOIN module m ON m.id = t.module_id \
             WHERE m.name = ?1 AND t.name = ?2 \
             ORDER BY tr.created DESC, tr.id DESC",
        )?;
        let rows = stmt
            .query_map(params![module, test], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    created_at(row, 1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, created, test_id, commit_id, enabled)| {
                Ok(TestRun {
                    id,
                    created,
                    test_id,
                    commit: self.commit_by_id(commit_id)?,
                    enabled,
                    failures: self.failures_of(id)?,
                })
            })
            .collect()
    }

    /// Most recent run of `module/test`
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn last_testrun(&self, module: &str, test: &str) -> RegressResult<Option<TestRun>> {
        Ok(self.testruns(module, test)?.into_iter().next())
    }

    /// Most recent passing run and the oldest run of the failing streak after it.
    ///
    /// `(None, None)` when no run ever passed; `(Some, None)` when the latest
    /// run passed.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn last_success_first_failure(
        &self,
        module: &str,
        test: &str,
    ) -> RegressResult<(Option<TestRun>, Option<TestRun>)> {
        let mut first_failure = None;
        for run in self.testruns(module, test)? {
            if run.passed() {
                return Ok((Some(run), first_failure));
            }
            first_failure = Some(run);
        }
        Ok((None, None))
    }

    fn series_of(&self, module: &str, test: &str, name: Option<&str>) -> RegressResult<Vec<SeriesData>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.created, s.test_id, s.quantity_id, s.name FROM series s \
             JOIN test t ON t.id = s.test_id \
             JOIN module m ON m.id = t.module_id \
             WHERE m.name = ?1 AND t.name = ?2 AND (?3 IS NULL OR s.name = ?3) \
             ORDER BY s.name, s.id",
        )?;
        let rows = stmt
            .query_map(params![module, test, name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    created_at(row, 1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut values = self.conn.prepare(
            "SELECT id, created, series_id, testrun_id, value FROM measurement \
             WHERE series_id = ?1 ORDER BY created, id",
        )?;
        rows.into_iter()
            .map(|(id, created, test_id, quantity_id, name)| {
                let measurements = values
                    .query_map(params![id], measurement_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SeriesData {
                    series: Series {
                        id,
                        created,
                        test_id,
                        quantity: self.quantity_by_id(quantity_id)?,
                        name,
                    },
                    measurements,
                })
            })
            .collect()
    }

    /// Series `name` of `module/test` with its values
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_series(&self, module: &str, test: &str, name: &str) -> RegressResult<Option<SeriesData>> {
        Ok(self.series_of(module, test, Some(name))?.into_iter().next())
    }

    /// Every series of `module/test`, by name
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_serieses(&self, module: &str, test: &str) -> RegressResult<Vec<SeriesData>> {
        self.series_of(module, test, None)
    }

    /// Newest commit per distinct server, newest first
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn latest_commits(&self) -> RegressResult<Vec<Commit>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.created, c.hash, c.date, c.author, c.message, c.server \
             FROM \"commit\" c ORDER BY c.created DESC, c.id DESC",
        )?;
        let commits = stmt
            .query_map([], commit_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut seen = BTreeSet::new();
        Ok(commits
            .into_iter()
            .filter(|c| seen.insert(c.server.clone()))
            .collect())
    }

    /// Creation time of the newest run
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn last_run_date(&self) -> RegressResult<Option<DateTime<Utc>>> {
        Ok(self
            .conn
            .query_row(
                "SELECT created FROM testrun ORDER BY created DESC, id DESC LIMIT 1",
                [],
                |row| created_at(row, 0),
            )
            .optional()?)
    }

    /// Outcome counts of all runs, one entry per UTC day, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn result_counts_over_time(&self) -> RegressResult<Vec<DailyResults>> {
        let mut stmt = self.conn.prepare(
            "SELECT MAX(tr.created), \
                    SUM(tr.enabled != 0 AND NOT EXISTS \
                        (SELECT 1 FROM testfailure f WHERE f.testrun_id = tr.id)), \
                    SUM(tr.enabled != 0 AND EXISTS \
                        (SELECT 1 FROM testfailure f WHERE f.testrun_id = tr.id)), \
                    SUM(tr.enabled = 0) \
             FROM testrun tr GROUP BY substr(tr.created, 1, 10) ORDER BY 1",
        )?;
        let count = |row: &Row<'_>, idx: usize| -> rusqlite::Result<usize> {
            Ok(usize::try_from(row.get::<_, i64>(idx)?).unwrap_or_default())
        };
        let days = stmt
            .query_map([], |row| {
                Ok(DailyResults {
                    date: created_at(row, 0)?,
                    passed: count(row, 1)?,
                    failed: count(row, 2)?,
                    disabled: count(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(days)
    }

    /// Summed `elapsed_time` of all runs, one entry per UTC day, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn elapsed_time_over_time(&self) -> RegressResult<Vec<DailyValue>> {
        let mut stmt = self.conn.prepare(
            "SELECT MAX(m.created), SUM(m.value) FROM measurement m \
             JOIN series s ON s.id = m.series_id \
             WHERE s.name = 'elapsed_time' \
             GROUP BY substr(m.created, 1, 10) ORDER BY 1",
        )?;
        let days = stmt
            .query_map([], |row| {
                Ok(DailyValue {
                    date: created_at(row, 0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(days)
    }

    /// Names of every test with at least one run, as `(module, test)`
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn tests(&self) -> RegressResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.name, t.name FROM test t JOIN module m ON m.id = t.module_id \
             ORDER BY m.name, t.name",
        )?;
        let names = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

fn unit_conflict(stored: &Quantity, unit: &str) -> bool {
    stored.unit != unit
}

fn quantity_row(row: &Row<'_>) -> rusqlite::Result<Quantity> {
    Ok(Quantity {
        id: row.get(0)?,
        created: created_at(row, 1)?,
        name: row.get(2)?,
        unit: row.get(3)?,
    })
}

fn commit_row(row: &Row<'_>) -> rusqlite::Result<Commit> {
    Ok(Commit {
        id: row.get(0)?,
        created: created_at(row, 1)?,
        hash: row.get(2)?,
        date: row.get(3)?,
        author: row.get(4)?,
        message: row.get(5)?,
        server: row.get(6)?,
    })
}

fn failure_row(row: &Row<'_>) -> rusqlite::Result<TestFailure> {
    Ok(TestFailure {
        id: row.get(0)?,
        created: created_at(row, 1)?,
        testrun_id: row.get(2)?,
        key: row.get(3)?,
        message: row.get(4)?,
    })
}

fn measurement_row(row: &Row<'_>) -> rusqlite::Result<Measurement> {
    Ok(Measurement {
        id: row.get(0)?,
        created: created_at(row, 1)?,
        series_id: row.get(2)?,
        testrun_id: row.get(3)?,
        value: row.get(4)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::image_compare::ImageComparison;
    use tempfile::TempDir;

    fn commit(hash: &str, server: &str) -> CommitInfo {
        CommitInfo {
            hash: hash.to_string(),
            date: "2024-05-01T10:00:00+02:00".to_string(),
            author: "Dev".to_string(),
            message: "Change things".to_string(),
            server: server.to_string(),
        }
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get(0))
            .unwrap()
    }

    fn run(db: &Database, hash: &str, failures: &[(&str, &str)]) -> TestRun {
        let module = db.get_or_add_module("base").unwrap();
        let test = db.get_or_add_test(&module, "volume").unwrap();
        let commit = db.get_or_add_commit(&commit(hash, "")).unwrap();
        let mut run = db.add_testrun(&test, &commit).unwrap();
        for (key, message) in failures {
            db.add_testfailure(&mut run, key, message).unwrap();
        }
        run
    }

    #[test]
    fn test_get_or_add_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = db.get_or_add_module("base").unwrap();
        let b = db.get_or_add_module("base").unwrap();
        assert_eq!(a.id, b.id);

        let t1 = db.get_or_add_test(&a, "volume").unwrap();
        let t2 = db.get_or_add_test(&b, "volume").unwrap();
        assert_eq!(t1.id, t2.id);

        let q1 = db.get_or_add_quantity("time", "s").unwrap();
        let q2 = db.get_or_add_quantity("time", "ms").unwrap();
        assert_eq!(q1, q2);
        assert_eq!(q2.unit, "s");

        let s1 = db.get_or_add_series(&t1, &q1, "elapsed_time").unwrap();
        let s2 = db.get_or_add_series(&t2, &q2, "elapsed_time").unwrap();
        assert_eq!(s1.id, s2.id);

        let c1 = db.get_or_add_commit(&commit("abc", "")).unwrap();
        let c2 = db.get_or_add_commit(&commit("abc", "")).unwrap();
        assert_eq!(c1.id, c2.id);

        for table in ["module", "test", "quantity", "series", "commit"] {
            assert_eq!(count(&db, table), 1, "{table}");
        }
    }

    #[test]
    fn test_add_testrun_always_creates() {
        let db = Database::open_in_memory().unwrap();
        let a = run(&db, "abc", &[]);
        let b = run(&db, "abc", &[]);
        assert_ne!(a.id, b.id);
        assert_eq!(count(&db, "testrun"), 2);
    }

    #[test]
    fn test_last_testrun_is_newest() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.last_testrun("base", "volume").unwrap().is_none());
        run(&db, "a", &[]);
        let second = run(&db, "b", &[("log", "Error: x")]);
        let last = db.last_testrun("base", "volume").unwrap().unwrap();
        assert_eq!(last.id, second.id);
        assert_eq!(last.commit.hash, "b");
        assert_eq!(last.failures.len(), 1);
    }

    #[test]
    fn test_last_success_first_failure() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.last_success_first_failure("base", "volume").unwrap(), (None, None));

        let fail0 = run(&db, "f0", &[("returncode", "1")]);
        assert_eq!(db.last_success_first_failure("base", "volume").unwrap(), (None, None));

        let ok = run(&db, "ok", &[]);
        let (s, f) = db.last_success_first_failure("base", "volume").unwrap();
        assert_eq!(s.unwrap().id, ok.id);
        assert!(f.is_none());

        let fail1 = run(&db, "f1", &[("log", "Error: a")]);
        run(&db, "f2", &[("log", "Error: b")]);
        let (s, f) = db.last_success_first_failure("base", "volume").unwrap();
        assert_eq!(s.unwrap().id, ok.id);
        assert_eq!(f.unwrap().id, fail1.id);
        assert_ne!(fail0.id, fail1.id);
    }

    #[test]
    fn test_add_report_records_series() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(STATS_FILE),
            r#"[{"name": "fps", "quantity": "rate", "unit": "1/s", "value": 59.5}]"#,
        )
        .unwrap();

        let mut report = RunReport {
            module: "base".to_string(),
            name: "volume".to_string(),
            elapsed_time: 1.5,
            outputdir: tmp.path().to_path_buf(),
            git: commit("abc", "https://github.com/a/b"),
            ..RunReport::default()
        };
        report.image_tests.push(ImageComparison {
            image: "canvas.png".to_string(),
            test_size: (2, 2),
            test_mode: "RGB".to_string(),
            ref_size: (2, 2),
            ref_mode: "RGB".to_string(),
            difference: Some(0.25),
            max_difference: Some(0.1),
            different_pixels: Some(1),
        });
        report
            .failures
            .insert("image_tests".to_string(), vec!["canvas.png differs".to_string()]);

        let db = Database::open_in_memory().unwrap();
        let run = db.add_report(&report).unwrap();
        assert_eq!(run.failures.len(), 1);

        let names: Vec<_> = db
            .get_serieses("base", "volume")
            .unwrap()
            .into_iter()
            .map(|s| s.series.name)
            .collect();
        assert_eq!(
            names,
            vec!["elapsed_time", "fps", "image_test_diff.canvas.png", "number_of_test_failures"]
        );

        let fps = db.get_series("base", "volume", "fps").unwrap().unwrap();
        assert_eq!(fps.series.quantity.unit, "1/s");
        assert_eq!(fps.measurements[0].value, 59.5);

        let failures = db.get_series("base", "volume", "number_of_test_failures").unwrap().unwrap();
        assert_eq!(failures.measurements[0].value, 1.0);
        assert!(db.get_series("base", "volume", "absent").unwrap().is_none());
    }

    #[test]
    fn test_unit_conflict_keeps_stored_unit() {
        let db = Database::open_in_memory().unwrap();
        let stored = db.get_or_add_quantity("rate", "1/s").unwrap();
        assert!(!unit_conflict(&stored, "1/s"));
        assert!(unit_conflict(&stored, "Hz"));
        assert_eq!(db.get_or_add_quantity("rate", "Hz").unwrap().unit, "1/s");
    }

    fn dated_report(tmp: &TempDir, name: &str, elapsed: f64, failed: bool, enabled: bool) -> RunReport {
        let mut report = RunReport {
            module: "base".to_string(),
            name: name.to_string(),
            elapsed_time: elapsed,
            outputdir: tmp.path().join(name),
            git: commit("abc", ""),
            ..RunReport::default()
        };
        if failed {
            report
                .failures
                .insert("returncode".to_string(), vec!["Return code: 1".to_string()]);
        }
        report.config.enabled = Some(enabled);
        report
    }

    fn backdate(db: &Database, run: &TestRun, created: &str) {
        db.conn
            .execute("UPDATE testrun SET created = ?1 WHERE id = ?2", params![created, run.id])
            .unwrap();
        db.conn
            .execute("UPDATE measurement SET created = ?1 WHERE testrun_id = ?2", params![created, run.id])
            .unwrap();
    }

    #[test]
    fn test_daily_aggregates() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        assert!(db.result_counts_over_time().unwrap().is_empty());
        assert!(db.elapsed_time_over_time().unwrap().is_empty());

        let day1 = [
            dated_report(&tmp, "a", 1.0, false, true),
            dated_report(&tmp, "b", 2.0, true, true),
            dated_report(&tmp, "c", 4.0, true, false),
        ];
        for (i, report) in day1.iter().enumerate() {
            let run = db.add_report(report).unwrap();
            backdate(&db, &run, &format!("2024-05-01T10:00:0{i}.000000000Z"));
        }
        let run = db.add_report(&dated_report(&tmp, "a", 1.5, false, true)).unwrap();
        backdate(&db, &run, "2024-05-02T09:00:00.000000000Z");

        let counts = db.result_counts_over_time().unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(
            (counts[0].passed, counts[0].failed, counts[0].disabled),
            (1, 1, 1)
        );
        assert_eq!(counts[0].date.to_rfc3339(), "2024-05-01T10:00:02+00:00");
        assert_eq!((counts[1].passed, counts[1].failed, counts[1].disabled), (1, 0, 0));

        let elapsed = db.elapsed_time_over_time().unwrap();
        let totals: Vec<_> = elapsed.iter().map(|d| d.value).collect();
        assert_eq!(totals, vec![7.0, 1.5]);
    }

    #[test]
    fn test_disabled_flag_round_trips() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let run = db.add_report(&dated_report(&tmp, "off", 1.0, false, false)).unwrap();
        assert!(!run.enabled);
        let stored = db.last_testrun("base", "off").unwrap().unwrap();
        assert!(!stored.enabled);
    }

    #[test]
    fn test_migrates_version_two_testruns() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DATABASE_FILE);
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE testrun (id INTEGER PRIMARY KEY AUTOINCREMENT, created TEXT NOT NULL, \
                 test_id INTEGER NOT NULL, commit_id INTEGER NOT NULL); \
                 PRAGMA user_version = 2;",
            )
            .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        assert!(columns(&db.conn, "testrun").unwrap().contains("enabled"));
        assert!(run(&db, "a", &[]).enabled);
    }

    #[test]
    fn test_latest_commits_per_server() {
        let db = Database::open_in_memory().unwrap();
        db.get_or_add_commit(&commit("a1", "https://github.com/x/core")).unwrap();
        db.get_or_add_commit(&commit("b1", "https://github.com/x/modules")).unwrap();
        db.get_or_add_commit(&commit("a2", "https://github.com/x/core")).unwrap();
        let latest: Vec<_> = db
            .latest_commits()
            .unwrap()
            .into_iter()
            .map(|c| c.hash)
            .collect();
        assert_eq!(latest, vec!["a2", "b1"]);
    }

    #[test]
    fn test_last_run_date() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.last_run_date().unwrap().is_none());
        let r = run(&db, "a", &[]);
        assert_eq!(db.last_run_date().unwrap().unwrap(), r.created);
    }

    #[test]
    fn test_migrates_version_one_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DATABASE_FILE);
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE \"commit\" (id INTEGER PRIMARY KEY AUTOINCREMENT, created TEXT NOT NULL, \
                 hash TEXT NOT NULL UNIQUE, date TEXT NOT NULL, author TEXT NOT NULL, message TEXT NOT NULL); \
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        assert!(columns(&db.conn, "commit").unwrap().contains("server"));
        let c = db.get_or_add_commit(&commit("abc", "https://h/p")).unwrap();
        assert_eq!(c.server, "https://h/p");
    }

    #[test]
    fn test_reopen_keeps_history() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DATABASE_FILE);
        {
            let db = Database::open(&path).unwrap();
            run(&db, "a", &[]);
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.testruns("base", "volume").unwrap().len(), 1);
        assert_eq!(db.tests().unwrap(), vec![("base".to_string(), "volume".to_string())]);
    }
}
