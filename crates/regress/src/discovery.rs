//! Test discovery.
//!
//! Layout searched under every module root:
//!
//! ```text
//! <root>/<module>/tests/regression/<test>/
//!     *.inv          workspaces
//!     *.png          reference images
//!     config.json    optional test configuration
//! ```

use crate::result::RegressResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File extension of workspace documents
pub const WORKSPACE_EXTENSION: &str = "inv";

/// Optional per-test configuration from `config.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// `false` excludes the test from overall success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Script passed to the application, relative to the test directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Unrecognized options, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TestConfig {
    /// Tests are enabled unless explicitly disabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// One regression test directory
#[derive(Debug, Clone, PartialEq)]
pub struct Test {
    /// Test directory name
    pub name: String,
    /// Owning module name
    pub module: String,
    /// Absolute path of the test directory
    pub path: PathBuf,
    /// Absolute path of the owning module directory
    pub module_path: PathBuf,
    /// Workspace files, sorted
    pub workspaces: Vec<PathBuf>,
    /// Reference image file names, relative to `path`, sorted
    pub images: Vec<String>,
    /// Parsed `config.json`
    pub config: TestConfig,
}

impl Test {
    /// Build a test from its directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or `config.json` is malformed.
    pub fn from_dir(module: &str, module_path: &Path, path: &Path) -> RegressResult<Self> {
        let mut workspaces = Vec::new();
        let mut images = Vec::new();

        for entry in sorted_entries(path)? {
            if !entry.is_file() {
                continue;
            }
            match entry.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case(WORKSPACE_EXTENSION) => {
                    workspaces.push(entry);
                }
                Some(ext) if ext.eq_ignore_ascii_case("png") => {
                    if let Some(name) = entry.file_name().and_then(|n| n.to_str()) {
                        images.push(name.to_string());
                    }
                }
                _ => {}
            }
        }

        let config_file = path.join("config.json");
        let config = if config_file.is_file() {
            serde_json::from_str(&std::fs::read_to_string(&config_file)?)?
        } else {
            TestConfig::default()
        };

        Ok(Self {
            name: file_name(path),
            module: module.to_string(),
            path: path.to_path_buf(),
            module_path: module_path.to_path_buf(),
            workspaces,
            images,
            config,
        })
    }

    /// `module/name`, the key used in reports
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.module, self.name)
    }

    /// Absolute script path from the configuration, if any
    #[must_use]
    pub fn script(&self) -> Option<PathBuf> {
        self.config
            .script
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| self.path.join(s))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sorted_entries(dir: &Path) -> RegressResult<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

/// Find every `<module>/tests/regression/<test>` under `module_roots`.
///
/// Roots that do not exist are skipped with a warning. Order is root order,
/// then module name, then test name.
///
/// # Errors
///
/// Returns an error if a directory cannot be read or a `config.json` is malformed.
pub fn discover_tests(module_roots: &[PathBuf]) -> RegressResult<Vec<Test>> {
    let mut tests = Vec::new();

    for root in module_roots {
        if !root.is_dir() {
            tracing::warn!(root = %root.display(), "module root does not exist");
            continue;
        }
        for module_path in sorted_entries(root)? {
            let regression = module_path.join("tests").join("regression");
            if !regression.is_dir() {
                continue;
            }
            let module = file_name(&module_path);
            for test_path in sorted_entries(&regression)? {
                if test_path.is_dir() {
                    tests.push(Test::from_dir(&module, &module_path, &test_path)?);
                }
            }
        }
    }

    tracing::debug!(count = tests.len(), "discovered tests");
    Ok(tests)
}
