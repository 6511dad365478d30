//! Project root discovery, tool configuration and path helpers.
//!
//! The tool configuration is a small INI file:
//!
//! ```text
//! [tools]
//! git = /usr/bin/git
//! cmake = /opt/cmake/bin/cmake
//! ```
//!
//! Several files can be merged; later files override earlier ones key by key.

use crate::result::{RegressError, RegressResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directories that together identify the project root
pub const ROOT_MARKERS: [&str; 3] = ["modules/base", "include/inviwo", "tools/templates"];

/// File name of the repository level tool configuration
pub const CONFIG_FILE_NAME: &str = "regress.ini";

/// Walk upward from `start` until a directory containing all [`ROOT_MARKERS`] is found.
///
/// # Errors
///
/// Returns [`RegressError::NotFound`] when no ancestor qualifies.
pub fn find_project_root(start: &Path) -> RegressResult<PathBuf> {
    let start = if start.is_file() {
        start.parent().unwrap_or(start)
    } else {
        start
    };

    for dir in start.ancestors() {
        if ROOT_MARKERS.iter().all(|marker| dir.join(marker).is_dir()) {
            return Ok(dir.to_path_buf());
        }
    }

    Err(RegressError::not_found(format!(
        "project root above {} (looking for {})",
        start.display(),
        ROOT_MARKERS.join(", ")
    )))
}

/// Make `path` absolute against the current directory without touching the filesystem.
///
/// # Errors
///
/// Returns an error if the current directory cannot be determined.
pub fn absolute(path: &Path) -> RegressResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

const SEPARATORS: &[char] = &['/', '\\'];

/// Join path components with forward slashes, independent of platform.
#[must_use]
pub fn to_path<S: AsRef<str>>(parts: &[S]) -> PathBuf {
    let joined = parts
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(i, p)| {
            if i == 0 {
                p.trim_end_matches(SEPARATORS).to_string()
            } else {
                p.trim_matches(SEPARATORS).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    PathBuf::from(joined)
}

/// Parsed INI content: section -> key -> value
pub type IniSections = BTreeMap<String, BTreeMap<String, String>>;

/// Parse INI text. Section and key names are lower-cased; `#` and `;` start comments.
#[must_use]
pub fn parse_ini(text: &str) -> IniSections {
    let mut sections = IniSections::new();
    let mut current = String::from("default");

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = name.trim().to_lowercase();
            sections.entry(current.clone()).or_default();
            continue;
        }
        if let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    sections
}

/// Paths to the external tools the harness shells out to.
///
/// Only `git` is executed. `cmake` is informational: it is shown by the
/// `config` command, while active modules are read straight from
/// `CMakeCache.txt` without running the build driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// Version-control executable
    pub git: PathBuf,
    /// Build-system driver executable, for display only
    pub cmake: PathBuf,
    /// Config files that were actually read, in merge order
    pub sources: Vec<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            git: PathBuf::from(default_executable("git")),
            cmake: PathBuf::from(default_executable("cmake")),
            sources: Vec::new(),
        }
    }
}

impl ToolConfig {
    /// Load and merge config files in order. Files that do not exist are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RegressError::NotFound`] if an existing file cannot be read
    /// as text.
    pub fn load(files: &[PathBuf]) -> RegressResult<Self> {
        let mut merged = IniSections::new();
        let mut sources = Vec::new();

        for file in files {
            if !file.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(file).map_err(|e| {
                RegressError::not_found(format!("readable config file {} ({e})", file.display()))
            })?;
            for (section, values) in parse_ini(&text) {
                merged.entry(section).or_default().extend(values);
            }
            sources.push(file.clone());
        }

        let mut config = Self::from_sections(&merged);
        config.sources = sources;
        Ok(config)
    }

    /// Load the project config plus an optional override that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`RegressError::NotFound`] when the override file is missing.
    pub fn for_project(root: &Path, override_file: Option<&Path>) -> RegressResult<Self> {
        let mut files = vec![root.join(CONFIG_FILE_NAME)];
        if let Some(file) = override_file {
            if !file.is_file() {
                return Err(RegressError::not_found(format!(
                    "config file {}",
                    file.display()
                )));
            }
            files.push(file.to_path_buf());
        }
        Self::load(&files)
    }

    fn from_sections(sections: &IniSections) -> Self {
        let tools = sections.get("tools");
        let lookup = |key: &str| tools.and_then(|t| t.get(key)).filter(|v| !v.is_empty());

        Self {
            git: lookup("git")
                .map_or_else(|| PathBuf::from(default_executable("git")), PathBuf::from),
            cmake: lookup("cmake")
                .map_or_else(|| PathBuf::from(default_executable("cmake")), PathBuf::from),
            sources: Vec::new(),
        }
    }
}

/// Bare command name on POSIX, `.exe` suffixed elsewhere
#[must_use]
pub fn default_executable(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Read the active module list from a build directory's `CMakeCache.txt`.
///
/// Every `IVW_MODULE_<NAME>:BOOL=ON` entry activates module `<name>` (lower-cased).
///
/// # Errors
///
/// Returns [`RegressError::NotFound`] if the cache file is missing.
pub fn active_modules_from_cmake_cache(build_dir: &Path) -> RegressResult<Vec<String>> {
    let cache = build_dir.join("CMakeCache.txt");
    if !cache.is_file() {
        return Err(RegressError::not_found(format!("{}", cache.display())));
    }
    let text = std::fs::read_to_string(&cache)?;
    Ok(parse_cmake_cache_modules(&text))
}

fn parse_cmake_cache_modules(text: &str) -> Vec<String> {
    let mut modules: Vec<String> = text
        .lines()
        .filter_map(|line| {
            let (lhs, value) = line.trim().split_once('=')?;
            let (name, kind) = lhs.split_once(':')?;
            let module = name.strip_prefix("IVW_MODULE_")?;
            (kind == "BOOL" && value.eq_ignore_ascii_case("ON")).then(|| module.to_lowercase())
        })
        .collect();
    modules.sort();
    modules.dedup();
    modules
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_root(dir: &Path) {
        for marker in ROOT_MARKERS {
            std::fs::create_dir_all(dir.join(marker)).unwrap();
        }
    }

    #[test]
    fn test_find_root_from_nested_dir() {
        let tmp = TempDir::new().unwrap();
        make_root(tmp.path());
        let nested = tmp.path().join("tools/ivwpy/regression");
        std::fs::create_dir_all(&nested).unwrap();

        let root = find_project_root(&nested).unwrap();
        assert_eq!(root, tmp.path());
    }

    #[test]
    fn test_find_root_from_file() {
        let tmp = TempDir::new().unwrap();
        make_root(tmp.path());
        let file = tmp.path().join("tools/templates/run.txt");
        std::fs::write(&file, "x").unwrap();

        assert_eq!(find_project_root(&file).unwrap(), tmp.path());
    }

    #[test]
    fn test_find_root_missing_marker() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("modules/base")).unwrap();
        let err = find_project_root(tmp.path()).unwrap_err();
        assert!(matches!(err, RegressError::NotFound { .. }));
    }

    #[test]
    fn test_to_path_forward_slashes() {
        assert_eq!(to_path(&["a", "b", "c.png"]), PathBuf::from("a/b/c.png"));
        assert_eq!(to_path(&["/root/", "/x/", "y"]), PathBuf::from("/root/x/y"));
        assert_eq!(to_path(&["a", "", "b"]), PathBuf::from("a/b"));
    }

    #[test]
    fn test_parse_ini_sections() {
        let ini = parse_ini("# comment\n[Tools]\ngit = /usr/bin/git\n; other\ncmake: cm\n");
        assert_eq!(ini["tools"]["git"], "/usr/bin/git");
        assert_eq!(ini["tools"]["cmake"], "cm");
    }

    #[test]
    fn test_tool_config_defaults() {
        let config = ToolConfig::load(&[]).unwrap();
        assert_eq!(config.git, PathBuf::from(default_executable("git")));
        assert_eq!(config.cmake, PathBuf::from(default_executable("cmake")));
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_tool_config_merge_order() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("base.ini");
        let over = tmp.path().join("over.ini");
        std::fs::write(&base, "[tools]\ngit = /base/git\ncmake = /base/cmake\n").unwrap();
        std::fs::write(&over, "[tools]\ngit = /over/git\n").unwrap();

        let config = ToolConfig::load(&[base.clone(), tmp.path().join("nope.ini"), over.clone()])
            .unwrap();
        assert_eq!(config.git, PathBuf::from("/over/git"));
        assert_eq!(config.cmake, PathBuf::from("/base/cmake"));
        assert_eq!(config.sources, vec![base, over]);
    }

    #[test]
    fn test_unreadable_config_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let bad = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&bad, [0xff, 0xfe, b'\n']).unwrap();

        let err = ToolConfig::for_project(tmp.path(), None).unwrap_err();
        assert!(matches!(err, RegressError::NotFound { .. }));
        assert!(err.to_string().contains(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_for_project_missing_override() {
        let tmp = TempDir::new().unwrap();
        let err = ToolConfig::for_project(tmp.path(), Some(&tmp.path().join("missing.ini")))
            .unwrap_err();
        assert!(matches!(err, RegressError::NotFound { .. }));
    }

    #[test]
    fn test_cmake_cache_modules() {
        let text = "IVW_MODULE_BASE:BOOL=ON\nIVW_MODULE_OPENGL:BOOL=ON\nIVW_MODULE_PYTHON3:BOOL=OFF\n\
                    CMAKE_BUILD_TYPE:STRING=Release\n";
        assert_eq!(parse_cmake_cache_modules(text), vec!["base", "opengl"]);
    }
}
