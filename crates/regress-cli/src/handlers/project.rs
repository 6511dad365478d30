//! Project resolution shared by the commands: root, tool config, module
//! directories and the active module list

use crate::commands::SelectionArgs;
use crate::error::{CliError, CliResult};
use regress::{
    absolute, active_modules_from_cmake_cache, discover_tests, filter_tests, find_project_root,
    RegressError, Test, ToolConfig,
};
use std::path::{Path, PathBuf};

/// Name of the directory holding the modules below the project root
pub const MODULES_DIR: &str = "modules";

/// Locate the project root.
///
/// An explicit root must be inside a project. Without one the current
/// directory is searched and a miss is not an error.
pub fn resolve_root(explicit: Option<&Path>) -> CliResult<Option<PathBuf>> {
    if let Some(dir) = explicit {
        return Ok(Some(find_project_root(&absolute(dir)?)?));
    }
    let cwd = std::env::current_dir()?;
    match find_project_root(&cwd) {
        Ok(root) => Ok(Some(root)),
        Err(e) => {
            tracing::debug!(error = %e, "no project root above the current directory");
            Ok(None)
        }
    }
}

/// Tool paths from `<root>/regress.ini` and an optional override file
pub fn load_tools(root: Option<&Path>, override_file: Option<&Path>) -> CliResult<ToolConfig> {
    if let Some(root) = root {
        return Ok(ToolConfig::for_project(root, override_file)?);
    }
    match override_file {
        Some(file) if !file.is_file() => Err(RegressError::not_found(format!(
            "config file {}",
            file.display()
        ))
        .into()),
        Some(file) => Ok(ToolConfig::load(&[file.to_path_buf()])?),
        None => Ok(ToolConfig::default()),
    }
}

/// Directories to discover tests in: the explicit ones, else `<root>/modules`
pub fn module_roots(selection: &SelectionArgs, root: Option<&Path>) -> CliResult<Vec<PathBuf>> {
    if !selection.module_roots.is_empty() {
        return Ok(selection.module_roots.clone());
    }
    root.map(|root| vec![root.join(MODULES_DIR)]).ok_or_else(|| {
        CliError::config("no module directory: pass --modules or run inside the project")
    })
}

/// Active modules given explicitly or read from a build directory
pub fn active_modules(selection: &SelectionArgs) -> CliResult<Option<Vec<String>>> {
    if let Some(dir) = &selection.build_dir {
        let modules = active_modules_from_cmake_cache(dir)?;
        tracing::info!(count = modules.len(), "active modules from build directory");
        return Ok(Some(modules));
    }
    Ok(selection.active_modules.clone())
}

/// Predicate for the `--filter` substring
pub fn name_filter(selection: &SelectionArgs) -> impl Fn(&Test) -> bool + '_ {
    move |test| {
        selection
            .filter
            .as_deref()
            .map_or(true, |text| test.key().contains(text))
    }
}

/// Discover and select tests the way a run would
pub fn selected_tests(selection: &SelectionArgs) -> CliResult<Vec<Test>> {
    let root = resolve_root(selection.root.as_deref())?;
    let roots = module_roots(selection, root.as_deref())?
        .iter()
        .map(|dir| absolute(dir))
        .collect::<Result<Vec<_>, _>>()?;
    let active = active_modules(selection)?;
    Ok(filter_tests(
        discover_tests(&roots)?,
        selection.range.as_ref(),
        active.as_deref(),
        name_filter(selection),
    ))
}
