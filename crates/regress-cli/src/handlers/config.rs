//! Config command handler

use super::project::{load_tools, resolve_root};
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::ConfigArgs;
use regress::ToolConfig;
use std::path::Path;

/// Execute the config command
pub fn execute_config(config: &CliConfig, args: &ConfigArgs) -> CliResult<()> {
    let root = resolve_root(args.root.as_deref())?;
    let tools = load_tools(root.as_deref(), args.config.as_deref())?;
    print!("{}", format_config(config, root.as_deref(), &tools));
    Ok(())
}

/// Render the resolved configuration, one `key: value` per line
#[must_use]
pub fn format_config(config: &CliConfig, root: Option<&Path>, tools: &ToolConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Project root: {}\n",
        root.map_or_else(|| "(none)".to_string(), |r| r.display().to_string())
    ));
    if tools.sources.is_empty() {
        out.push_str("Config files: (none)\n");
    } else {
        out.push_str("Config files:\n");
        for source in &tools.sources {
            out.push_str(&format!("  {}\n", source.display()));
        }
    }
    out.push_str(&format!("git: {}\n", tools.git.display()));
    out.push_str(&format!("cmake: {}\n", tools.cmake.display()));
    out.push_str(&format!("Verbosity: {:?}\n", config.verbosity));
    out.push_str(&format!("Color: {:?}\n", config.color));
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_defaults() {
        let text = format_config(&CliConfig::default(), None, &ToolConfig::default());
        assert!(text.contains("Project root: (none)"));
        assert!(text.contains("Config files: (none)"));
        assert!(text.contains("git: git"));
        assert!(text.contains("cmake: cmake"));
    }

    #[test]
    fn test_format_sources_and_root() {
        let tools = ToolConfig {
            git: PathBuf::from("/opt/git"),
            cmake: PathBuf::from("cmake"),
            sources: vec![PathBuf::from("/p/regress.ini")],
        };
        let text = format_config(&CliConfig::default(), Some(Path::new("/p")), &tools);
        assert!(text.contains("Project root: /p"));
        assert!(text.contains("  /p/regress.ini"));
        assert!(text.contains("git: /opt/git"));
    }
}
