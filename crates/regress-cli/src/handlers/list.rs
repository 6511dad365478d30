//! List command handler

use super::project::selected_tests;
use crate::commands::ListFormat;
use crate::error::CliResult;
use crate::ListArgs;
use regress::Test;
use serde::Serialize;
use std::path::PathBuf;

/// One listed test
#[derive(Debug, Serialize)]
pub struct ListedTest {
    /// `module/test`
    pub key: String,
    /// Test directory
    pub path: PathBuf,
    /// Number of workspaces
    pub workspaces: usize,
    /// Reference images
    pub images: Vec<String>,
    /// Not disabled by its configuration
    pub enabled: bool,
}

impl From<&Test> for ListedTest {
    fn from(test: &Test) -> Self {
        Self {
            key: test.key(),
            path: test.path.clone(),
            workspaces: test.workspaces.len(),
            images: test.images.clone(),
            enabled: test.config.is_enabled(),
        }
    }
}

/// Execute the list command
pub fn execute_list(args: &ListArgs) -> CliResult<()> {
    let tests = selected_tests(&args.selection)?;
    println!("{}", format_list(&tests, args.format)?);
    Ok(())
}

/// Render the tests in `format`
pub fn format_list(tests: &[Test], format: ListFormat) -> CliResult<String> {
    match format {
        ListFormat::Json => {
            let listed: Vec<ListedTest> = tests.iter().map(ListedTest::from).collect();
            Ok(serde_json::to_string_pretty(&listed).map_err(regress::RegressError::from)?)
        }
        ListFormat::Text => Ok(tests
            .iter()
            .map(|test| {
                let mut line = test.key();
                if !test.config.is_enabled() {
                    line.push_str(" (disabled)");
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_case(name: &str, enabled: Option<bool>) -> Test {
        Test {
            name: name.to_string(),
            module: "base".to_string(),
            path: PathBuf::from("/m/base/tests/regression").join(name),
            module_path: PathBuf::from("/m/base"),
            workspaces: vec![PathBuf::from("/m/base/tests/regression").join(name).join("w.inv")],
            images: vec!["canvas.png".to_string()],
            config: regress::TestConfig {
                enabled,
                ..regress::TestConfig::default()
            },
        }
    }

    #[test]
    fn test_text_marks_disabled() {
        let tests = [test_case("a", None), test_case("b", Some(false))];
        let text = format_list(&tests, ListFormat::Text).unwrap();
        assert_eq!(text, "base/a\nbase/b (disabled)");
    }

    #[test]
    fn test_json_listing() {
        let tests = [test_case("a", None)];
        let json = format_list(&tests, ListFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["key"], "base/a");
        assert_eq!(value[0]["workspaces"], 1);
        assert_eq!(value[0]["images"][0], "canvas.png");
        assert_eq!(value[0]["enabled"], true);
    }
}
