//! Command handlers - extracted from main.rs for testability
//!
//! Each handler module contains:
//! - The execution logic for a CLI command
//! - Pure helper functions
//! - Tests

pub mod config;
pub mod history;
pub mod list;
pub mod project;
pub mod report;
pub mod run;

// Re-export handlers for convenient access
pub use config::{execute_config, format_config};
pub use history::{execute_history, format_history};
pub use list::{execute_list, format_list, ListedTest};
pub use project::{active_modules, load_tools, module_roots, resolve_root, selected_tests};
pub use report::{execute_report, read_fragment};
pub use run::{execute_run, orchestrator_config};
