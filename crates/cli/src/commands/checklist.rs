use std::path::Path;

use quotewatch_core::checklist::ChecklistReport;
use serde::Serialize;

use crate::commands::{config_failure, load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ChecklistOutput {
    complete: bool,
    #[serde(flatten)]
    report: ChecklistReport,
}

/// Runs the closure and custom-order checklists over a draft without sending anything.
pub fn run(config_path: Option<&Path>, text: &str) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => return config_failure("checklist", error),
    };

    let report = ChecklistReport::evaluate(text, &config.vocabulary);
    CommandResult::report("checklist", &ChecklistOutput { complete: report.is_complete(), report })
}
