use std::path::Path;

use chrono::{DateTime, Utc};
use quotewatch_core::calendar::{elapsed_business_hours, is_within_business_window};
use quotewatch_core::escalation::engine::parse_quote_timestamp;
use serde::Serialize;

use crate::commands::{config_failure, load_config, CommandResult};

#[derive(Debug, Serialize)]
struct HoursReport {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timezone: String,
    elapsed_business_hours: u64,
    start_within_window: bool,
    end_within_window: bool,
}

/// Counts business hours between two timestamps using the configured window.
pub fn run(config_path: Option<&Path>, start: &str, end: &str) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => return config_failure("hours", error),
    };
    let window = match config.sla.business_window() {
        Ok(window) => window,
        Err(error) => return config_failure("hours", error),
    };

    let Some(start) = parse_quote_timestamp(start, &window) else {
        return invalid_timestamp(start);
    };
    let Some(end) = parse_quote_timestamp(end, &window) else {
        return invalid_timestamp(end);
    };

    CommandResult::report(
        "hours",
        &HoursReport {
            start,
            end,
            timezone: config.sla.timezone.clone(),
            elapsed_business_hours: elapsed_business_hours(start, end, &window),
            start_within_window: is_within_business_window(start, &window),
            end_within_window: is_within_business_window(end, &window),
        },
    )
}

fn invalid_timestamp(raw: &str) -> CommandResult {
    CommandResult::failure(
        "hours",
        "invalid_timestamp",
        format!("`{raw}` is not an RFC 3339 or local `YYYY-MM-DDTHH:MM:SS` timestamp"),
        2,
    )
}
