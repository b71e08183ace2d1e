use std::path::Path;

use quotewatch_agent::HttpLlmClient;
use quotewatch_core::config::AppConfig;
use quotewatch_db::connect;
use quotewatch_notify::dispatcher_from_config;
use serde::Serialize;

use crate::commands::load_config;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Readiness report; exit code 1 when any check fails.
pub fn run(config_path: Option<&Path>, json_output: bool) -> (u8, String) {
    let report = build_report(config_path);
    let exit_code = u8::from(report.overall_status != CheckStatus::Pass);

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        });
        return (exit_code, output);
    }

    (exit_code, render_human(&report))
}

fn build_report(config_path: Option<&Path>) -> DoctorReport {
    let checks = match load_config(config_path) {
        Ok(config) => vec![
            DoctorCheck::pass("config_validation", "configuration loaded and validated"),
            check_business_window(&config),
            check_llm_client(&config),
            check_notify_dispatcher(&config),
            check_database_connectivity(&config),
        ],
        Err(error) => vec![
            DoctorCheck::fail("config_validation", error.to_string()),
            DoctorCheck::skipped("business_window"),
            DoctorCheck::skipped("llm_client"),
            DoctorCheck::skipped("notify_dispatcher"),
            DoctorCheck::skipped("database_connectivity"),
        ],
    };

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_business_window(config: &AppConfig) -> DoctorCheck {
    let sla = &config.sla;
    match (sla.business_window(), sla.threshold_set()) {
        (Ok(_), Ok(thresholds)) => DoctorCheck::pass(
            "business_window",
            format!(
                "{} {:02}:00-{:02}:00 on {}, final threshold `{}`",
                sla.timezone,
                sla.start_hour,
                sla.end_hour,
                sla.working_days.join("/"),
                thresholds.final_threshold().label
            ),
        ),
        (Err(error), _) | (_, Err(error)) => DoctorCheck::fail("business_window", error.to_string()),
    }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match HttpLlmClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            "llm_client",
            format!("model `{}` via `{}`", config.llm.model, client.endpoint()),
        ),
        Err(error) => DoctorCheck::fail("llm_client", error.to_string()),
    }
}

fn check_notify_dispatcher(config: &AppConfig) -> DoctorCheck {
    match dispatcher_from_config(&config.notify) {
        Ok(_) => match &config.notify.gateway_url {
            Some(url) => DoctorCheck::pass("notify_dispatcher", format!("gateway `{url}`")),
            None => DoctorCheck::pass(
                "notify_dispatcher",
                "no gateway configured; notifications are logged only",
            ),
        },
        Err(error) => DoctorCheck::fail("notify_dispatcher", error.to_string()),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::fail("database_connectivity", error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
