use std::env;
use std::fs;
use std::path::Path;

use quotewatch_core::config::{resolve_config_path, AppConfig};
use secrecy::ExposeSecret;
use secrecy::SecretString;
use toml::Value;

use crate::commands::{config_failure, load_config, CommandResult};

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => return config_failure("config", error),
    };

    let file_path = resolve_config_path(config_path);
    let file_doc = file_path
        .as_deref()
        .and_then(|path| fs::read_to_string(path).ok())
        .and_then(|raw| raw.parse::<Value>().ok());
    let file_label = file_path.as_deref().map(|path| path.display().to_string());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(&field, file_doc.as_ref(), file_label.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let sla = &config.sla;
    let thresholds = sla
        .thresholds
        .iter()
        .map(|threshold| format!("{}@{}h", threshold.label, threshold.hours))
        .collect::<Vec<_>>()
        .join(", ");
    let agents =
        config.agents.iter().map(|agent| agent.name.as_str()).collect::<Vec<_>>().join(", ");
    let templates = config.templates.keys().map(String::as_str).collect::<Vec<_>>().join(", ");

    vec![
        Field::new("database.url", &config.database.url, &["QUOTEWATCH_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["QUOTEWATCH_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["QUOTEWATCH_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new("llm.provider", format!("{:?}", config.llm.provider), &["QUOTEWATCH_LLM_PROVIDER"]),
        Field::new("llm.model", &config.llm.model, &["QUOTEWATCH_LLM_MODEL"]),
        Field::new(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            &["QUOTEWATCH_LLM_BASE_URL"],
        ),
        Field::new("llm.api_key", redact(config.llm.api_key.as_ref()), &["QUOTEWATCH_LLM_API_KEY"]),
        Field::new(
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            &["QUOTEWATCH_LLM_TIMEOUT_SECS"],
        ),
        Field::new(
            "llm.max_retries",
            config.llm.max_retries.to_string(),
            &["QUOTEWATCH_LLM_MAX_RETRIES"],
        ),
        Field::new(
            "notify.gateway_url",
            config.notify.gateway_url.as_deref().unwrap_or("<unset: log-only>"),
            &["QUOTEWATCH_NOTIFY_GATEWAY_URL"],
        ),
        Field::new(
            "notify.api_key",
            redact(config.notify.api_key.as_ref()),
            &["QUOTEWATCH_NOTIFY_API_KEY"],
        ),
        Field::new(
            "notify.timeout_secs",
            config.notify.timeout_secs.to_string(),
            &["QUOTEWATCH_NOTIFY_TIMEOUT_SECS"],
        ),
        Field::new(
            "notify.max_retries",
            config.notify.max_retries.to_string(),
            &["QUOTEWATCH_NOTIFY_MAX_RETRIES"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["QUOTEWATCH_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port.to_string(), &["QUOTEWATCH_SERVER_PORT"]),
        Field::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["QUOTEWATCH_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Field::new(
            "server.sweep_interval_secs",
            config.server.sweep_interval_secs.to_string(),
            &["QUOTEWATCH_SERVER_SWEEP_INTERVAL_SECS"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["QUOTEWATCH_LOGGING_LEVEL", "QUOTEWATCH_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["QUOTEWATCH_LOGGING_FORMAT", "QUOTEWATCH_LOG_FORMAT"],
        ),
        Field::new("sla.timezone", &sla.timezone, &["QUOTEWATCH_SLA_TIMEZONE"]),
        Field::new(
            "sla.working_days",
            sla.working_days.join(", "),
            &["QUOTEWATCH_SLA_WORKING_DAYS"],
        ),
        Field::new("sla.start_hour", sla.start_hour.to_string(), &["QUOTEWATCH_SLA_START_HOUR"]),
        Field::new("sla.end_hour", sla.end_hour.to_string(), &["QUOTEWATCH_SLA_END_HOUR"]),
        Field::new(
            "sla.grace_minutes",
            sla.grace_minutes.to_string(),
            &["QUOTEWATCH_SLA_GRACE_MINUTES"],
        ),
        Field::new(
            "sla.classifier_timeout_secs",
            sla.classifier_timeout_secs.to_string(),
            &["QUOTEWATCH_SLA_CLASSIFIER_TIMEOUT_SECS"],
        ),
        Field::new(
            "sla.dispatch_timeout_secs",
            sla.dispatch_timeout_secs.to_string(),
            &["QUOTEWATCH_SLA_DISPATCH_TIMEOUT_SECS"],
        ),
        Field::new(
            "sla.manager_targets",
            sla.manager_targets.join(", "),
            &["QUOTEWATCH_SLA_MANAGER_TARGETS"],
        ),
        Field::new("sla.thresholds", thresholds, &[]),
        Field::new("agents", if agents.is_empty() { "<none>".to_string() } else { agents }, &[]),
        Field::new(
            "templates",
            if templates.is_empty() { "<built-in>".to_string() } else { templates },
            &[],
        ),
    ]
}

fn field_source(field: &Field, file_doc: Option<&Value>, file_label: Option<&str>) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = file_doc {
        if contains_path(doc, field.key) {
            return format!("file ({})", file_label.unwrap_or("config file"));
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact(secret: Option<&SecretString>) -> String {
    match secret {
        None => "<unset>".to_string(),
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}
