use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::BusinessWindow;
use crate::domain::conversation::AgentContact;
use crate::escalation::state::{Threshold, ThresholdSet};
use crate::templates::{is_alert_template, MessageTemplates, ALERT_12H, ALERT_6H, ALERT_FINAL};
use crate::vocabulary::Vocabulary;

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["quotewatch.toml", "config/quotewatch.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub notify: NotifyConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub sla: SlaConfig,
    pub vocabulary: Vocabulary,
    pub agents: Vec<AgentContact>,
    pub templates: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Outbound gateway. Without `gateway_url`, notifications are only logged.
#[derive(Clone, Debug)]
pub struct NotifyConfig {
    pub gateway_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub label: String,
    pub hours: u64,
    pub template: String,
}

#[derive(Clone, Debug)]
pub struct SlaConfig {
    pub timezone: String,
    pub working_days: Vec<String>,
    pub start_hour: u32,
    pub end_hour: u32,
    pub grace_minutes: u64,
    pub classifier_timeout_secs: u64,
    pub dispatch_timeout_secs: u64,
    pub manager_targets: Vec<String>,
    pub thresholds: Vec<ThresholdConfig>,
}

impl SlaConfig {
    pub fn business_window(&self) -> Result<BusinessWindow, ConfigError> {
        BusinessWindow::parse(&self.timezone, &self.working_days, self.start_hour, self.end_hour)
            .map_err(|error| ConfigError::Validation(format!("sla: {error}")))
    }

    pub fn threshold_set(&self) -> Result<ThresholdSet, ConfigError> {
        if let Some(threshold) =
            self.thresholds.iter().find(|threshold| !is_alert_template(&threshold.template))
        {
            return Err(ConfigError::Validation(format!(
                "sla.thresholds: threshold `{}` uses unknown template `{}`",
                threshold.label, threshold.template
            )));
        }
        ThresholdSet::new(
            self.thresholds
                .iter()
                .map(|threshold| {
                    Threshold::new(&threshold.label, threshold.hours, &threshold.template)
                })
                .collect(),
        )
        .map_err(|error| ConfigError::Validation(format!("sla.thresholds: {error}")))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_minutes.saturating_mul(60))
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub notify_gateway_url: Option<String>,
    pub server_port: Option<u16>,
    pub sla_timezone: Option<String>,
    pub sla_manager_targets: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

fn default_thresholds() -> Vec<ThresholdConfig> {
    [("6h", 6, ALERT_6H), ("12h", 12, ALERT_12H), ("18h", 18, ALERT_FINAL)]
        .into_iter()
        .map(|(label, hours, template)| ThresholdConfig {
            label: label.to_string(),
            hours,
            template: template.to_string(),
        })
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://quotewatch.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            notify: NotifyConfig {
                gateway_url: None,
                api_key: None,
                timeout_secs: 10,
                max_retries: 3,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                sweep_interval_secs: 300,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            sla: SlaConfig {
                timezone: "America/Sao_Paulo".to_string(),
                working_days: ["mon", "tue", "wed", "thu", "fri"].map(str::to_string).to_vec(),
                start_hour: 8,
                end_hour: 18,
                grace_minutes: 10,
                classifier_timeout_secs: 15,
                dispatch_timeout_secs: 15,
                manager_targets: Vec::new(),
                thresholds: default_thresholds(),
            },
            vocabulary: Vocabulary::default(),
            agents: Vec::new(),
            templates: BTreeMap::new(),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.vocabulary = config.vocabulary.normalized();
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(notify) = patch.notify {
            if let Some(gateway_url) = notify.gateway_url {
                self.notify.gateway_url = Some(gateway_url);
            }
            if let Some(notify_api_key_value) = notify.api_key {
                self.notify.api_key = Some(secret_value(notify_api_key_value));
            }
            if let Some(timeout_secs) = notify.timeout_secs {
                self.notify.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = notify.max_retries {
                self.notify.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(sweep_interval_secs) = server.sweep_interval_secs {
                self.server.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(sla) = patch.sla {
            if let Some(timezone) = sla.timezone {
                self.sla.timezone = timezone;
            }
            if let Some(working_days) = sla.working_days {
                self.sla.working_days = working_days;
            }
            if let Some(start_hour) = sla.start_hour {
                self.sla.start_hour = start_hour;
            }
            if let Some(end_hour) = sla.end_hour {
                self.sla.end_hour = end_hour;
            }
            if let Some(grace_minutes) = sla.grace_minutes {
                self.sla.grace_minutes = grace_minutes;
            }
            if let Some(classifier_timeout_secs) = sla.classifier_timeout_secs {
                self.sla.classifier_timeout_secs = classifier_timeout_secs;
            }
            if let Some(dispatch_timeout_secs) = sla.dispatch_timeout_secs {
                self.sla.dispatch_timeout_secs = dispatch_timeout_secs;
            }
            if let Some(manager_targets) = sla.manager_targets {
                self.sla.manager_targets = manager_targets;
            }
            if let Some(thresholds) = sla.thresholds {
                self.sla.thresholds = thresholds;
            }
        }

        if let Some(vocabulary) = patch.vocabulary {
            self.vocabulary = vocabulary;
        }
        if let Some(agents) = patch.agents {
            self.agents = agents;
        }
        if let Some(templates) = patch.templates {
            self.templates = templates;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("QUOTEWATCH_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("QUOTEWATCH_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("QUOTEWATCH_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("QUOTEWATCH_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("QUOTEWATCH_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("QUOTEWATCH_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("QUOTEWATCH_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("QUOTEWATCH_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("QUOTEWATCH_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("QUOTEWATCH_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("QUOTEWATCH_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("QUOTEWATCH_NOTIFY_GATEWAY_URL") {
            self.notify.gateway_url = Some(value);
        }
        if let Some(value) = read_env("QUOTEWATCH_NOTIFY_API_KEY") {
            self.notify.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("QUOTEWATCH_NOTIFY_TIMEOUT_SECS") {
            self.notify.timeout_secs = parse_u64("QUOTEWATCH_NOTIFY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_NOTIFY_MAX_RETRIES") {
            self.notify.max_retries = parse_u32("QUOTEWATCH_NOTIFY_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("QUOTEWATCH_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("QUOTEWATCH_SERVER_PORT") {
            self.server.port = parse_u16("QUOTEWATCH_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("QUOTEWATCH_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_SERVER_SWEEP_INTERVAL_SECS") {
            self.server.sweep_interval_secs =
                parse_u64("QUOTEWATCH_SERVER_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("QUOTEWATCH_SLA_TIMEZONE") {
            self.sla.timezone = value;
        }
        if let Some(value) = read_env("QUOTEWATCH_SLA_WORKING_DAYS") {
            self.sla.working_days = parse_list(&value);
        }
        if let Some(value) = read_env("QUOTEWATCH_SLA_START_HOUR") {
            self.sla.start_hour = parse_u32("QUOTEWATCH_SLA_START_HOUR", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_SLA_END_HOUR") {
            self.sla.end_hour = parse_u32("QUOTEWATCH_SLA_END_HOUR", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_SLA_GRACE_MINUTES") {
            self.sla.grace_minutes = parse_u64("QUOTEWATCH_SLA_GRACE_MINUTES", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_SLA_CLASSIFIER_TIMEOUT_SECS") {
            self.sla.classifier_timeout_secs =
                parse_u64("QUOTEWATCH_SLA_CLASSIFIER_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_SLA_DISPATCH_TIMEOUT_SECS") {
            self.sla.dispatch_timeout_secs =
                parse_u64("QUOTEWATCH_SLA_DISPATCH_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("QUOTEWATCH_SLA_MANAGER_TARGETS") {
            self.sla.manager_targets = parse_list(&value);
        }

        let log_level =
            read_env("QUOTEWATCH_LOGGING_LEVEL").or_else(|| read_env("QUOTEWATCH_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("QUOTEWATCH_LOGGING_FORMAT").or_else(|| read_env("QUOTEWATCH_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(gateway_url) = overrides.notify_gateway_url {
            self.notify.gateway_url = Some(gateway_url);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(timezone) = overrides.sla_timezone {
            self.sla.timezone = timezone;
        }
        if let Some(manager_targets) = overrides.sla_manager_targets {
            self.sla.manager_targets = manager_targets;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_notify(&self.notify)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_sla(&self.sla)?;
        validate_vocabulary(&self.vocabulary)?;
        validate_agents(&self.agents)?;
        MessageTemplates::new(&self.templates)
            .map_err(|error| ConfigError::Validation(format!("templates: {error}")))?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_notify(notify: &NotifyConfig) -> Result<(), ConfigError> {
    if let Some(url) = &notify.gateway_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notify.gateway_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if notify.timeout_secs == 0 || notify.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "notify.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if notify.max_retries > 10 {
        return Err(ConfigError::Validation("notify.max_retries must be at most 10".to_string()));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.sweep_interval_secs < 10 {
        return Err(ConfigError::Validation(
            "server.sweep_interval_secs must be at least 10".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

/// One day; longer grace periods would outlive any business window.
const MAX_GRACE_MINUTES: u64 = 24 * 60;

fn validate_sla(sla: &SlaConfig) -> Result<(), ConfigError> {
    sla.business_window()?;
    sla.threshold_set()?;

    if sla.grace_minutes == 0 || sla.grace_minutes > MAX_GRACE_MINUTES {
        return Err(ConfigError::Validation(format!(
            "sla.grace_minutes must be between 1 and {MAX_GRACE_MINUTES}"
        )));
    }
    if sla.classifier_timeout_secs == 0 || sla.dispatch_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "sla.classifier_timeout_secs and sla.dispatch_timeout_secs must be greater than zero"
                .to_string(),
        ));
    }

    let targets: Vec<_> =
        sla.manager_targets.iter().filter(|target| !target.trim().is_empty()).collect();
    if targets.is_empty() {
        return Err(ConfigError::Validation(
            "sla.manager_targets needs at least one phone number or group id \
             (set QUOTEWATCH_SLA_MANAGER_TARGETS or [sla] manager_targets)"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_vocabulary(vocabulary: &Vocabulary) -> Result<(), ConfigError> {
    let empty = vocabulary.empty_lists();
    if !empty.is_empty() {
        return Err(ConfigError::Validation(format!(
            "vocabulary lists must not be empty: {}",
            empty.join(", ")
        )));
    }
    Ok(())
}

fn validate_agents(agents: &[AgentContact]) -> Result<(), ConfigError> {
    let mut names = BTreeSet::new();
    for agent in agents {
        let name = agent.name.trim().to_lowercase();
        if name.is_empty() || agent.contact.trim().is_empty() {
            return Err(ConfigError::Validation(
                "every [[agents]] entry needs a non-empty name and contact".to_string(),
            ));
        }
        if !names.insert(name) {
            return Err(ConfigError::Validation(format!(
                "agent `{}` is listed more than once",
                agent.name
            )));
        }
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    notify: Option<NotifyPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    sla: Option<SlaPatch>,
    vocabulary: Option<Vocabulary>,
    agents: Option<Vec<AgentContact>>,
    templates: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct NotifyPatch {
    gateway_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct SlaPatch {
    timezone: Option<String>,
    working_days: Option<Vec<String>>,
    start_hour: Option<u32>,
    end_hour: Option<u32>,
    grace_minutes: Option<u64>,
    classifier_timeout_secs: Option<u64>,
    dispatch_timeout_secs: Option<u64>,
    manager_targets: Option<Vec<String>>,
    thresholds: Option<Vec<ThresholdConfig>>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn write_config(dir: &TempDir, body: &str) -> Result<std::path::PathBuf, String> {
        let path = dir.path().join("quotewatch.toml");
        fs::write(&path, body).map_err(|err| err.to_string())?;
        Ok(path)
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_NOTIFY_KEY", "gw-from-env");
        env::set_var("TEST_MANAGER_GROUP", "120363000000@g.us");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[notify]
gateway_url = "https://gateway.example.com/send"
api_key = "${TEST_NOTIFY_KEY}"

[sla]
manager_targets = ["${TEST_MANAGER_GROUP}"]
"#,
            )?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.notify.api_key.as_ref().map(|key| key.expose_secret() == "gw-from-env")
                    == Some(true),
                "gateway key should be loaded from environment",
            )?;
            ensure(
                config.sla.manager_targets == vec!["120363000000@g.us".to_string()],
                "manager target should be interpolated",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_NOTIFY_KEY", "TEST_MANAGER_GROUP"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("QUOTEWATCH_SLA_MANAGER_TARGETS", "5511900000000");
        env::set_var("QUOTEWATCH_LOG_LEVEL", "warn");
        env::set_var("QUOTEWATCH_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "QUOTEWATCH_SLA_MANAGER_TARGETS",
            "QUOTEWATCH_LOG_LEVEL",
            "QUOTEWATCH_LOG_FORMAT",
        ]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("QUOTEWATCH_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("QUOTEWATCH_SLA_START_HOUR", "9");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[database]
url = "sqlite://from-file.db"

[logging]
level = "warn"

[sla]
start_hour = 7
end_hour = 19
manager_targets = ["file-group"]
"#,
            )?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    sla_manager_targets: Some(vec!["override-group".to_string()]),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.sla.start_hour == 9, "env start hour should win over file")?;
            ensure(config.sla.end_hour == 19, "file end hour should win over default")?;
            ensure(
                config.sla.manager_targets == vec!["override-group".to_string()],
                "override manager targets should win",
            )?;
            Ok(())
        })();

        clear_vars(&["QUOTEWATCH_DATABASE_URL", "QUOTEWATCH_SLA_START_HOUR"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["QUOTEWATCH_SLA_MANAGER_TARGETS"]);

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => {
                return Err("expected validation failure but config load succeeded".to_string())
            }
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("sla.manager_targets")
        );
        ensure(has_message, "validation failure should mention sla.manager_targets")
    }

    #[test]
    fn invalid_business_window_and_thresholds_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let reversed_hours = write_config(
            &dir,
            r#"
[sla]
start_hour = 18
end_hour = 8
manager_targets = ["group"]
"#,
        )?;
        let error = AppConfig::load(LoadOptions {
            config_path: Some(reversed_hours),
            ..LoadOptions::default()
        });
        ensure(
            matches!(error, Err(ConfigError::Validation(ref message)) if message.starts_with("sla:")),
            "reversed hours should fail sla validation",
        )?;

        let unordered = write_config(
            &dir,
            r#"
[sla]
manager_targets = ["group"]
thresholds = [
  { label = "12h", hours = 12, template = "alert_12h" },
  { label = "6h", hours = 6, template = "alert_6h" },
]
"#,
        )?;
        let error =
            AppConfig::load(LoadOptions { config_path: Some(unordered), ..LoadOptions::default() });
        ensure(
            matches!(error, Err(ConfigError::Validation(ref message)) if message.contains("sla.thresholds")),
            "decreasing thresholds should be rejected",
        )?;

        let unknown_template = write_config(
            &dir,
            r#"
[sla]
manager_targets = ["group"]
thresholds = [
  { label = "6h", hours = 6, template = "alert_6h" },
  { label = "18h", hours = 18, template = "alerta_final" },
]
"#,
        )?;
        let error = AppConfig::load(LoadOptions {
            config_path: Some(unknown_template),
            ..LoadOptions::default()
        });
        ensure(
            matches!(error, Err(ConfigError::Validation(ref message)) if message.contains("alerta_final")),
            "a threshold naming an unknown template should be rejected",
        )
    }

    #[test]
    fn grace_minutes_must_fit_within_a_day() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let huge = write_config(
            &dir,
            r#"
[sla]
manager_targets = ["group"]
grace_minutes = 9223372036854775807
"#,
        )?;
        let error = AppConfig::load(LoadOptions { config_path: Some(huge), ..LoadOptions::default() });
        ensure(
            matches!(error, Err(ConfigError::Validation(ref message)) if message.contains("sla.grace_minutes")),
            "an oversized grace period should be rejected",
        )?;

        let day = write_config(
            &dir,
            r#"
[sla]
manager_targets = ["group"]
grace_minutes = 1440
"#,
        )?;
        let config = AppConfig::load(LoadOptions { config_path: Some(day), ..LoadOptions::default() })
            .map_err(|err| err.to_string())?;
        ensure(
            config.sla.grace() == std::time::Duration::from_secs(86_400),
            "a one-day grace period converts to seconds",
        )
    }

    #[test]
    fn vocabulary_lists_are_replaced_per_list_and_normalized() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(
            &dir,
            r#"
[sla]
manager_targets = ["group"]

[vocabulary]
color = [" Verde ", "AZUL"]

[[agents]]
name = "Carla"
contact = "5511999990000"
"#,
        )?;
        let config = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(
            config.vocabulary.color == vec!["verde".to_string(), "azul".to_string()],
            "color list should be replaced and folded",
        )?;
        ensure(!config.vocabulary.fixture_type.is_empty(), "other lists keep their defaults")?;
        ensure(config.agents.len() == 1, "agents table should load")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("QUOTEWATCH_SLA_MANAGER_TARGETS", "group-a, group-b");
        env::set_var("QUOTEWATCH_LLM_PROVIDER", "openai");
        env::set_var("QUOTEWATCH_LLM_API_KEY", "sk-secret-value");
        env::set_var("QUOTEWATCH_NOTIFY_API_KEY", "gw-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain llm key")?;
            ensure(
                !debug.contains("gw-secret-value"),
                "debug output should not contain gateway key",
            )?;
            ensure(
                config.sla.manager_targets.len() == 2,
                "comma separated manager targets should be split",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "QUOTEWATCH_SLA_MANAGER_TARGETS",
            "QUOTEWATCH_LLM_PROVIDER",
            "QUOTEWATCH_LLM_API_KEY",
            "QUOTEWATCH_NOTIFY_API_KEY",
        ]);
        result
    }
}
