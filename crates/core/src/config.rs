use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::MIN_CONFIDENCE_FLOOR;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    pub weather: WeatherConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub user_path: PathBuf,
    pub organization_path: PathBuf,
    pub min_confidence: f64,
    pub judge: JudgeKind,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub forecast_url: String,
    pub geocoding_url: String,
    pub forecast_days: u8,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub retrieval_k: usize,
    pub retrieval_timeout_ms: u64,
    pub recall_timeout_ms: u64,
    pub weather_timeout_ms: u64,
    pub deadline_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Nvidia,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Nvidia => "https://integrate.api.nvidia.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeKind {
    Heuristic,
    Llm,
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
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub user_memory_path: Option<PathBuf>,
    pub organization_memory_path: Option<PathBuf>,
    pub judge: Option<JudgeKind>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub weather_enabled: Option<bool>,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig {
                user_path: PathBuf::from("USER_MEMORY.md"),
                organization_path: PathBuf::from("COMPANY_MEMORY.md"),
                min_confidence: MIN_CONFIDENCE_FLOOR,
                judge: JudgeKind::Heuristic,
            },
            llm: LlmConfig {
                provider: LlmProvider::Nvidia,
                api_key: None,
                base_url: None,
                model: "meta/llama-3.1-70b-instruct".to_string(),
                timeout_secs: 30,
            },
            weather: WeatherConfig {
                enabled: true,
                forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
                geocoding_url: "https://geocoding-api.open-meteo.com/v1/search".to_string(),
                forecast_days: 1,
            },
            workflow: WorkflowConfig {
                retrieval_k: 5,
                retrieval_timeout_ms: 5_000,
                recall_timeout_ms: 2_000,
                weather_timeout_ms: 8_000,
                deadline_ms: 15_000,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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
            "nvidia" => Ok(Self::Nvidia),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|nvidia|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for JudgeKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "llm" => Ok(Self::Llm),
            other => Err(ConfigError::Validation(format!(
                "unsupported memory judge `{other}` (expected heuristic|llm)"
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

impl LlmConfig {
    pub fn resolved_base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or_else(|| self.provider.default_base_url())
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("siteguard.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(memory) = patch.memory {
            if let Some(user_path) = memory.user_path {
                self.memory.user_path = user_path;
            }
            if let Some(organization_path) = memory.organization_path {
                self.memory.organization_path = organization_path;
            }
            if let Some(min_confidence) = memory.min_confidence {
                self.memory.min_confidence = min_confidence;
            }
            if let Some(judge) = memory.judge {
                self.memory.judge = judge;
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
        }

        if let Some(weather) = patch.weather {
            if let Some(enabled) = weather.enabled {
                self.weather.enabled = enabled;
            }
            if let Some(forecast_url) = weather.forecast_url {
                self.weather.forecast_url = forecast_url;
            }
            if let Some(geocoding_url) = weather.geocoding_url {
                self.weather.geocoding_url = geocoding_url;
            }
            if let Some(forecast_days) = weather.forecast_days {
                self.weather.forecast_days = forecast_days;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(retrieval_k) = workflow.retrieval_k {
                self.workflow.retrieval_k = retrieval_k;
            }
            if let Some(value) = workflow.retrieval_timeout_ms {
                self.workflow.retrieval_timeout_ms = value;
            }
            if let Some(value) = workflow.recall_timeout_ms {
                self.workflow.recall_timeout_ms = value;
            }
            if let Some(value) = workflow.weather_timeout_ms {
                self.workflow.weather_timeout_ms = value;
            }
            if let Some(value) = workflow.deadline_ms {
                self.workflow.deadline_ms = value;
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
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SITEGUARD_MEMORY_USER_PATH") {
            self.memory.user_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("SITEGUARD_MEMORY_ORGANIZATION_PATH") {
            self.memory.organization_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("SITEGUARD_MEMORY_MIN_CONFIDENCE") {
            self.memory.min_confidence = parse_f64("SITEGUARD_MEMORY_MIN_CONFIDENCE", &value)?;
        }
        if let Some(value) = read_env("SITEGUARD_MEMORY_JUDGE") {
            self.memory.judge = value.parse()?;
        }

        if let Some(value) = read_env("SITEGUARD_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("SITEGUARD_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SITEGUARD_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("SITEGUARD_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SITEGUARD_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SITEGUARD_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SITEGUARD_WEATHER_ENABLED") {
            self.weather.enabled = parse_bool("SITEGUARD_WEATHER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SITEGUARD_WEATHER_FORECAST_URL") {
            self.weather.forecast_url = value;
        }
        if let Some(value) = read_env("SITEGUARD_WEATHER_GEOCODING_URL") {
            self.weather.geocoding_url = value;
        }
        if let Some(value) = read_env("SITEGUARD_WEATHER_FORECAST_DAYS") {
            self.weather.forecast_days = parse_u8("SITEGUARD_WEATHER_FORECAST_DAYS", &value)?;
        }

        if let Some(value) = read_env("SITEGUARD_WORKFLOW_RETRIEVAL_K") {
            self.workflow.retrieval_k = parse_usize("SITEGUARD_WORKFLOW_RETRIEVAL_K", &value)?;
        }
        if let Some(value) = read_env("SITEGUARD_WORKFLOW_DEADLINE_MS") {
            self.workflow.deadline_ms = parse_u64("SITEGUARD_WORKFLOW_DEADLINE_MS", &value)?;
        }
        if let Some(value) = read_env("SITEGUARD_WORKFLOW_RETRIEVAL_TIMEOUT_MS") {
            self.workflow.retrieval_timeout_ms =
                parse_u64("SITEGUARD_WORKFLOW_RETRIEVAL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("SITEGUARD_WORKFLOW_RECALL_TIMEOUT_MS") {
            self.workflow.recall_timeout_ms =
                parse_u64("SITEGUARD_WORKFLOW_RECALL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("SITEGUARD_WORKFLOW_WEATHER_TIMEOUT_MS") {
            self.workflow.weather_timeout_ms =
                parse_u64("SITEGUARD_WORKFLOW_WEATHER_TIMEOUT_MS", &value)?;
        }

        let log_level =
            read_env("SITEGUARD_LOGGING_LEVEL").or_else(|| read_env("SITEGUARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SITEGUARD_LOGGING_FORMAT").or_else(|| read_env("SITEGUARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(path) = overrides.user_memory_path {
            self.memory.user_path = path;
        }
        if let Some(path) = overrides.organization_memory_path {
            self.memory.organization_path = path;
        }
        if let Some(judge) = overrides.judge {
            self.memory.judge = judge;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(enabled) = overrides.weather_enabled {
            self.weather.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_memory(&self.memory)?;
        if self.memory.judge == JudgeKind::Llm {
            validate_llm(&self.llm)?;
        }
        validate_weather(&self.weather)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("siteguard.toml"), PathBuf::from("config/siteguard.toml")]
        .into_iter()
        .find(|path| path.exists())
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

fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
    if !memory.min_confidence.is_finite()
        || memory.min_confidence < MIN_CONFIDENCE_FLOOR
        || memory.min_confidence > 1.0
    {
        return Err(ConfigError::Validation(format!(
            "memory.min_confidence must be in range {MIN_CONFIDENCE_FLOOR}..=1.0"
        )));
    }

    if memory.user_path.as_os_str().is_empty() || memory.organization_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "memory.user_path and memory.organization_path must not be empty".to_string(),
        ));
    }

    if memory.user_path == memory.organization_path {
        return Err(ConfigError::Validation(
            "memory.user_path and memory.organization_path must point to different files"
                .to_string(),
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

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Nvidia => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/nvidia providers (set SITEGUARD_LLM_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    if !is_http_url(llm.resolved_base_url()) {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_weather(weather: &WeatherConfig) -> Result<(), ConfigError> {
    if !weather.enabled {
        return Ok(());
    }

    if !is_http_url(&weather.forecast_url) || !is_http_url(&weather.geocoding_url) {
        return Err(ConfigError::Validation(
            "weather.forecast_url and weather.geocoding_url must start with http:// or https://"
                .to_string(),
        ));
    }

    if weather.forecast_days == 0 || weather.forecast_days > 16 {
        return Err(ConfigError::Validation(
            "weather.forecast_days must be in range 1..=16".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.retrieval_k == 0 {
        return Err(ConfigError::Validation(
            "workflow.retrieval_k must be greater than zero".to_string(),
        ));
    }

    let branch_timeouts =
        [workflow.retrieval_timeout_ms, workflow.recall_timeout_ms, workflow.weather_timeout_ms];
    if workflow.deadline_ms == 0 || branch_timeouts.contains(&0) {
        return Err(ConfigError::Validation(
            "workflow timeouts and deadline must be greater than zero".to_string(),
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.parse::<u8>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    memory: Option<MemoryPatch>,
    llm: Option<LlmPatch>,
    weather: Option<WeatherPatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    user_path: Option<PathBuf>,
    organization_path: Option<PathBuf>,
    min_confidence: Option<f64>,
    judge: Option<JudgeKind>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WeatherPatch {
    enabled: Option<bool>,
    forecast_url: Option<String>,
    geocoding_url: Option<String>,
    forecast_days: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    retrieval_k: Option<usize>,
    retrieval_timeout_ms: Option<u64>,
    recall_timeout_ms: Option<u64>,
    weather_timeout_ms: Option<u64>,
    deadline_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
