use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use siteguard_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run(options: LoadOptions) -> String {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "memory.user_path",
        &config.memory.user_path.display().to_string(),
        source("memory.user_path", "SITEGUARD_MEMORY_USER_PATH"),
    ));
    lines.push(render_line(
        "memory.organization_path",
        &config.memory.organization_path.display().to_string(),
        source("memory.organization_path", "SITEGUARD_MEMORY_ORGANIZATION_PATH"),
    ));
    lines.push(render_line(
        "memory.min_confidence",
        &config.memory.min_confidence.to_string(),
        source("memory.min_confidence", "SITEGUARD_MEMORY_MIN_CONFIDENCE"),
    ));
    lines.push(render_line(
        "memory.judge",
        &format!("{:?}", config.memory.judge),
        source("memory.judge", "SITEGUARD_MEMORY_JUDGE"),
    ));

    lines.push(render_line(
        "llm.provider",
        &format!("{:?}", config.llm.provider),
        source("llm.provider", "SITEGUARD_LLM_PROVIDER"),
    ));
    lines.push(render_line("llm.model", &config.llm.model, source("llm.model", "SITEGUARD_LLM_MODEL")));
    lines.push(render_line(
        "llm.base_url",
        config.llm.resolved_base_url(),
        source("llm.base_url", "SITEGUARD_LLM_BASE_URL"),
    ));
    let llm_api_key = match &config.llm.api_key {
        Some(key) => redact_key(key.expose_secret()),
        None => "<unset>".to_string(),
    };
    lines.push(render_line("llm.api_key", &llm_api_key, source("llm.api_key", "SITEGUARD_LLM_API_KEY")));
    lines.push(render_line(
        "llm.timeout_secs",
        &config.llm.timeout_secs.to_string(),
        source("llm.timeout_secs", "SITEGUARD_LLM_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "weather.enabled",
        &config.weather.enabled.to_string(),
        source("weather.enabled", "SITEGUARD_WEATHER_ENABLED"),
    ));
    lines.push(render_line(
        "weather.forecast_url",
        &config.weather.forecast_url,
        source("weather.forecast_url", "SITEGUARD_WEATHER_FORECAST_URL"),
    ));
    lines.push(render_line(
        "weather.geocoding_url",
        &config.weather.geocoding_url,
        source("weather.geocoding_url", "SITEGUARD_WEATHER_GEOCODING_URL"),
    ));
    lines.push(render_line(
        "weather.forecast_days",
        &config.weather.forecast_days.to_string(),
        source("weather.forecast_days", "SITEGUARD_WEATHER_FORECAST_DAYS"),
    ));

    lines.push(render_line(
        "workflow.retrieval_k",
        &config.workflow.retrieval_k.to_string(),
        source("workflow.retrieval_k", "SITEGUARD_WORKFLOW_RETRIEVAL_K"),
    ));
    for (key, env_key, value) in [
        (
            "workflow.retrieval_timeout_ms",
            "SITEGUARD_WORKFLOW_RETRIEVAL_TIMEOUT_MS",
            config.workflow.retrieval_timeout_ms,
        ),
        ("workflow.recall_timeout_ms", "SITEGUARD_WORKFLOW_RECALL_TIMEOUT_MS", config.workflow.recall_timeout_ms),
        ("workflow.weather_timeout_ms", "SITEGUARD_WORKFLOW_WEATHER_TIMEOUT_MS", config.workflow.weather_timeout_ms),
    ] {
        lines.push(render_line(key, &value.to_string(), source(key, env_key)));
    }
    lines.push(render_line(
        "workflow.deadline_ms",
        &config.workflow.deadline_ms.to_string(),
        source("workflow.deadline_ms", "SITEGUARD_WORKFLOW_DEADLINE_MS"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "SITEGUARD_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "SITEGUARD_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("siteguard.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/siteguard.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_key};

    #[test]
    fn keys_keep_only_their_prefix() {
        assert_eq!(redact_key("sk-abc123"), "sk-***");
        assert_eq!(redact_key("nvapi"), "<redacted>");
        assert_eq!(redact_key("  "), "<empty>");
    }

    #[test]
    fn dotted_paths_resolve_into_tables() {
        let doc: toml::Value = "[workflow]\ndeadline_ms = 100\n".parse().expect("toml");
        assert!(contains_path(&doc, "workflow.deadline_ms"));
        assert!(!contains_path(&doc, "workflow.retrieval_k"));
    }
}
