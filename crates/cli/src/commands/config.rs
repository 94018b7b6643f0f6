use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ratify_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "RATIFY_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "RATIFY_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "RATIFY_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "grading.enabled",
        &config.grading.enabled.to_string(),
        source("grading.enabled", "RATIFY_GRADING_ENABLED"),
    ));
    let grading_dsn = if config.grading.dsn.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "grading.dsn",
        grading_dsn,
        source("grading.dsn", "RATIFY_GRADING_DSN"),
    ));
    lines.push(render_line(
        "grading.timeout_secs",
        &config.grading.timeout_secs.to_string(),
        source("grading.timeout_secs", "RATIFY_GRADING_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "engine.worker_id",
        &config.engine.worker_id,
        source("engine.worker_id", "RATIFY_ENGINE_WORKER_ID"),
    ));
    lines.push(render_line(
        "engine.claim_timeout_secs",
        &config.engine.claim_timeout_secs.to_string(),
        source("engine.claim_timeout_secs", "RATIFY_ENGINE_CLAIM_TIMEOUT_SECS"),
    ));
    lines.push(render_line(
        "engine.task_max_retries",
        &config.engine.task_max_retries.to_string(),
        source("engine.task_max_retries", "RATIFY_ENGINE_TASK_MAX_RETRIES"),
    ));
    lines.push(render_line(
        "engine.retry_base_delay_secs",
        &config.engine.retry_base_delay_secs.to_string(),
        source("engine.retry_base_delay_secs", "RATIFY_ENGINE_RETRY_BASE_DELAY_SECS"),
    ));
    lines.push(render_line(
        "engine.sweep_max_age_days",
        &config.engine.sweep_max_age_days.to_string(),
        source("engine.sweep_max_age_days", "RATIFY_ENGINE_SWEEP_MAX_AGE_DAYS"),
    ));

    let logging_level_env = if env::var_os("RATIFY_LOGGING_LEVEL").is_some() {
        "RATIFY_LOGGING_LEVEL"
    } else {
        "RATIFY_LOG_LEVEL"
    };
    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", logging_level_env),
    ));
    let logging_format_env = if env::var_os("RATIFY_LOGGING_FORMAT").is_some() {
        "RATIFY_LOGGING_FORMAT"
    } else {
        "RATIFY_LOG_FORMAT"
    };
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format).to_lowercase(),
        source("logging.format", logging_format_env),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("ratify.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/ratify.toml");
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
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
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
