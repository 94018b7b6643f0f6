use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tasks::GradingTaskConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub grading: GradingConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// External grading source connection. When disabled the engine falls back
/// to the fixture-backed source, which is only suitable for local runs.
#[derive(Clone, Debug)]
pub struct GradingConfig {
    pub enabled: bool,
    pub dsn: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub worker_id: String,
    pub claim_timeout_secs: u32,
    pub task_max_retries: u32,
    pub retry_base_delay_secs: u32,
    pub sweep_max_age_days: u32,
}

impl EngineConfig {
    pub fn task_config(&self) -> GradingTaskConfig {
        GradingTaskConfig {
            claim_timeout_seconds: i64::from(self.claim_timeout_secs),
            default_max_retries: self.task_max_retries,
            retry_backoff_multiplier: 2,
            retry_base_delay_seconds: i64::from(self.retry_base_delay_secs),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub grading_dsn: Option<String>,
    pub worker_id: Option<String>,
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
            database: DatabaseConfig {
                url: "sqlite://ratify.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            grading: GradingConfig { enabled: false, dsn: None, timeout_secs: 30 },
            engine: EngineConfig {
                worker_id: "ratify-worker".to_string(),
                claim_timeout_secs: 300,
                task_max_retries: 10,
                retry_base_delay_secs: 2,
                sweep_max_age_days: 3,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("ratify.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
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

        if let Some(grading) = patch.grading {
            if let Some(enabled) = grading.enabled {
                self.grading.enabled = enabled;
            }
            if let Some(grading_dsn_value) = grading.dsn {
                self.grading.dsn = Some(secret_value(grading_dsn_value));
            }
            if let Some(timeout_secs) = grading.timeout_secs {
                self.grading.timeout_secs = timeout_secs;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(worker_id) = engine.worker_id {
                self.engine.worker_id = worker_id;
            }
            if let Some(claim_timeout_secs) = engine.claim_timeout_secs {
                self.engine.claim_timeout_secs = claim_timeout_secs;
            }
            if let Some(task_max_retries) = engine.task_max_retries {
                self.engine.task_max_retries = task_max_retries;
            }
            if let Some(retry_base_delay_secs) = engine.retry_base_delay_secs {
                self.engine.retry_base_delay_secs = retry_base_delay_secs;
            }
            if let Some(sweep_max_age_days) = engine.sweep_max_age_days {
                self.engine.sweep_max_age_days = sweep_max_age_days;
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
        if let Some(value) = read_env("RATIFY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RATIFY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("RATIFY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RATIFY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("RATIFY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RATIFY_GRADING_ENABLED") {
            self.grading.enabled = parse_bool("RATIFY_GRADING_ENABLED", &value)?;
        }
        if let Some(value) = read_env("RATIFY_GRADING_DSN") {
            self.grading.dsn = Some(secret_value(value));
        }
        if let Some(value) = read_env("RATIFY_GRADING_TIMEOUT_SECS") {
            self.grading.timeout_secs = parse_u64("RATIFY_GRADING_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RATIFY_ENGINE_WORKER_ID") {
            self.engine.worker_id = value;
        }
        if let Some(value) = read_env("RATIFY_ENGINE_CLAIM_TIMEOUT_SECS") {
            self.engine.claim_timeout_secs =
                parse_u32("RATIFY_ENGINE_CLAIM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RATIFY_ENGINE_TASK_MAX_RETRIES") {
            self.engine.task_max_retries = parse_u32("RATIFY_ENGINE_TASK_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("RATIFY_ENGINE_RETRY_BASE_DELAY_SECS") {
            self.engine.retry_base_delay_secs =
                parse_u32("RATIFY_ENGINE_RETRY_BASE_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("RATIFY_ENGINE_SWEEP_MAX_AGE_DAYS") {
            self.engine.sweep_max_age_days =
                parse_u32("RATIFY_ENGINE_SWEEP_MAX_AGE_DAYS", &value)?;
        }

        let log_level = read_env("RATIFY_LOGGING_LEVEL").or_else(|| read_env("RATIFY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RATIFY_LOGGING_FORMAT").or_else(|| read_env("RATIFY_LOG_FORMAT"));
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
        if let Some(grading_dsn) = overrides.grading_dsn {
            self.grading.dsn = Some(secret_value(grading_dsn));
        }
        if let Some(worker_id) = overrides.worker_id {
            self.engine.worker_id = worker_id;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_grading(&self.grading)?;
        validate_engine(&self.engine)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ratify.toml"), PathBuf::from("config/ratify.toml")]
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

fn validate_grading(grading: &GradingConfig) -> Result<(), ConfigError> {
    if grading.enabled {
        let missing = grading
            .dsn
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "grading.dsn is required when grading.enabled is true".to_string(),
            ));
        }
    }

    if grading.timeout_secs == 0 || grading.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "grading.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.worker_id.trim().is_empty() {
        return Err(ConfigError::Validation("engine.worker_id must not be empty".to_string()));
    }

    if engine.claim_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "engine.claim_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if engine.sweep_max_age_days == 0 {
        return Err(ConfigError::Validation(
            "engine.sweep_max_age_days must be greater than zero".to_string(),
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
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

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    grading: Option<GradingPatch>,
    engine: Option<EnginePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GradingPatch {
    enabled: Option<bool>,
    dsn: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    worker_id: Option<String>,
    claim_timeout_secs: Option<u32>,
    task_max_retries: Option<u32>,
    retry_base_delay_secs: Option<u32>,
    sweep_max_age_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("ratify.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn file_patch_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
url = "sqlite://approvals.db"
max_connections = 12

[engine]
worker_id = "worker-7"
sweep_max_age_days = 5

[logging]
level = "debug"
format = "json"
"#,
        );

        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .unwrap();

        assert_eq!(config.database.url, "sqlite://approvals.db");
        assert_eq!(config.database.max_connections, 12);
        assert_eq!(config.engine.worker_id, "worker-7");
        assert_eq!(config.engine.sweep_max_age_days, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn programmatic_overrides_win() {
        let config = AppConfig::load(LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/ratify.toml")),
            require_file: false,
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                log_level: Some("warn".to_string()),
                ..ConfigOverrides::default()
            },
        })
        .unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let err = AppConfig::load(LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/ratify.toml")),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .unwrap_err();

        assert!(matches!(err, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn grading_enabled_requires_dsn() {
        let mut config = AppConfig::default();
        config.grading.enabled = true;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn unterminated_interpolation_is_rejected() {
        let err = interpolate_env_vars("url = \"${RATIFY_UNFINISHED\"").unwrap_err();
        assert!(matches!(err, ConfigError::UnterminatedInterpolation));
    }

    #[test]
    fn non_sqlite_database_url_fails_validation() {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/ratify".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
