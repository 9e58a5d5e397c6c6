use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::tenant::{TenantConfig, TenantCredentials};
use crate::orchestrator::FleetSettings;
use crate::pipeline::PipelineSettings;
use crate::progress::ProgressSettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub fleet: FleetConfig,
    pub tasks: TasksConfig,
    pub fetch: FetchConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct FleetConfig {
    pub data_directory: PathBuf,
    pub polling_interval_secs: u64,
    pub shards: usize,
    pub default_tenant: Option<DefaultTenantConfig>,
}

/// Tenant seeded into the desired-state store on every start.
#[derive(Clone, Debug)]
pub struct DefaultTenantConfig {
    pub tenant_id: String,
    pub bot_token: SecretString,
    pub app_id: Option<String>,
    pub app_hash: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct TasksConfig {
    pub fetch_attempts: u32,
    pub fetch_retry_delay_ms: u64,
    pub progress_soft_throttle_ms: u64,
    pub progress_hard_throttle_ms: u64,
    pub progress_done_threshold_bytes: u64,
}

#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
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
    pub data_directory: Option<PathBuf>,
    pub polling_interval_secs: Option<u64>,
    pub fetch_base_url: Option<String>,
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
                url: "sqlite://botfleet.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            fleet: FleetConfig {
                data_directory: PathBuf::from("data/sessions"),
                polling_interval_secs: 600,
                shards: 8,
                default_tenant: None,
            },
            tasks: TasksConfig {
                fetch_attempts: 3,
                fetch_retry_delay_ms: 5_000,
                progress_soft_throttle_ms: 3_000,
                progress_hard_throttle_ms: 10_000,
                progress_done_threshold_bytes: 10 * 1024 * 1024,
            },
            fetch: FetchConfig {
                base_url: "http://127.0.0.1:8080".to_string(),
                timeout_secs: 600,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8081,
                graceful_shutdown_secs: 15,
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

impl FleetConfig {
    pub fn settings(&self) -> FleetSettings {
        FleetSettings {
            polling_interval: Duration::from_secs(self.polling_interval_secs),
            shards: self.shards,
            default_tenant: self.default_tenant.as_ref().map(DefaultTenantConfig::tenant_config),
        }
    }
}

impl DefaultTenantConfig {
    fn empty(tenant_id: String) -> Self {
        Self { tenant_id, bot_token: String::new().into(), app_id: None, app_hash: None }
    }

    pub fn tenant_config(&self) -> TenantConfig {
        let credentials = TenantCredentials {
            bot_token: self.bot_token.clone(),
            app_id: self.app_id.clone(),
            app_hash: self.app_hash.clone(),
        };
        let mut config = TenantConfig::new(self.tenant_id.clone(), credentials);
        config.priority = true;
        config
    }
}

impl TasksConfig {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            fetch_attempts: self.fetch_attempts,
            fetch_retry_delay: Duration::from_millis(self.fetch_retry_delay_ms),
            progress: ProgressSettings {
                soft_throttle: Duration::from_millis(self.progress_soft_throttle_ms),
                hard_throttle: Duration::from_millis(self.progress_hard_throttle_ms),
                done_threshold_bytes: self.progress_done_threshold_bytes,
            },
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("botfleet.toml"));
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

        if let Some(fleet) = patch.fleet {
            if let Some(data_directory) = fleet.data_directory {
                self.fleet.data_directory = data_directory;
            }
            if let Some(polling_interval_secs) = fleet.polling_interval_secs {
                self.fleet.polling_interval_secs = polling_interval_secs;
            }
            if let Some(shards) = fleet.shards {
                self.fleet.shards = shards;
            }
            if let Some(default_tenant) = fleet.default_tenant {
                self.fleet.default_tenant = Some(DefaultTenantConfig {
                    tenant_id: default_tenant.tenant_id,
                    bot_token: secret_value(default_tenant.bot_token),
                    app_id: default_tenant.app_id,
                    app_hash: default_tenant.app_hash.map(secret_value),
                });
            }
        }

        if let Some(tasks) = patch.tasks {
            if let Some(fetch_attempts) = tasks.fetch_attempts {
                self.tasks.fetch_attempts = fetch_attempts;
            }
            if let Some(fetch_retry_delay_ms) = tasks.fetch_retry_delay_ms {
                self.tasks.fetch_retry_delay_ms = fetch_retry_delay_ms;
            }
            if let Some(soft) = tasks.progress_soft_throttle_ms {
                self.tasks.progress_soft_throttle_ms = soft;
            }
            if let Some(hard) = tasks.progress_hard_throttle_ms {
                self.tasks.progress_hard_throttle_ms = hard;
            }
            if let Some(threshold) = tasks.progress_done_threshold_bytes {
                self.tasks.progress_done_threshold_bytes = threshold;
            }
        }

        if let Some(fetch) = patch.fetch {
            if let Some(base_url) = fetch.base_url {
                self.fetch.base_url = base_url;
            }
            if let Some(timeout_secs) = fetch.timeout_secs {
                self.fetch.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("BOTFLEET_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BOTFLEET_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("BOTFLEET_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BOTFLEET_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BOTFLEET_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BOTFLEET_FLEET_DATA_DIRECTORY") {
            self.fleet.data_directory = PathBuf::from(value);
        }
        if let Some(value) = read_env("BOTFLEET_FLEET_POLLING_INTERVAL_SECS") {
            self.fleet.polling_interval_secs =
                parse_u64("BOTFLEET_FLEET_POLLING_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("BOTFLEET_FLEET_SHARDS") {
            self.fleet.shards = parse_usize("BOTFLEET_FLEET_SHARDS", &value)?;
        }
        self.apply_default_tenant_env();

        if let Some(value) = read_env("BOTFLEET_TASKS_FETCH_ATTEMPTS") {
            self.tasks.fetch_attempts = parse_u32("BOTFLEET_TASKS_FETCH_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("BOTFLEET_TASKS_FETCH_RETRY_DELAY_MS") {
            self.tasks.fetch_retry_delay_ms =
                parse_u64("BOTFLEET_TASKS_FETCH_RETRY_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("BOTFLEET_FETCH_BASE_URL") {
            self.fetch.base_url = value;
        }
        if let Some(value) = read_env("BOTFLEET_FETCH_TIMEOUT_SECS") {
            self.fetch.timeout_secs = parse_u64("BOTFLEET_FETCH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BOTFLEET_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BOTFLEET_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("BOTFLEET_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("BOTFLEET_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("BOTFLEET_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("BOTFLEET_LOGGING_LEVEL").or_else(|| read_env("BOTFLEET_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BOTFLEET_LOGGING_FORMAT").or_else(|| read_env("BOTFLEET_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_default_tenant_env(&mut self) {
        if let Some(tenant_id) = read_env("BOTFLEET_DEFAULT_TENANT_ID") {
            let keep_existing = self
                .fleet
                .default_tenant
                .as_ref()
                .is_some_and(|existing| existing.tenant_id == tenant_id);
            if !keep_existing {
                self.fleet.default_tenant = Some(DefaultTenantConfig::empty(tenant_id));
            }
        }
        let Some(default_tenant) = self.fleet.default_tenant.as_mut() else {
            return;
        };
        if let Some(value) = read_env("BOTFLEET_DEFAULT_TENANT_BOT_TOKEN") {
            default_tenant.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("BOTFLEET_DEFAULT_TENANT_APP_ID") {
            default_tenant.app_id = Some(value);
        }
        if let Some(value) = read_env("BOTFLEET_DEFAULT_TENANT_APP_HASH") {
            default_tenant.app_hash = Some(secret_value(value));
        }
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(data_directory) = overrides.data_directory {
            self.fleet.data_directory = data_directory;
        }
        if let Some(polling_interval_secs) = overrides.polling_interval_secs {
            self.fleet.polling_interval_secs = polling_interval_secs;
        }
        if let Some(fetch_base_url) = overrides.fetch_base_url {
            self.fetch.base_url = fetch_base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_fleet(&self.fleet)?;
        validate_tasks(&self.tasks)?;
        validate_fetch(&self.fetch)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("botfleet.toml"), PathBuf::from("config/botfleet.toml")]
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

fn validate_fleet(fleet: &FleetConfig) -> Result<(), ConfigError> {
    if fleet.data_directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation("fleet.data_directory must not be empty".to_string()));
    }

    if fleet.polling_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "fleet.polling_interval_secs must be greater than zero".to_string(),
        ));
    }

    if fleet.shards == 0 || fleet.shards > 1024 {
        return Err(ConfigError::Validation("fleet.shards must be in range 1..=1024".to_string()));
    }

    if let Some(default_tenant) = &fleet.default_tenant {
        if default_tenant.tenant_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "fleet.default_tenant.tenant_id must not be empty".to_string(),
            ));
        }
        if default_tenant.bot_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "fleet.default_tenant.bot_token is required when a default tenant is configured"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_tasks(tasks: &TasksConfig) -> Result<(), ConfigError> {
    if tasks.fetch_attempts == 0 || tasks.fetch_attempts > 10 {
        return Err(ConfigError::Validation(
            "tasks.fetch_attempts must be in range 1..=10".to_string(),
        ));
    }

    if tasks.progress_hard_throttle_ms < tasks.progress_soft_throttle_ms {
        return Err(ConfigError::Validation(
            "tasks.progress_hard_throttle_ms must not be lower than tasks.progress_soft_throttle_ms"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_fetch(fetch: &FetchConfig) -> Result<(), ConfigError> {
    if !fetch.base_url.starts_with("http://") && !fetch.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "fetch.base_url must start with http:// or https://".to_string(),
        ));
    }

    if fetch.timeout_secs == 0 || fetch.timeout_secs > 3_600 {
        return Err(ConfigError::Validation(
            "fetch.timeout_secs must be in range 1..=3600".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    fleet: Option<FleetPatch>,
    tasks: Option<TasksPatch>,
    fetch: Option<FetchPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FleetPatch {
    data_directory: Option<PathBuf>,
    polling_interval_secs: Option<u64>,
    shards: Option<usize>,
    default_tenant: Option<DefaultTenantPatch>,
}

#[derive(Debug, Deserialize)]
struct DefaultTenantPatch {
    tenant_id: String,
    bot_token: String,
    app_id: Option<String>,
    app_hash: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TasksPatch {
    fetch_attempts: Option<u32>,
    fetch_retry_delay_ms: Option<u64>,
    progress_soft_throttle_ms: Option<u64>,
    progress_hard_throttle_ms: Option<u64>,
    progress_done_threshold_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FetchPatch {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

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

    #[test]
    fn defaults_match_fleet_conventions() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        let fleet = config.fleet.settings();
        let pipeline = config.tasks.pipeline_settings();

        ensure(fleet.polling_interval == Duration::from_secs(600), "poll every ten minutes")?;
        ensure(fleet.shards == 8, "eight start-up shards by default")?;
        ensure(fleet.default_tenant.is_none(), "no default tenant unless configured")?;
        ensure(pipeline.fetch_attempts == 3, "three fetch attempts")?;
        ensure(pipeline.fetch_retry_delay == Duration::from_secs(5), "five second retry delay")?;
        ensure(
            pipeline.progress.hard_throttle == Duration::from_secs(10),
            "ten second hard throttle",
        )?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_DEFAULT_BOT_TOKEN", "123:from-env");
        env::set_var("TEST_DEFAULT_APP_HASH", "hash-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("botfleet.toml");
            fs::write(
                &path,
                r#"
[fleet]
shards = 4

[fleet.default_tenant]
tenant_id = "main"
bot_token = "${TEST_DEFAULT_BOT_TOKEN}"
app_id = "42"
app_hash = "${TEST_DEFAULT_APP_HASH}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.fleet.shards == 4, "shards should come from the file")?;
            let default_tenant =
                config.fleet.default_tenant.as_ref().ok_or("default tenant should be loaded")?;
            ensure(
                default_tenant.bot_token.expose_secret() == "123:from-env",
                "bot token should be interpolated from environment",
            )?;

            let seeded = default_tenant.tenant_config();
            ensure(seeded.priority, "default tenant starts with priority")?;
            ensure(
                seeded.credentials.missing_field().is_none(),
                "interpolated credentials should be complete",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_DEFAULT_BOT_TOKEN", "TEST_DEFAULT_APP_HASH"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BOTFLEET_LOG_LEVEL", "warn");
        env::set_var("BOTFLEET_LOG_FORMAT", "pretty");

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

        clear_vars(&["BOTFLEET_LOG_LEVEL", "BOTFLEET_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BOTFLEET_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("BOTFLEET_FLEET_POLLING_INTERVAL_SECS", "120");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("botfleet.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[fleet]
polling_interval_secs = 30
data_directory = "/var/lib/botfleet"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
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
            ensure(
                config.fleet.polling_interval_secs == 120,
                "env polling interval should win over file and defaults",
            )?;
            ensure(
                config.fleet.data_directory.to_str() == Some("/var/lib/botfleet"),
                "file data directory should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["BOTFLEET_DATABASE_URL", "BOTFLEET_FLEET_POLLING_INTERVAL_SECS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BOTFLEET_FLEET_SHARDS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("fleet.shards")
            );
            ensure(has_message, "validation failure should mention fleet.shards")
        })();

        clear_vars(&["BOTFLEET_FLEET_SHARDS"]);
        result
    }

    #[test]
    fn invalid_numeric_override_is_reported_with_its_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BOTFLEET_TASKS_FETCH_ATTEMPTS", "many");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "BOTFLEET_TASKS_FETCH_ATTEMPTS",
                "error should name the offending variable",
            ),
            _ => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["BOTFLEET_TASKS_FETCH_ATTEMPTS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BOTFLEET_DEFAULT_TENANT_ID", "main");
        env::set_var("BOTFLEET_DEFAULT_TENANT_BOT_TOKEN", "123:secret-token-value");
        env::set_var("BOTFLEET_DEFAULT_TENANT_APP_HASH", "secret-hash-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("secret-token-value"), "debug output should not contain token")?;
            ensure(!debug.contains("secret-hash-value"), "debug output should not contain hash")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "BOTFLEET_DEFAULT_TENANT_ID",
            "BOTFLEET_DEFAULT_TENANT_BOT_TOKEN",
            "BOTFLEET_DEFAULT_TENANT_APP_HASH",
        ]);
        result
    }
}
