use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub llm: LlmConfig,
    pub slack: SlackConfig,
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
pub struct WhatsAppConfig {
    pub verify_token: SecretString,
    pub app_secret: SecretString,
    pub access_token: SecretString,
    pub phone_number_id: String,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub prompt_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub webhook_url: SecretString,
    pub signing_secret: SecretString,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
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
    pub whatsapp_verify_token: Option<String>,
    pub whatsapp_app_secret: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_api_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_prompt_path: Option<PathBuf>,
    pub slack_webhook_url: Option<String>,
    pub slack_signing_secret: Option<String>,
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
                url: "sqlite://clearquote.db".to_string(),
                max_connections: 1,
                timeout_secs: 30,
            },
            whatsapp: WhatsAppConfig {
                verify_token: String::new().into(),
                app_secret: String::new().into(),
                access_token: String::new().into(),
                phone_number_id: String::new(),
                api_base_url: "https://graph.facebook.com".to_string(),
            },
            llm: LlmConfig {
                api_key: String::new().into(),
                base_url: "https://api.deepseek.com".to_string(),
                model: "deepseek-chat".to_string(),
                timeout_secs: 30,
                prompt_path: PathBuf::from("templates/system_prompt.toml"),
            },
            slack: SlackConfig {
                webhook_url: String::new().into(),
                signing_secret: String::new().into(),
            },
            server: ServerConfig { bind_address: "0.0.0.0".to_string(), port: 8080 },
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
    /// Load configuration: defaults, then the optional config file, then
    /// `CLEARQUOTE_*` environment overrides, then programmatic overrides,
    /// then validation. Validation failure is a fatal startup error.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("clearquote.toml"));
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

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(verify_token) = whatsapp.verify_token {
                self.whatsapp.verify_token = secret_value(verify_token);
            }
            if let Some(app_secret) = whatsapp.app_secret {
                self.whatsapp.app_secret = secret_value(app_secret);
            }
            if let Some(access_token) = whatsapp.access_token {
                self.whatsapp.access_token = secret_value(access_token);
            }
            if let Some(phone_number_id) = whatsapp.phone_number_id {
                self.whatsapp.phone_number_id = phone_number_id;
            }
            if let Some(api_base_url) = whatsapp.api_base_url {
                self.whatsapp.api_base_url = api_base_url;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = secret_value(api_key);
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(prompt_path) = llm.prompt_path {
                self.llm.prompt_path = PathBuf::from(prompt_path);
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(webhook_url) = slack.webhook_url {
                self.slack.webhook_url = secret_value(webhook_url);
            }
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = secret_value(signing_secret);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
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
        if let Some(value) = read_env("CLEARQUOTE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CLEARQUOTE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CLEARQUOTE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CLEARQUOTE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CLEARQUOTE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CLEARQUOTE_WHATSAPP_VERIFY_TOKEN") {
            self.whatsapp.verify_token = secret_value(value);
        }
        if let Some(value) = read_env("CLEARQUOTE_WHATSAPP_APP_SECRET") {
            self.whatsapp.app_secret = secret_value(value);
        }
        if let Some(value) = read_env("CLEARQUOTE_WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = secret_value(value);
        }
        if let Some(value) = read_env("CLEARQUOTE_WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = value;
        }
        if let Some(value) = read_env("CLEARQUOTE_WHATSAPP_API_BASE_URL") {
            self.whatsapp.api_base_url = value;
        }

        if let Some(value) = read_env("CLEARQUOTE_LLM_API_KEY") {
            self.llm.api_key = secret_value(value);
        }
        if let Some(value) = read_env("CLEARQUOTE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("CLEARQUOTE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CLEARQUOTE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CLEARQUOTE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CLEARQUOTE_LLM_PROMPT_PATH") {
            self.llm.prompt_path = PathBuf::from(value);
        }

        if let Some(value) = read_env("CLEARQUOTE_SLACK_WEBHOOK_URL") {
            self.slack.webhook_url = secret_value(value);
        }
        if let Some(value) = read_env("CLEARQUOTE_SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = secret_value(value);
        }

        if let Some(value) = read_env("CLEARQUOTE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CLEARQUOTE_SERVER_PORT") {
            self.server.port = parse_u16("CLEARQUOTE_SERVER_PORT", &value)?;
        }

        let log_level =
            read_env("CLEARQUOTE_LOGGING_LEVEL").or_else(|| read_env("CLEARQUOTE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CLEARQUOTE_LOGGING_FORMAT").or_else(|| read_env("CLEARQUOTE_LOG_FORMAT"));
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
        if let Some(verify_token) = overrides.whatsapp_verify_token {
            self.whatsapp.verify_token = secret_value(verify_token);
        }
        if let Some(app_secret) = overrides.whatsapp_app_secret {
            self.whatsapp.app_secret = secret_value(app_secret);
        }
        if let Some(access_token) = overrides.whatsapp_access_token {
            self.whatsapp.access_token = secret_value(access_token);
        }
        if let Some(phone_number_id) = overrides.whatsapp_phone_number_id {
            self.whatsapp.phone_number_id = phone_number_id;
        }
        if let Some(api_base_url) = overrides.whatsapp_api_base_url {
            self.whatsapp.api_base_url = api_base_url;
        }
        if let Some(api_key) = overrides.llm_api_key {
            self.llm.api_key = secret_value(api_key);
        }
        if let Some(base_url) = overrides.llm_base_url {
            self.llm.base_url = base_url;
        }
        if let Some(prompt_path) = overrides.llm_prompt_path {
            self.llm.prompt_path = prompt_path;
        }
        if let Some(webhook_url) = overrides.slack_webhook_url {
            self.slack.webhook_url = secret_value(webhook_url);
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = secret_value(signing_secret);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_llm(&self.llm)?;
        validate_slack(&self.slack)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("clearquote.toml"), PathBuf::from("config/clearquote.toml")]
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

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    require_secret(&whatsapp.verify_token, "whatsapp.verify_token")?;
    require_secret(&whatsapp.app_secret, "whatsapp.app_secret")?;
    require_secret(&whatsapp.access_token, "whatsapp.access_token")?;

    if whatsapp.phone_number_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "whatsapp.phone_number_id is required (the sender id from the provider dashboard)"
                .to_string(),
        ));
    }

    if !whatsapp.api_base_url.starts_with("http://")
        && !whatsapp.api_base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "whatsapp.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    require_secret(&llm.api_key, "llm.api_key")?;

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let webhook_url = slack.webhook_url.expose_secret();
    if webhook_url.trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.webhook_url is required (the incoming-webhook URL of the escalation channel)"
                .to_string(),
        ));
    }
    if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.webhook_url must start with http:// or https://".to_string(),
        ));
    }

    require_secret(&slack.signing_secret, "slack.signing_secret")?;

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
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

fn require_secret(secret: &SecretString, key: &str) -> Result<(), ConfigError> {
    if secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(format!("{key} is required")));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
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
    whatsapp: Option<WhatsAppPatch>,
    llm: Option<LlmPatch>,
    slack: Option<SlackPatch>,
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
struct WhatsAppPatch {
    verify_token: Option<String>,
    app_secret: Option<String>,
    access_token: Option<String>,
    phone_number_id: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    prompt_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    webhook_url: Option<String>,
    signing_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
