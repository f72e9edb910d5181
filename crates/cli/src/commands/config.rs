use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use clearquote_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
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

    let lines = vec![
        "effective config (source precedence: override > env > file > default):".to_string(),
        render_line("database.url", &config.database.url, source("database.url", "CLEARQUOTE_DATABASE_URL")),
        render_line(
            "database.max_connections",
            &config.database.max_connections.to_string(),
            source("database.max_connections", "CLEARQUOTE_DATABASE_MAX_CONNECTIONS"),
        ),
        render_line(
            "whatsapp.verify_token",
            &redact(config.whatsapp.verify_token.expose_secret()),
            source("whatsapp.verify_token", "CLEARQUOTE_WHATSAPP_VERIFY_TOKEN"),
        ),
        render_line(
            "whatsapp.app_secret",
            &redact(config.whatsapp.app_secret.expose_secret()),
            source("whatsapp.app_secret", "CLEARQUOTE_WHATSAPP_APP_SECRET"),
        ),
        render_line(
            "whatsapp.access_token",
            &redact(config.whatsapp.access_token.expose_secret()),
            source("whatsapp.access_token", "CLEARQUOTE_WHATSAPP_ACCESS_TOKEN"),
        ),
        render_line(
            "whatsapp.phone_number_id",
            &config.whatsapp.phone_number_id,
            source("whatsapp.phone_number_id", "CLEARQUOTE_WHATSAPP_PHONE_NUMBER_ID"),
        ),
        render_line(
            "whatsapp.api_base_url",
            &config.whatsapp.api_base_url,
            source("whatsapp.api_base_url", "CLEARQUOTE_WHATSAPP_API_BASE_URL"),
        ),
        render_line(
            "llm.api_key",
            &redact(config.llm.api_key.expose_secret()),
            source("llm.api_key", "CLEARQUOTE_LLM_API_KEY"),
        ),
        render_line("llm.base_url", &config.llm.base_url, source("llm.base_url", "CLEARQUOTE_LLM_BASE_URL")),
        render_line("llm.model", &config.llm.model, source("llm.model", "CLEARQUOTE_LLM_MODEL")),
        render_line(
            "llm.timeout_secs",
            &config.llm.timeout_secs.to_string(),
            source("llm.timeout_secs", "CLEARQUOTE_LLM_TIMEOUT_SECS"),
        ),
        render_line(
            "llm.prompt_path",
            &config.llm.prompt_path.display().to_string(),
            source("llm.prompt_path", "CLEARQUOTE_LLM_PROMPT_PATH"),
        ),
        render_line(
            "slack.webhook_url",
            &redact(config.slack.webhook_url.expose_secret()),
            source("slack.webhook_url", "CLEARQUOTE_SLACK_WEBHOOK_URL"),
        ),
        render_line(
            "slack.signing_secret",
            &redact(config.slack.signing_secret.expose_secret()),
            source("slack.signing_secret", "CLEARQUOTE_SLACK_SIGNING_SECRET"),
        ),
        render_line(
            "server.bind_address",
            &config.server.bind_address,
            source("server.bind_address", "CLEARQUOTE_SERVER_BIND_ADDRESS"),
        ),
        render_line("server.port", &config.server.port.to_string(), source("server.port", "CLEARQUOTE_SERVER_PORT")),
        render_line("logging.level", &config.logging.level, source("logging.level", "CLEARQUOTE_LOGGING_LEVEL")),
        render_line(
            "logging.format",
            &format!("{:?}", config.logging.format),
            source("logging.format", "CLEARQUOTE_LOGGING_FORMAT"),
        ),
    ];

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("clearquote.toml"), PathBuf::from("config/clearquote.toml")]
        .into_iter()
        .find(|path| path.exists())
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

fn redact(secret: &str) -> String {
    if secret.trim().is_empty() {
        return "<empty>".to_string();
    }
    "<redacted>".to_string()
}
