use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::format::FormatOptions;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    /// Falls back to $TELEGRAM_BOT_TOKEN when empty.
    #[serde(default)]
    telegram_bot_token: String,
    /// Falls back to $OPENROUTER_API_KEY when empty.
    #[serde(default)]
    openrouter_api_key: String,
    /// Supabase project URL. Without it conversations go to a local SQLite file.
    #[serde(default)]
    supabase_url: String,
    #[serde(default)]
    supabase_service_key: String,
    /// Directory for state files (logs, local database). Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_rate_limit_messages")]
    rate_limit_messages: usize,
    #[serde(default = "default_rate_limit_window_secs")]
    rate_limit_window_secs: u64,
    #[serde(default = "default_max_message_length")]
    max_message_length: usize,
    #[serde(default = "default_max_history_messages")]
    max_history_messages: usize,
    #[serde(default = "default_summary_model")]
    summary_model: String,
    /// Send a progress summary every N user messages (0 = never).
    #[serde(default = "default_summary_every")]
    summary_every: usize,
    #[serde(default)]
    citations: Option<crate::format::CitationSettings>,
    /// Public base URL; when set the bot receives updates at `{webhook_url}/webhook`.
    webhook_url: Option<String>,
    webhook_port: Option<u16>,
    /// Handle shown in /help and /stats for feedback, e.g. "@founder".
    feedback_contact: Option<String>,
}

fn default_rate_limit_messages() -> usize {
    30
}

fn default_rate_limit_window_secs() -> u64 {
    3600
}

fn default_max_message_length() -> usize {
    4000
}

fn default_max_history_messages() -> usize {
    10
}

fn default_summary_model() -> String {
    "openai/gpt-3.5-turbo".to_string()
}

fn default_summary_every() -> usize {
    4
}

/// Hosted Supabase credentials.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
}

pub struct Config {
    pub telegram_bot_token: String,
    pub openrouter_api_key: String,
    /// `None` means the local SQLite store under `data_dir`.
    pub supabase: Option<SupabaseConfig>,
    pub data_dir: PathBuf,
    pub rate_limit_messages: usize,
    pub rate_limit_window: Duration,
    /// Max chars per outgoing Telegram message (after escaping).
    pub max_message_length: usize,
    /// How many previous turns are sent to the model.
    pub max_history_messages: usize,
    pub summary_model: String,
    pub summary_every: usize,
    pub format: FormatOptions,
    pub webhook_url: Option<String>,
    pub webhook_port: u16,
    pub feedback_contact: Option<String>,
}

/// File value, or the environment variable when the file leaves it empty.
fn or_env(value: String, var: &str) -> String {
    if value.trim().is_empty() {
        std::env::var(var).unwrap_or_default()
    } else {
        value
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let telegram_bot_token = or_env(file.telegram_bot_token, "TELEGRAM_BOT_TOKEN");
        let openrouter_api_key = or_env(file.openrouter_api_key, "OPENROUTER_API_KEY");
        let supabase_url = or_env(file.supabase_url, "SUPABASE_URL");
        let supabase_service_key = or_env(file.supabase_service_key, "SUPABASE_SERVICE_KEY");

        if telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if openrouter_api_key.is_empty() {
            return Err(ConfigError::Validation("openrouter_api_key is required".into()));
        }

        let supabase = match (supabase_url.is_empty(), supabase_service_key.is_empty()) {
            (true, true) => None,
            (false, false) => Some(SupabaseConfig {
                url: supabase_url.trim_end_matches('/').to_string(),
                service_key: supabase_service_key,
            }),
            _ => {
                return Err(ConfigError::Validation(
                    "supabase_url and supabase_service_key must be set together".into()
                ));
            }
        };

        if file.rate_limit_messages == 0 {
            return Err(ConfigError::Validation("rate_limit_messages must be at least 1".into()));
        }
        if file.max_message_length < 100 || file.max_message_length > 4096 {
            return Err(ConfigError::Validation(
                "max_message_length must be between 100 and 4096".into()
            ));
        }

        let webhook_port = file
            .webhook_port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(8000);

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token,
            openrouter_api_key,
            supabase,
            data_dir,
            rate_limit_messages: file.rate_limit_messages,
            rate_limit_window: Duration::from_secs(file.rate_limit_window_secs),
            max_message_length: file.max_message_length,
            max_history_messages: file.max_history_messages,
            summary_model: file.summary_model,
            summary_every: file.summary_every,
            format: FormatOptions {
                citations: file.citations.unwrap_or_default(),
            },
            webhook_url: file.webhook_url.filter(|u| !u.trim().is_empty()),
            webhook_port,
            feedback_contact: file.feedback_contact,
        })
    }

    /// Local database path used when Supabase is not configured.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("advisor.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CitationMode, UnresolvedCitations};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "openrouter_api_key": "sk-or-test"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.rate_limit_messages, 30);
        assert_eq!(config.rate_limit_window, Duration::from_secs(3600));
        assert_eq!(config.max_message_length, 4000);
        assert_eq!(config.max_history_messages, 10);
        assert_eq!(config.summary_every, 4);
        assert!(config.supabase.is_none());
        assert_eq!(config.sqlite_path(), PathBuf::from("./advisor.db"));
        assert_eq!(config.format.citations.unresolved, UnresolvedCitations::Preserve);
    }

    #[test]
    fn test_full_config() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "openrouter_api_key": "sk-or-test",
            "supabase_url": "https://abc.supabase.co/",
            "supabase_service_key": "service",
            "rate_limit_messages": 5,
            "rate_limit_window_secs": 60,
            "citations": { "mode": "strip" },
            "webhook_url": "https://bot.example.com",
            "webhook_port": 9000
        }"#);
        let config = Config::load(file.path()).unwrap();
        let supabase = config.supabase.expect("supabase configured");
        assert_eq!(supabase.url, "https://abc.supabase.co");
        assert_eq!(config.rate_limit_messages, 5);
        assert_eq!(config.format.citations.mode, CitationMode::Strip);
        assert_eq!(config.webhook_url.as_deref(), Some("https://bot.example.com"));
        assert_eq!(config.webhook_port, 9000);
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = write_config(r#"{
            "telegram_bot_token": "invalid_token_no_colon",
            "openrouter_api_key": "sk"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{
            "telegram_bot_token": "notanumber:ABCdef",
            "openrouter_api_key": "sk"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_half_supabase_rejected() {
        let file = write_config(r#"{
            "telegram_bot_token": "123:abc",
            "openrouter_api_key": "sk",
            "supabase_url": "https://abc.supabase.co",
            "supabase_service_key": "from-file-only-url-missing-key-test"
        }"#);
        assert!(Config::load(file.path()).is_ok());

        let file = write_config(r#"{
            "telegram_bot_token": "123:abc",
            "openrouter_api_key": "sk",
            "supabase_service_key": "key"
        }"#);
        // Only fails when SUPABASE_URL isn't provided through the environment either.
        if std::env::var("SUPABASE_URL").is_err() {
            let err = assert_err(Config::load(file.path()));
            assert!(err.to_string().contains("supabase_url"));
        }
    }

    #[test]
    fn test_message_length_bounds() {
        let file = write_config(r#"{
            "telegram_bot_token": "123:abc",
            "openrouter_api_key": "sk",
            "max_message_length": 5000
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("max_message_length"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
