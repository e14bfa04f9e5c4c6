//! Configuration for the chat gateway.

use std::fmt;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config as ConfigLoader, ConfigBuilder, ConfigError as LoaderError, Environment, File};
use serde::Deserialize;

/// Model used when `GEMINI_MODEL` is unset or blank.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Hard wall-clock limit for one upstream call.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(15);
/// Length of one rate-limit window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Deployment mode, resolved once from `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    /// Anything other than `development` is treated as production.
    pub fn from_env_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("development") {
            Mode::Development
        } else {
            Mode::Production
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }

    /// Whether internal error detail may be sent to clients.
    pub fn exposes_details(&self) -> bool {
        matches!(self, Mode::Development)
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mode: Mode,
    pub gemini: GeminiConfig,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
    /// Deadline applied to every upstream call.
    pub request_timeout: Duration,
    /// Directory with the front-end files, served as the router fallback.
    pub static_dir: Option<String>,
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_output_tokens: u32,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per client per window.
    pub max_requests: u32,
    pub window: Duration,
    /// Take the client address from `X-Forwarded-For` when behind a proxy.
    pub trust_proxy: bool,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins. Empty means any origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error(transparent)]
    Load(#[from] LoaderError),
}

/// Flat settings as they appear in the environment (lowercased keys).
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    google_gemini_api_key: Option<String>,
    #[serde(default)]
    gemini_model: Option<String>,
    gemini_base_url: String,
    max_tokens: i64,
    api_limit: i64,
    #[serde(default)]
    allowed_origins: Option<String>,
    node_env: String,
    host: String,
    port: u16,
    trust_proxy: bool,
    #[serde(default)]
    static_dir: Option<String>,
    log_level: String,
}

impl Config {
    /// Load configuration from `config.toml` (optional) and the environment.
    ///
    /// Environment variables take precedence over the file, which takes
    /// precedence over built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::default().try_parsing(true));
        Self::from_builder(builder)
    }

    /// Build configuration from arbitrary sources with defaults applied.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let raw: RawSettings = builder
            .set_default("gemini_base_url", DEFAULT_GEMINI_BASE_URL)?
            .set_default("max_tokens", 1000)?
            .set_default("api_limit", 100)?
            .set_default("node_env", "production")?
            .set_default("host", "0.0.0.0")?
            .set_default("port", 3000)?
            .set_default("trust_proxy", false)?
            .set_default("log_level", "info")?
            .build()?
            .try_deserialize()?;

        raw.try_into()
    }
}

impl TryFrom<RawSettings> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        let api_key = non_blank(raw.google_gemini_api_key)
            .ok_or(ConfigError::MissingEnvVar("GOOGLE_GEMINI_API_KEY"))?;

        let max_output_tokens = positive_u32("MAX_TOKENS", raw.max_tokens)?;
        let max_requests = positive_u32("API_LIMIT", raw.api_limit)?;

        let allowed_origins = raw
            .allowed_origins
            .as_deref()
            .map(parse_origins)
            .unwrap_or_default();

        Ok(Config {
            host: raw.host,
            port: raw.port,
            mode: Mode::from_env_name(&raw.node_env),
            gemini: GeminiConfig {
                api_key,
                model: non_blank(raw.gemini_model).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                base_url: raw.gemini_base_url.trim_end_matches('/').to_string(),
                max_output_tokens,
            },
            rate_limit: RateLimitConfig {
                max_requests,
                window: RATE_LIMIT_WINDOW,
                trust_proxy: raw.trust_proxy,
            },
            cors: CorsConfig { allowed_origins },
            logging: LoggingConfig {
                level: raw.log_level,
            },
            request_timeout: REQUEST_DEADLINE,
            static_dir: non_blank(raw.static_dir),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn positive_u32(key: &'static str, value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            reason: format!("expected a positive integer, got {}", value),
        })
}

/// Split a comma-separated origin list, dropping blanks and `*`.
fn parse_origins(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "*")
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<Config, ConfigError> {
        Config::from_builder(
            ConfigLoader::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_defaults() {
        let config = from_toml(r#"google_gemini_api_key = "key""#).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.mode, Mode::Production);
        assert_eq!(config.gemini.model, DEFAULT_MODEL);
        assert_eq!(config.gemini.max_output_tokens, 1000);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window, Duration::from_secs(3600));
        assert!(!config.rate_limit.trust_proxy);
        assert!(config.cors.allowed_origins.is_empty());
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert!(config.static_dir.is_none());
    }

    #[test]
    fn test_missing_api_key_fails() {
        let err = from_toml("port = 4000").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("GOOGLE_GEMINI_API_KEY")));
    }

    #[test]
    fn test_blank_api_key_fails() {
        let err = from_toml(r#"google_gemini_api_key = "   ""#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn test_overrides() {
        let config = from_toml(
            r#"
            google_gemini_api_key = "key"
            gemini_model = "gemini-2.0-flash"
            gemini_base_url = "http://localhost:9999/"
            max_tokens = 256
            api_limit = 5
            allowed_origins = "https://a.example, https://b.example,,"
            node_env = "Development"
            port = 8081
            "#,
        )
        .unwrap();
        assert_eq!(config.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.gemini.base_url, "http://localhost:9999");
        assert_eq!(config.gemini.max_output_tokens, 256);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.mode, Mode::Development);
        assert_eq!(config.port, 8081);
    }

    #[test]
    fn test_blank_model_falls_back() {
        let config = from_toml(
            r#"
            google_gemini_api_key = "key"
            gemini_model = ""
            "#,
        )
        .unwrap();
        assert_eq!(config.gemini.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let err = from_toml(
            r#"
            google_gemini_api_key = "key"
            max_tokens = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "MAX_TOKENS", .. }));

        let err = from_toml(
            r#"
            google_gemini_api_key = "key"
            api_limit = -3
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "API_LIMIT", .. }));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(Mode::from_env_name("development"), Mode::Development);
        assert_eq!(Mode::from_env_name("production"), Mode::Production);
        assert_eq!(Mode::from_env_name("test"), Mode::Production);
        assert!(Mode::Development.exposes_details());
        assert!(!Mode::Production.exposes_details());
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let config = from_toml(r#"google_gemini_api_key = "super-secret""#).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
