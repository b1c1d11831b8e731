use std::{env, fmt, net::SocketAddr, path::PathBuf, time::Duration};

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://jobboard.db?mode=rwc";
pub const DEFAULT_MEDIA_ROOT: &str = "media";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60 * 24 * 14;
pub const MAX_SESSION_TTL_SECS: u64 = 60 * 60 * 24 * 365 * 10;
pub const DEFAULT_MAX_RESUME_BYTES: usize = 5 * 1024 * 1024;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns `true` for deployed environments, where cookies must be `Secure`.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Output format used to render page contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    Html,
    Json,
}

impl RendererKind {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidRenderer(other.to_string())),
        }
    }
}

/// Who may see the applicant list on a job detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicantVisibilitySetting {
    AnyEmployer,
    Owner,
}

impl ApplicantVisibilitySetting {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "any_employer" => Ok(Self::AnyEmployer),
            "owner" => Ok(Self::Owner),
            other => Err(ConfigError::InvalidApplicantVisibility(other.to_string())),
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub media_root: PathBuf,
    pub session_ttl: Duration,
    pub max_resume_bytes: usize,
    pub renderer: RendererKind,
    pub applicant_visibility: ApplicantVisibilitySetting,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let media_root = env::var("APP_MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_MEDIA_ROOT));

        let session_ttl_secs = parse_number("APP_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        if session_ttl_secs == 0 || session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(ConfigError::InvalidNumber {
                key: "APP_SESSION_TTL_SECS",
                value: session_ttl_secs.to_string(),
            });
        }
        let max_resume_bytes = parse_number("APP_MAX_RESUME_BYTES", DEFAULT_MAX_RESUME_BYTES)?;

        let renderer = match env::var("APP_RENDERER") {
            Ok(value) => RendererKind::from_str(&value)?,
            Err(_) => RendererKind::Html,
        };
        let applicant_visibility = match env::var("APP_APPLICANT_VISIBILITY") {
            Ok(value) => ApplicantVisibilitySetting::from_str(&value)?,
            Err(_) => ApplicantVisibilitySetting::AnyEmployer,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            media_root,
            session_ttl: Duration::from_secs(session_ttl_secs),
            max_resume_bytes,
            renderer,
            applicant_visibility,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidNumber { key: &'static str, value: String },
    InvalidRenderer(String),
    InvalidApplicantVisibility(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive integer (got {value})")
            }
            Self::InvalidRenderer(value) => {
                write!(f, "APP_RENDERER must be 'html' or 'json' (got {value})")
            }
            Self::InvalidApplicantVisibility(value) => write!(
                f,
                "APP_APPLICANT_VISIBILITY must be 'any_employer' or 'owner' (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
