//! Centralized configuration for api-server.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time.

use axum::http::HeaderValue;
use domain::lifecycle::DEFAULT_DAILY_LIMIT;
use domain::{Email, Page};
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage (data lost on restart)
    Memory,
    /// SQLite file-based storage
    Sqlite,
}

impl StorageProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("memory") {
            Self::Memory
        } else {
            Self::Sqlite
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Server configuration loaded from environment variables.
///
/// All fields are validated at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3001)
    pub port: u16,
    /// CORS allow origin
    pub cors_allow_origin: HeaderValue,
    /// Storage provider (default: sqlite)
    pub storage_provider: StorageProvider,
    /// SQLite database path (default: ./data/urls.db)
    pub db_path: PathBuf,
    /// Log format
    pub log_format: LogFormat,
    /// Custom shortlink domain for generated URLs
    pub shortlink_domain: Option<String>,
    /// Accounts granted the admin role when they sign in
    pub admin_emails: Vec<Email>,
    /// Anonymous submissions allowed per email and UTC day
    pub daily_email_limit: u64,
    /// Default page size of listings
    pub page_size: usize,
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Fails fast on invalid configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Port
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3001);

        // CORS allow origin
        let cors_origin_str = env::var("CORS_ALLOW_ORIGIN").unwrap_or_else(|_| "*".into());
        let cors_allow_origin = if cors_origin_str == "*" {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(&cors_origin_str).map_err(|e| ConfigError {
                field: "CORS_ALLOW_ORIGIN",
                message: format!("Invalid header value '{}': {}", cors_origin_str, e),
            })?
        };

        // Storage provider
        let storage_provider = StorageProvider::from_str(
            &env::var("STORAGE_PROVIDER").unwrap_or_else(|_| "sqlite".into()),
        );

        // DB path (for sqlite)
        let db_path = env::var("DB_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/urls.db"));

        // Log format
        let log_format =
            LogFormat::from_str(&env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".into()));

        // Shortlink domain
        let shortlink_domain = env::var("SHORTLINK_DOMAIN").ok().filter(|s| !s.is_empty());

        let admin_emails = parse_admin_emails(&env::var("ADMIN_EMAILS").unwrap_or_default())?;

        let daily_email_limit = match env::var("DAILY_EMAIL_LIMIT") {
            Ok(s) => s.trim().parse().map_err(|_| ConfigError {
                field: "DAILY_EMAIL_LIMIT",
                message: format!("Expected a non-negative integer, got '{}'", s),
            })?,
            Err(_) => DEFAULT_DAILY_LIMIT,
        };

        let page_size = match env::var("PAGE_SIZE") {
            Ok(s) => parse_page_size(&s)?,
            Err(_) => Page::DEFAULT_PER_PAGE,
        };

        Ok(Self {
            port,
            cors_allow_origin,
            storage_provider,
            db_path,
            log_format,
            shortlink_domain,
            admin_emails,
            daily_email_limit,
            page_size,
        })
    }

    /// Log warnings about insecure configuration.
    pub fn warn_if_insecure(&self) {
        tracing::warn!(
            "Callers are identified by the X-Debug-User header. \
             DO NOT EXPOSE THIS SERVER PUBLICLY."
        );
        if self.admin_emails.is_empty() {
            tracing::warn!("ADMIN_EMAILS not set: nobody can block URLs or manage users.");
        }
    }
}

/// Comma-separated list; entries are trimmed and lowercased.
fn parse_admin_emails(raw: &str) -> Result<Vec<Email>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Email::new(s.to_lowercase()).map_err(|_| ConfigError {
                field: "ADMIN_EMAILS",
                message: format!("Invalid email '{}'", s),
            })
        })
        .collect()
}

fn parse_page_size(raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if (1..=http_common::MAX_PER_PAGE).contains(&n) => Ok(n),
        _ => Err(ConfigError {
            field: "PAGE_SIZE",
            message: format!(
                "Expected an integer in 1..={}, got '{}'",
                http_common::MAX_PER_PAGE,
                raw
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_provider_parsing() {
        assert_eq!(StorageProvider::from_str("memory"), StorageProvider::Memory);
        assert_eq!(StorageProvider::from_str("MEMORY"), StorageProvider::Memory);
        assert_eq!(StorageProvider::from_str("sqlite"), StorageProvider::Sqlite);
        assert_eq!(StorageProvider::from_str("anything"), StorageProvider::Sqlite);
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_str("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("anything"), LogFormat::Pretty);
    }

    #[test]
    fn admin_email_parsing() {
        let admins = parse_admin_emails(" Root@Example.com, ,ops@example.com").unwrap();
        let got: Vec<_> = admins.iter().map(Email::as_str).collect();
        assert_eq!(got, vec!["root@example.com", "ops@example.com"]);
        assert!(parse_admin_emails("").unwrap().is_empty());

        let err = parse_admin_emails("not-an-email").unwrap_err();
        assert_eq!(err.field, "ADMIN_EMAILS");
    }

    #[test]
    fn page_size_bounds() {
        assert_eq!(parse_page_size("25").unwrap(), 25);
        assert!(parse_page_size("0").is_err());
        assert!(parse_page_size("101").is_err());
        assert!(parse_page_size("ten").is_err());
    }
}
