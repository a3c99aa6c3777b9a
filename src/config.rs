/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: booktrack.toml (in working directory)
/// 3. Environment variables: prefixed BOOKTRACK_ (e.g., BOOKTRACK_LOG_LEVEL=debug),
///    nested keys separated by `__` (e.g., BOOKTRACK_ISBN__API_KEY)

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use crate::errors::BooksError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    /// SQLite database path. Supports sqlite:// URI scheme and sqlite::memory:.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Address the HTTP API listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// When set, data routes require a matching `x-api-key` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// Window for the "recent reads" report, in days
    #[serde(default = "default_recent_days")]
    pub recent_days: i64,

    /// Reads dated in this year predate record keeping and are left out of yearly summaries
    #[serde(default = "default_unrecorded_read_year")]
    pub unrecorded_read_year: i32,

    /// Location given to new books that do not name one
    #[serde(default = "default_location")]
    pub default_location: String,

    /// Display order for location pickers. Unlisted locations follow alphabetically.
    #[serde(default = "default_location_order")]
    pub location_order: Vec<String>,

    /// Default number of books returned by the complete-records window
    #[serde(default = "default_window_size")]
    pub window_size: i64,

    #[serde(default)]
    pub isbn: IsbnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsbnConfig {
    /// Lookup URL; `{}` is replaced by the ISBN
    #[serde(default = "default_isbn_url_template")]
    pub url_template: String,

    /// isbndb API key, sent as the Authorization header. Lookup is disabled without it.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_path() -> String {
    "sqlite://booktrack.db".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8083".to_string()
}

fn default_recent_days() -> i64 {
    100
}

fn default_unrecorded_read_year() -> i32 {
    1966
}

fn default_location() -> String {
    "Main Collection".to_string()
}

fn default_location_order() -> Vec<String> {
    vec![default_location()]
}

fn default_window_size() -> i64 {
    20
}

fn default_isbn_url_template() -> String {
    "https://api2.isbndb.com/book/{}".to_string()
}

impl Default for IsbnConfig {
    fn default() -> Self {
        IsbnConfig {
            url_template: default_isbn_url_template(),
            api_key: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
            api_key: None,
            recent_days: default_recent_days(),
            unrecorded_read_year: default_unrecorded_read_year(),
            default_location: default_location(),
            location_order: default_location_order(),
            window_size: default_window_size(),
            isbn: IsbnConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: BOOKTRACK_LOG_LEVEL=debug overrides log_level in booktrack.toml
    pub fn load() -> Result<Config, BooksError> {
        Self::figment()
            .extract()
            .map_err(|e| BooksError::Config(format!("Failed to load config: {}", e)))
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("booktrack.toml"))
            .merge(Env::prefixed("BOOKTRACK_").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_file, None);
        assert_eq!(config.db_path, "sqlite://booktrack.db");
        assert_eq!(config.bind_addr, "127.0.0.1:8083");
        assert_eq!(config.recent_days, 100);
        assert_eq!(config.unrecorded_read_year, 1966);
        assert_eq!(config.window_size, 20);
        assert_eq!(config.location_order, vec!["Main Collection"]);
        assert!(config.api_key.is_none());
        assert!(config.isbn.api_key.is_none());
        assert!(config.isbn.url_template.contains("{}"));
    }

    #[test]
    fn test_toml_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "booktrack.toml",
                r#"
                    log_level = "debug"
                    recent_days = 30
                    location_order = ["Office", "Main Collection"]
                    [isbn]
                    api_key = "from-toml"
                "#,
            )?;
            jail.set_env("BOOKTRACK_RECENT_DAYS", "7");
            jail.set_env("BOOKTRACK_ISBN__API_KEY", "from-env");

            let config: Config = Config::figment().extract()?;
            assert_eq!(config.log_level, "debug");
            assert_eq!(config.recent_days, 7);
            assert_eq!(config.isbn.api_key.as_deref(), Some("from-env"));
            assert_eq!(config.default_location, "Main Collection");
            assert_eq!(config.location_order, vec!["Office", "Main Collection"]);
            Ok(())
        });
    }
}
