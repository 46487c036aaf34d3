use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct TablelogConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub tick_seconds: u64,
    /// Minutes before the scheduled end at which the reminder fires.
    pub reminder_lead_minutes: i64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            reminder_lead_minutes: 10,
        }
    }
}

/// Inclusive bounds applied by every entry path.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_customers: i64,
    pub max_customers: i64,
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    pub min_extension_minutes: i64,
    pub max_extension_minutes: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_customers: 1,
            max_customers: 10,
            min_duration_minutes: 10,
            max_duration_minutes: 600,
            min_extension_minutes: 5,
            max_extension_minutes: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_notifier_timeout")]
    pub timeout_seconds: u64,
}

fn default_notifier_timeout() -> u64 {
    10
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            timeout_seconds: default_notifier_timeout(),
        }
    }
}

impl NotifierConfig {
    pub fn is_enabled(&self) -> bool {
        !self.webhook_url.trim().is_empty()
    }
}

impl TablelogConfig {
    /// Load from a TOML file, then apply `TABLELOG__SECTION__KEY` env overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("TABLELOG").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    /// Parse an in-memory TOML document. Environment overrides are not applied.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = TablelogConfig::from_toml_str(
            r#"
            [service]
            socket_path = "/tmp/tablelog-test.sock"
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.log_level, "debug");
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.scanner.tick_seconds, 60);
        assert_eq!(config.scanner.reminder_lead_minutes, 10);
        assert_eq!(config.limits.max_customers, 10);
        assert_eq!(config.limits.min_extension_minutes, 5);
        assert!(!config.notifier.is_enabled());
    }

    #[test]
    fn test_partial_limits_keep_remaining_defaults() {
        let config = TablelogConfig::from_toml_str(
            r#"
            [service]
            socket_path = "/tmp/tablelog-test.sock"
            log_level = "info"

            [limits]
            max_customers = 20

            [notifier]
            webhook_url = "https://chat.example.invalid/hook"
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.max_customers, 20);
        assert_eq!(config.limits.min_customers, 1);
        assert_eq!(config.limits.max_duration_minutes, 600);
        assert!(config.notifier.is_enabled());
        assert_eq!(config.notifier.timeout_seconds, 10);
    }

    #[test]
    fn test_partial_http_and_scanner_sections_keep_defaults() {
        let config = TablelogConfig::from_toml_str(
            r#"
            [service]
            socket_path = "/tmp/tablelog-test.sock"
            log_level = "info"

            [http]
            port = 9090

            [scanner]
            tick_seconds = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.http.port, 9090);
        assert!(config.http.enabled);
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.scanner.tick_seconds, 30);
        assert_eq!(config.scanner.reminder_lead_minutes, 10);
    }

    #[test]
    fn test_missing_service_section_is_error() {
        let result = TablelogConfig::from_toml_str("[http]\nenabled = false\nhost = \"x\"\nport = 1\n");
        assert!(result.is_err());
    }
}
