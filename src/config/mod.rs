use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::TimeSlot;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub otp: OtpConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Origins allowed by CORS; empty means any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_port: default_api_port(),
            data_dir: default_data_dir(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Access token lifetime in seconds (default: 15 minutes)
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl: u64,
    /// Refresh token lifetime in seconds (default: 7 days)
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl: u64,
    /// Admin account created on first start when both fields are set
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    #[serde(default = "default_admin_name")]
    pub admin_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            access_token_ttl: default_access_token_ttl(),
            refresh_token_ttl: default_refresh_token_ttl(),
            admin_email: None,
            admin_password: None,
            admin_name: default_admin_name(),
        }
    }
}

fn default_jwt_secret() -> String {
    // Generate a random secret if not provided; tokens then die with the process
    uuid::Uuid::new_v4().to_string()
}

fn default_access_token_ttl() -> u64 {
    15 * 60
}

fn default_refresh_token_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    /// Flat charge added for every person beyond the first
    #[serde(default = "default_per_person_surcharge")]
    pub per_person_surcharge: f64,
    /// Slot used for weekdays a buddy never configured, `HH:MM-HH:MM`.
    /// A malformed value fails the config load.
    #[serde(default = "default_slot")]
    pub default_slot: TimeSlot,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            per_person_surcharge: default_per_person_surcharge(),
            default_slot: default_slot(),
        }
    }
}

fn default_per_person_surcharge() -> f64 {
    5.0
}

fn default_slot() -> TimeSlot {
    TimeSlot::new(9 * 60, 17 * 60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Minutes after creation during which a message may be edited
    #[serde(default = "default_edit_window_minutes")]
    pub edit_window_minutes: i64,
    /// Maximum page size for message history
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            edit_window_minutes: default_edit_window_minutes(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_edit_window_minutes() -> i64 {
    15
}

fn default_history_limit() -> i64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    #[serde(default = "default_otp_ttl")]
    pub ttl_seconds: u64,
    /// Wrong guesses allowed before the code is discarded
    #[serde(default = "default_otp_max_attempts")]
    pub max_attempts: u64,
    /// Interval of the key-value store expiry sweep
    #[serde(default = "default_kv_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_otp_ttl(),
            max_attempts: default_otp_max_attempts(),
            cleanup_interval: default_kv_cleanup_interval(),
        }
    }
}

fn default_otp_ttl() -> u64 {
    5 * 60
}

fn default_otp_max_attempts() -> u64 {
    5
}

fn default_kv_cleanup_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_rate_limit_cleanup")]
    pub cleanup_interval: u64,
    /// Key clients by `X-Forwarded-For`/`X-Real-IP`. Only enable behind a
    /// reverse proxy that overwrites those headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_rate_limit_cleanup(),
            trust_forwarded_headers: false,
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_api_requests() -> u32 {
    300
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_rate_limit_cleanup() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SMTP settings for OTP delivery
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: default_smtp_tls(),
            from_address: None,
            from_name: default_from_name(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> bool {
    true
}

fn default_from_name() -> String {
    "Rent a Buddy".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            booking: BookingConfig::default(),
            chat: ChatConfig::default(),
            otp: OtpConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            api_port = 9000

            [booking]
            per_person_surcharge = 7.5
            "#,
        )
        .unwrap();

        assert_eq!(config.server.api_port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.booking.per_person_surcharge, 7.5);
        assert_eq!(config.booking.default_slot.to_string(), "09:00-17:00");
        assert_eq!(config.auth.access_token_ttl, 900);
        assert_eq!(config.auth.refresh_token_ttl, 604_800);
        assert_eq!(config.chat.edit_window_minutes, 15);
        assert_eq!(config.otp.ttl_seconds, 300);
    }

    #[test]
    fn test_default_slot_is_parsed_at_load() {
        let config: Config = toml::from_str(
            r#"
            [booking]
            default_slot = "08:30-12:00"
            "#,
        )
        .unwrap();
        assert_eq!(config.booking.default_slot, TimeSlot::new(8 * 60 + 30, 12 * 60));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rentabuddy.toml");
        std::fs::write(&path, "[booking]\ndefault_slot = \"9am-5pm\"\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_email_configured_requires_host_and_sender() {
        let mut email = EmailConfig::default();
        assert!(!email.is_configured());
        email.smtp_host = Some("smtp.example.com".to_string());
        assert!(!email.is_configured());
        email.from_address = Some("noreply@example.com".to_string());
        assert!(email.is_configured());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Path::new("/nonexistent/rentabuddy.toml")).unwrap();
        assert_eq!(config.server.api_port, 5000);
        assert!(config.rate_limit.enabled);
        assert!(!config.rate_limit.trust_forwarded_headers);
    }
}
