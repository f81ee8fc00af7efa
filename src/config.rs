//! Service configuration, built from `MEDICTRACK_*` environment variables.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port the HTTP/WS server binds on.
    pub port: u16,
    /// Path of the local libSQL database file.
    pub db_path: PathBuf,
    /// Directory for rotated log files (stdout only when unset).
    pub log_dir: Option<PathBuf>,
    /// Admin account ensured at startup so a fresh install is usable.
    pub bootstrap_admin: Option<BootstrapAdmin>,
    /// SMTP settings; `None` disables email and notifications go to the log.
    pub smtp: Option<SmtpConfig>,
}

/// Bootstrap admin identity.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub name: String,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// Unset variables fall back to defaults; malformed values are refused
    /// rather than silently defaulted so a typo cannot move the service to
    /// the wrong port.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_or_default("MEDICTRACK_PORT", 8080)?;

        let db_path = std::env::var("MEDICTRACK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/medictrack.db"));

        let log_dir = std::env::var("MEDICTRACK_LOG_DIR").ok().map(PathBuf::from);

        let bootstrap_admin = std::env::var("MEDICTRACK_ADMIN_EMAIL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|email| BootstrapAdmin {
                email,
                name: std::env::var("MEDICTRACK_ADMIN_NAME")
                    .unwrap_or_else(|_| "Program Admin".to_string()),
            });

        Ok(Self {
            port,
            db_path,
            log_dir,
            bootstrap_admin,
            smtp: SmtpConfig::from_env()?,
        })
    }
}

/// SMTP notifier configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `Ok(None)` if `MEDICTRACK_SMTP_HOST` is not set (email disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(host) = std::env::var("MEDICTRACK_SMTP_HOST") else {
            return Ok(None);
        };

        let port = parse_or_default("MEDICTRACK_SMTP_PORT", 587)?;
        let username = std::env::var("MEDICTRACK_SMTP_USERNAME").unwrap_or_default();
        let password =
            SecretString::from(std::env::var("MEDICTRACK_SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("MEDICTRACK_SMTP_FROM").unwrap_or_else(|_| username.clone());

        Ok(Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        }))
    }
}

fn parse_or_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a port number, got '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smtp_config_absent_without_host() {
        // SAFETY: no other test reads MEDICTRACK_SMTP_HOST concurrently.
        unsafe { std::env::remove_var("MEDICTRACK_SMTP_HOST") };
        assert!(SmtpConfig::from_env().unwrap().is_none());
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        // SAFETY: no other test writes these variables.
        unsafe {
            std::env::remove_var("MEDICTRACK_PORT");
            std::env::remove_var("MEDICTRACK_DB_PATH");
            std::env::remove_var("MEDICTRACK_ADMIN_EMAIL");
        }
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, PathBuf::from("./data/medictrack.db"));
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn malformed_port_is_refused() {
        let err = parse_or_default("MEDICTRACK_TEST_BAD_PORT", 1).err();
        assert!(err.is_none(), "unset var should fall back to default");

        // SAFETY: variable name is unique to this test.
        unsafe { std::env::set_var("MEDICTRACK_TEST_BAD_PORT", "eighty") };
        let err = parse_or_default("MEDICTRACK_TEST_BAD_PORT", 1)
            .err()
            .expect("malformed value should error");
        assert!(err.to_string().contains("eighty"));
        unsafe { std::env::remove_var("MEDICTRACK_TEST_BAD_PORT") };
    }
}
