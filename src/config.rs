// src/config.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::cache::DEFAULT_CACHE_TTL_SECS;
use crate::core::rate_limiter::RateLimiterConfig;
use crate::core::scanner::email_scanner::DEFAULT_DKIM_SELECTORS;
use crate::logging::{CONFIG_ENV, get_config_dir};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How DNS questions are answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsBackend {
    /// DNS-over-HTTPS JSON API.
    #[default]
    Doh,
    /// The operating system's resolver configuration.
    System,
}

/// Base URLs of the external services the modules consult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Endpoints {
    pub doh: String,
    pub certificate_transparency: String,
    pub rdap_bootstrap: String,
    pub tls_assessment: String,
    pub header_report: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            doh: "https://dns.google/resolve".to_string(),
            certificate_transparency: "https://crt.sh/".to_string(),
            rdap_bootstrap: "https://data.iana.org/rdap/dns.json".to_string(),
            tls_assessment: "https://api.ssllabs.com/api/v3/analyze".to_string(),
            header_report: "https://securityheaders.com/".to_string(),
        }
    }
}

/// Everything a scan can be tuned with. Every field has a default, so a
/// config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanConfig {
    pub endpoints: Endpoints,
    pub user_agent: String,
    pub dns_backend: DnsBackend,
    pub default_timeout_ms: u64,
    /// Per-module timeout overrides, keyed by scanner id.
    pub scanner_timeouts_ms: BTreeMap<String, u64>,
    pub tls_poll_interval_secs: u64,
    pub tls_max_polls: u32,
    pub dkim_selectors: Vec<String>,
    pub cache_ttl_secs: i64,
    pub rate_limit_window_secs: i64,
    pub rate_limit_max_requests: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let rate_limit = RateLimiterConfig::default();
        Self {
            endpoints: Endpoints::default(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            dns_backend: DnsBackend::default(),
            default_timeout_ms: 30_000,
            scanner_timeouts_ms: BTreeMap::from([("tls".to_string(), 300_000)]),
            tls_poll_interval_secs: 10,
            tls_max_polls: 30,
            dkim_selectors: DEFAULT_DKIM_SELECTORS.iter().map(|s| s.to_string()).collect(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            rate_limit_window_secs: rate_limit.window_secs,
            rate_limit_max_requests: rate_limit.max_requests,
        }
    }
}

impl ScanConfig {
    /// Loads from the path in the config environment variable, or from
    /// `config.json` in the user's config directory.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| get_config_dir().join(CONFIG_FILE));
        Self::load_from(&path)
    }

    /// A missing file means defaults; an unreadable or malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults.");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration.");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("defaultTimeoutMs must be greater than zero".into()));
        }
        if let Some((id, _)) = self.scanner_timeouts_ms.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::Invalid(format!(
                "timeout for scanner '{id}' must be greater than zero"
            )));
        }
        if self.tls_max_polls == 0 {
            return Err(ConfigError::Invalid("tlsMaxPolls must be at least 1".into()));
        }
        if self.rate_limit_window_secs <= 0 || self.rate_limit_max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rate limit window and maximum must be positive".into(),
            ));
        }
        if self.cache_ttl_secs <= 0 {
            return Err(ConfigError::Invalid("cacheTtlSecs must be positive".into()));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn scanner_timeout(&self, id: &str) -> Option<Duration> {
        self.scanner_timeouts_ms.get(id).copied().map(Duration::from_millis)
    }

    pub fn tls_poll_interval(&self) -> Duration {
        Duration::from_secs(self.tls_poll_interval_secs)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs)
    }

    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            window_secs: self.rate_limit_window_secs,
            max_requests: self.rate_limit_max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = ScanConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, ScanConfig::default());
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.scanner_timeout("tls"), Some(Duration::from_secs(300)));
        assert_eq!(config.dkim_selectors, vec!["default", "selector1", "selector2"]);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "dnsBackend": "system",
                "tlsMaxPolls": 5,
                "endpoints": {{"doh": "https://cloudflare-dns.com/dns-query"}}
            }}"#
        )
        .unwrap();

        let config = ScanConfig::load_from(file.path()).unwrap();
        assert_eq!(config.dns_backend, DnsBackend::System);
        assert_eq!(config.tls_max_polls, 5);
        assert_eq!(config.endpoints.doh, "https://cloudflare-dns.com/dns-query");
        assert_eq!(config.endpoints.certificate_transparency, "https://crt.sh/");
        assert_eq!(config.rate_limiter(), RateLimiterConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = ScanConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("Malformed config file"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"rateLimitMaxRequests": 0}}"#).unwrap();
        assert!(matches!(ScanConfig::load_from(file.path()), Err(ConfigError::Invalid(_))));
    }
}
