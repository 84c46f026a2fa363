use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Default base URL of the hosted processing service.
pub const DEFAULT_SERVICE_URL: &str = "https://api.attache.dev/v1";

/// Default timeout for service requests, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default cap on remote downloads and uploads (256 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 256 * 1024 * 1024;

/// Runtime configuration for the attache router, clients, and server.
///
/// Loaded once at process start and passed by value into the components that
/// need it; nothing reads the environment after construction, so tests can
/// build a `Config` literal instead of mutating process state.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// API key enabling the remote processing service. `None` disables it.
    pub api_key: Option<String>,
    /// Base URL of the processing service.
    pub service_url: String,
    /// Default local/service attempt order.
    pub prefer: PreferenceMode,
    /// Timeout applied to each service request, in seconds.
    pub timeout_secs: u64,
    /// Maximum size accepted when downloading a remote file.
    pub max_download_bytes: u64,
    /// Maximum upload size accepted by the self-hosted server.
    pub max_upload_bytes: u64,
    /// User agent sent with outbound HTTP requests.
    pub user_agent: String,
    /// Optional bearer secret required by the self-hosted server.
    pub server_key: Option<String>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Attempt order for local processing versus the remote service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreferenceMode {
    /// Try local first; fall back to the service on missing dependencies.
    Local,
    /// Try the service first; fall back to local on transport failure.
    Service,
    /// Never consult the service.
    LocalOnly,
    /// Never attempt local processing; requires a configured service.
    ServiceOnly,
}

impl Config {
    /// Load configuration from `ATTACHE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: load_env_optional("ATTACHE_API_KEY"),
            service_url: load_env_optional("ATTACHE_SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            prefer: load_env_optional("ATTACHE_PREFER")
                .map(|value| value.parse())
                .transpose()?
                .unwrap_or(PreferenceMode::Local),
            timeout_secs: parse_env("ATTACHE_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS),
            max_download_bytes: parse_env("ATTACHE_MAX_DOWNLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_BYTES),
            max_upload_bytes: parse_env("ATTACHE_MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_BYTES),
            user_agent: load_env_optional("ATTACHE_USER_AGENT")
                .unwrap_or_else(|| concat!("attache/", env!("CARGO_PKG_VERSION")).to_string()),
            server_key: load_env_optional("ATTACHE_SERVER_KEY"),
            server_port: parse_env("ATTACHE_SERVER_PORT")?,
        })
    }

    /// True when a service endpoint and key are configured.
    pub fn service_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            service_url: DEFAULT_SERVICE_URL.to_string(),
            prefer: PreferenceMode::Local,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_download_bytes: DEFAULT_MAX_BYTES,
            max_upload_bytes: DEFAULT_MAX_BYTES,
            user_agent: concat!("attache/", env!("CARGO_PKG_VERSION")).to_string(),
            server_key: None,
            server_port: None,
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl FromStr for PreferenceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "service" => Ok(Self::Service),
            "local-only" => Ok(Self::LocalOnly),
            "service-only" => Ok(Self::ServiceOnly),
            other => Err(ConfigError::InvalidValue(format!(
                "prefer mode '{other}' (expected local, service, local-only, or service-only)"
            ))),
        }
    }
}

impl std::fmt::Display for PreferenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Service => "service",
            Self::LocalOnly => "local-only",
            Self::ServiceOnly => "service-only",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefer_mode_round_trips_through_from_str() {
        for mode in [
            PreferenceMode::Local,
            PreferenceMode::Service,
            PreferenceMode::LocalOnly,
            PreferenceMode::ServiceOnly,
        ] {
            assert_eq!(mode.to_string().parse::<PreferenceMode>().unwrap(), mode);
        }
    }

    #[test]
    fn invalid_prefer_mode_is_rejected() {
        assert!("remote".parse::<PreferenceMode>().is_err());
    }

    #[test]
    fn default_config_has_no_service() {
        let config = Config::default();
        assert!(!config.service_configured());
        assert_eq!(config.prefer, PreferenceMode::Local);
    }
}
