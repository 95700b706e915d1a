use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
pub const DEFAULT_BIND_PORT: u16 = 8000;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_GEO_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    /// Shared bearer secret. `None` means open mode: every request admitted.
    pub auth_token: Option<String>,
    pub bind_addr: String,
    pub bind_port: u16,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_minute: u32,
    pub enabled_providers: Vec<String>,
    pub tool_timeout: Duration,
    pub geo_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("RATE_LIMIT_ENABLED must be true or false")]
    InvalidRateLimitToggle,
    #[error("RATE_LIMIT_PER_MINUTE must be a positive integer")]
    InvalidRateLimit,
    #[error("{0} must be a positive whole number of seconds")]
    InvalidTimeout(&'static str),
    #[error("ENABLED_PROVIDERS must name at least one provider")]
    NoProviders,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let auth_token = lookup("MCP_AUTH_TOKEN")
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_port = lookup("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(DEFAULT_BIND_PORT);

        let rate_limit_enabled = match lookup("RATE_LIMIT_ENABLED")
            .map(|value| value.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(_) => return Err(ConfigError::InvalidRateLimitToggle),
        };
        let rate_limit_per_minute = lookup("RATE_LIMIT_PER_MINUTE")
            .map(|value| {
                value
                    .parse::<u32>()
                    .ok()
                    .filter(|limit| *limit > 0)
                    .ok_or(ConfigError::InvalidRateLimit)
            })
            .transpose()?
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE);

        let enabled_providers = match lookup("ENABLED_PROVIDERS") {
            None => vec!["example".to_string()],
            Some(value) => {
                let providers: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
                if providers.is_empty() {
                    return Err(ConfigError::NoProviders);
                }
                providers
            }
        };

        let tool_timeout =
            parse_timeout(&lookup, "DEFAULT_TIMEOUT_SECS", DEFAULT_TOOL_TIMEOUT_SECS)?;
        let geo_timeout = parse_timeout(&lookup, "GEO_TIMEOUT_SECS", DEFAULT_GEO_TIMEOUT_SECS)?;

        let config = Self {
            auth_token,
            bind_addr,
            bind_port,
            rate_limit_enabled,
            rate_limit_per_minute,
            enabled_providers,
            tool_timeout,
            geo_timeout,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn parse_timeout(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    let secs = lookup(key)
        .map(|value| {
            value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidTimeout(key))
        })
        .transpose()?
        .unwrap_or(default_secs);
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|value| value.to_string())
    }

    #[test]
    fn parse_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).expect("config should parse");

        assert_eq!(config.auth_token, None);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.bind_port, DEFAULT_BIND_PORT);
        assert!(!config.rate_limit_enabled);
        assert_eq!(config.enabled_providers, vec!["example".to_string()]);
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.geo_timeout, Duration::from_secs(60));
    }

    #[test]
    fn blank_auth_token_means_open_mode() {
        let config = Config::from_lookup(lookup_from(&[("MCP_AUTH_TOKEN", "   ")]))
            .expect("config should parse");
        assert_eq!(config.auth_token, None);
    }

    #[test]
    fn providers_are_split_and_trimmed() {
        let config = Config::from_lookup(lookup_from(&[(
            "ENABLED_PROVIDERS",
            "example, wikipedia ,snl",
        )]))
        .expect("config should parse");
        assert_eq!(config.enabled_providers, vec!["example", "wikipedia", "snl"]);
    }

    #[test]
    fn empty_provider_list_fails() {
        let err = Config::from_lookup(lookup_from(&[("ENABLED_PROVIDERS", " , ")]))
            .expect_err("expected provider error");
        assert!(matches!(err, ConfigError::NoProviders));
    }

    #[test]
    fn invalid_port_fails() {
        let err = Config::from_lookup(lookup_from(&[("BIND_PORT", "99999")]))
            .expect_err("expected port error");
        assert!(matches!(err, ConfigError::InvalidPort));
    }

    #[test]
    fn invalid_rate_limit_toggle_fails() {
        let err = Config::from_lookup(lookup_from(&[("RATE_LIMIT_ENABLED", "maybe")]))
            .expect_err("expected toggle error");
        assert!(matches!(err, ConfigError::InvalidRateLimitToggle));
    }

    #[test]
    fn zero_timeout_fails() {
        let err = Config::from_lookup(lookup_from(&[("DEFAULT_TIMEOUT_SECS", "0")]))
            .expect_err("expected timeout error");
        assert!(matches!(
            err,
            ConfigError::InvalidTimeout("DEFAULT_TIMEOUT_SECS")
        ));
    }
}
