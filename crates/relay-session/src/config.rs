//! Relay session configuration.
//!
//! Configuration is loaded from environment variables with defaults.

use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Default number of messages retained per chat thread.
pub const DEFAULT_MAX_HISTORY: usize = 200;

/// Default maximum chat message length, in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;

/// Default number of messages a sender may post per rate window.
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 20;

/// Default rate window length in milliseconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 10_000;

/// Default address the media engine binds transports to.
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";

/// Default lower bound of the RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 40_000;

/// Default upper bound of the RTC port range.
pub const DEFAULT_RTC_MAX_PORT: u16 = 49_999;

/// Default outbound event buffer per connection.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Network settings handed to the media engine on every transport creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Local address transports bind to.
    pub listen_ip: IpAddr,
    /// Address announced to remote peers in ICE candidates (public IP behind NAT).
    pub announced_ip: Option<String>,
    /// Lowest UDP/TCP port the engine may allocate.
    pub rtc_min_port: u16,
    /// Highest UDP/TCP port the engine may allocate.
    pub rtc_max_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            announced_ip: None,
            rtc_min_port: DEFAULT_RTC_MIN_PORT,
            rtc_max_port: DEFAULT_RTC_MAX_PORT,
        }
    }
}

/// Relay session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Messages retained per thread (oldest evicted first).
    pub max_history: usize,

    /// Maximum characters kept from a sanitized message.
    pub max_message_len: usize,

    /// Messages allowed per sender per window.
    pub rate_limit_max: u32,

    /// Fixed rate window length.
    pub rate_limit_window: Duration,

    /// Outbound event buffer per connection.
    pub mailbox_capacity: usize,

    /// Media transport network settings.
    pub network: NetworkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            rate_limit_window: Duration::from_millis(DEFAULT_RATE_LIMIT_WINDOW_MS),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            network: NetworkConfig::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let max_history = parse_or(vars, "RELAY_CHAT_MAX_HISTORY", DEFAULT_MAX_HISTORY)?;
        let max_message_len =
            parse_or(vars, "RELAY_CHAT_MAX_MESSAGE_LEN", DEFAULT_MAX_MESSAGE_LEN)?;
        let rate_limit_max = parse_or(vars, "RELAY_CHAT_RATE_LIMIT", DEFAULT_RATE_LIMIT_MAX)?;
        let rate_limit_window_ms = parse_or(
            vars,
            "RELAY_CHAT_RATE_WINDOW_MS",
            DEFAULT_RATE_LIMIT_WINDOW_MS,
        )?;
        let mailbox_capacity =
            parse_or(vars, "RELAY_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY)?;

        let listen_ip = vars
            .get("RELAY_LISTEN_IP")
            .map_or(DEFAULT_LISTEN_IP, String::as_str)
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidValue(format!("RELAY_LISTEN_IP: {e}")))?;

        let announced_ip = vars
            .get("RELAY_ANNOUNCED_IP")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let rtc_min_port = parse_or(vars, "RELAY_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_or(vars, "RELAY_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;

        let config = Config {
            max_history,
            max_message_len,
            rate_limit_max,
            rate_limit_window: Duration::from_millis(rate_limit_window_ms),
            mailbox_capacity,
            network: NetworkConfig {
                listen_ip,
                announced_ip,
                rtc_min_port,
                rtc_max_port,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the managers unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_history == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_CHAT_MAX_HISTORY must be greater than zero".to_string(),
            ));
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_CHAT_MAX_MESSAGE_LEN must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit_max == 0 || self.rate_limit_window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "rate limit cap and window must be greater than zero".to_string(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_MAILBOX_CAPACITY must be greater than zero".to_string(),
            ));
        }
        if self.network.rtc_min_port > self.network.rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "RTC port range is inverted: {}-{}",
                self.network.rtc_min_port, self.network.rtc_max_port
            )));
        }
        Ok(())
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{key}: {e}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.max_history, DEFAULT_MAX_HISTORY);
        assert_eq!(config.max_message_len, DEFAULT_MAX_MESSAGE_LEN);
        assert_eq!(config.rate_limit_max, DEFAULT_RATE_LIMIT_MAX);
        assert_eq!(config.rate_limit_window, Duration::from_secs(10));
        assert_eq!(config.mailbox_capacity, DEFAULT_MAILBOX_CAPACITY);
        assert_eq!(config.network, NetworkConfig::default());
        assert!(config.network.announced_ip.is_none());
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("RELAY_CHAT_MAX_HISTORY".to_string(), "50".to_string()),
            ("RELAY_CHAT_MAX_MESSAGE_LEN".to_string(), "500".to_string()),
            ("RELAY_CHAT_RATE_LIMIT".to_string(), "5".to_string()),
            ("RELAY_CHAT_RATE_WINDOW_MS".to_string(), "2500".to_string()),
            ("RELAY_LISTEN_IP".to_string(), "127.0.0.1".to_string()),
            ("RELAY_ANNOUNCED_IP".to_string(), "203.0.113.7".to_string()),
            ("RELAY_RTC_MIN_PORT".to_string(), "10000".to_string()),
            ("RELAY_RTC_MAX_PORT".to_string(), "10100".to_string()),
            ("RELAY_MAILBOX_CAPACITY".to_string(), "32".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.max_history, 50);
        assert_eq!(config.max_message_len, 500);
        assert_eq!(config.rate_limit_max, 5);
        assert_eq!(config.rate_limit_window, Duration::from_millis(2500));
        assert_eq!(config.mailbox_capacity, 32);
        assert_eq!(config.network.listen_ip, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.network.announced_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(config.network.rtc_min_port, 10000);
        assert_eq!(config.network.rtc_max_port, 10100);
    }

    #[test]
    fn test_blank_announced_ip_is_ignored() {
        let vars = HashMap::from([("RELAY_ANNOUNCED_IP".to_string(), "   ".to_string())]);
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.network.announced_ip.is_none());
    }

    #[test]
    fn test_unparseable_number_rejected() {
        let vars = HashMap::from([("RELAY_CHAT_MAX_HISTORY".to_string(), "lots".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.starts_with("RELAY_CHAT_MAX_HISTORY"))
        );
    }

    #[test]
    fn test_invalid_listen_ip_rejected() {
        let vars = HashMap::from([("RELAY_LISTEN_IP".to_string(), "not-an-ip".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_zero_values_rejected() {
        for key in [
            "RELAY_CHAT_MAX_HISTORY",
            "RELAY_CHAT_MAX_MESSAGE_LEN",
            "RELAY_CHAT_RATE_LIMIT",
            "RELAY_CHAT_RATE_WINDOW_MS",
            "RELAY_MAILBOX_CAPACITY",
        ] {
            let vars = HashMap::from([(key.to_string(), "0".to_string())]);
            assert!(
                Config::from_vars(&vars).is_err(),
                "{key}=0 should be rejected"
            );
        }
    }

    #[test]
    fn test_inverted_port_range_rejected() {
        let vars = HashMap::from([
            ("RELAY_RTC_MIN_PORT".to_string(), "50000".to_string()),
            ("RELAY_RTC_MAX_PORT".to_string(), "40000".to_string()),
        ]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
