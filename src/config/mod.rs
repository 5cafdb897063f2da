use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ProctorError, Result};

pub const DEFAULT_SAMPLE_RATE: f64 = 0.15;
pub const DEFAULT_FRAME_RATE: u32 = 2;
pub const DEFAULT_ROTATION_MINUTES: u64 = 5;
pub const DEFAULT_MIN_MONITORED: usize = 5;
pub const DEFAULT_MAX_MONITORED: usize = 60;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub proctoring: ProctoringConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Knobs for sampling, rotation and fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct ProctoringConfig {
    /// Fraction of active sessions to monitor, in (0, 1]
    pub sample_rate: f64,
    /// Frames per second hinted to monitored clients; not enforced server-side
    pub frame_rate: u32,
    pub rotation_interval: Duration,
    pub min_monitored: usize,
    pub max_monitored: usize,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for ProctoringConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_rate: DEFAULT_FRAME_RATE,
            rotation_interval: Duration::from_secs(DEFAULT_ROTATION_MINUTES * 60),
            min_monitored: DEFAULT_MIN_MONITORED,
            max_monitored: DEFAULT_MAX_MONITORED,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl ProctoringConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate > 0.0 && self.sample_rate <= 1.0) {
            return Err(ProctorError::InvalidConfiguration(format!(
                "sample rate must be in (0, 1], got {}",
                self.sample_rate
            )));
        }
        if self.min_monitored > self.max_monitored {
            return Err(ProctorError::InvalidConfiguration(format!(
                "min monitored ({}) exceeds max monitored ({})",
                self.min_monitored, self.max_monitored
            )));
        }
        if self.frame_rate == 0 {
            return Err(ProctorError::InvalidConfiguration(
                "frame rate must be at least 1".to_string(),
            ));
        }
        if self.rotation_interval.is_zero() {
            return Err(ProctorError::InvalidConfiguration(
                "rotation interval must be positive".to_string(),
            ));
        }
        if self.outbound_buffer == 0 {
            return Err(ProctorError::InvalidConfiguration(
                "outbound buffer must hold at least one event".to_string(),
            ));
        }
        Ok(())
    }

    /// Rotation interval in whole minutes, as advertised to observers
    pub fn rotation_minutes(&self) -> u64 {
        self.rotation_interval.as_secs() / 60
    }
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let proctoring = ProctoringConfig {
            sample_rate: parse_or(&lookup, "PROCTORING_SAMPLE_RATE", DEFAULT_SAMPLE_RATE)?,
            frame_rate: parse_or(&lookup, "PROCTORING_FRAME_RATE", DEFAULT_FRAME_RATE)?,
            rotation_interval: Duration::from_secs(
                parse_or(&lookup, "PROCTORING_ROTATION_MINUTES", DEFAULT_ROTATION_MINUTES)? * 60,
            ),
            min_monitored: parse_or(&lookup, "PROCTORING_MIN_MONITORED", DEFAULT_MIN_MONITORED)?,
            max_monitored: parse_or(&lookup, "PROCTORING_MAX_MONITORED", DEFAULT_MAX_MONITORED)?,
            outbound_buffer: parse_or(&lookup, "PROCTORING_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?,
        };
        proctoring.validate()?;

        let format = match lookup("LOG_FORMAT").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("") | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ProctorError::ConfigurationParseFailed(format!(
                    "LOG_FORMAT must be `pretty` or `json`, got `{}`",
                    other
                )))
            }
        };

        Ok(Self {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "SERVER_PORT", 5000)?,
            },
            proctoring,
            logging: LoggingConfig {
                level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                format,
            },
        })
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::UNSPECIFIED;
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::LOCALHOST,
            "" | "0.0.0.0" => Ipv4Addr::UNSPECIFIED,
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::UNSPECIFIED
            }
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|e| {
            ProctorError::ConfigurationParseFailed(format!("{}={}: {}", key, raw, e))
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with_host(host: &str, port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: host.to_string(),
                port,
            },
            proctoring: ProctoringConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.proctoring, ProctoringConfig::default());
        assert_eq!(config.proctoring.rotation_interval, Duration::from_secs(300));
        assert_eq!(config.proctoring.rotation_minutes(), 5);
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("PROCTORING_SAMPLE_RATE", "0.25"),
            ("PROCTORING_FRAME_RATE", "4"),
            ("PROCTORING_ROTATION_MINUTES", "2"),
            ("PROCTORING_MIN_MONITORED", "3"),
            ("PROCTORING_MAX_MONITORED", "10"),
            ("SERVER_PORT", "9000"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.proctoring.sample_rate, 0.25);
        assert_eq!(config.proctoring.frame_rate, 4);
        assert_eq!(config.proctoring.rotation_interval, Duration::from_secs(120));
        assert_eq!(config.proctoring.min_monitored, 3);
        assert_eq!(config.proctoring.max_monitored, 10);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("PROCTORING_SAMPLE_RATE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ProctorError::ConfigurationParseFailed(_)));
        assert!(err.to_string().contains("PROCTORING_SAMPLE_RATE"));
    }

    #[test]
    fn test_inverted_bounds_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("PROCTORING_MIN_MONITORED", "20"),
            ("PROCTORING_MAX_MONITORED", "10"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ProctorError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_sample_rate_out_of_range_is_rejected() {
        for rate in ["0", "1.5", "-0.1", "NaN"] {
            let result = Config::from_lookup(lookup_from(&[("PROCTORING_SAMPLE_RATE", rate)]));
            assert!(result.is_err(), "rate {} should be rejected", rate);
        }
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let result = Config::from_lookup(lookup_from(&[("PROCTORING_ROTATION_MINUTES", "0")]));
        assert!(matches!(result, Err(ProctorError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_parse_localhost() {
        let addr = config_with_host("localhost", 8080).bind_address();
        assert_eq!(addr, ([127, 0, 0, 1], 8080));
    }

    #[test]
    fn test_parse_ipv4_address() {
        let addr = config_with_host("192.168.1.1", 3000).bind_address();
        assert_eq!(addr, ([192, 168, 1, 1], 3000));
    }

    #[test]
    fn test_parse_empty_host() {
        let addr = config_with_host("", 8080).bind_address();
        assert_eq!(addr, ([0, 0, 0, 0], 8080));
    }

    #[test]
    fn test_parse_invalid_hostname_defaults_to_all() {
        let addr = config_with_host("invalid-hostname", 9000).bind_address();
        assert_eq!(addr, ([0, 0, 0, 0], 9000));
    }
}
