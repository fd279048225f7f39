use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::clinical::engine::ConditionThresholds;
use crate::clinical::rulepack::CoverageThresholds;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: EngineConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Rule-pack storage, caching, and calibration tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rule_pack_root: PathBuf,
    pub primary_dir: String,
    pub community_dir: String,
    pub cache_ttl: Duration,
    /// Upper bound on a single resolution when called from the async service path.
    pub resolve_timeout: Duration,
    pub coverage: CoverageThresholds,
    pub conditions: ConditionThresholds,
    pub calibration_alpha: f64,
    pub calibration_half_life_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rule_pack_root: PathBuf::from("./rule-packs"),
            primary_dir: "curated".to_string(),
            community_dir: "community".to_string(),
            cache_ttl: Duration::from_secs(300),
            resolve_timeout: Duration::from_millis(2000),
            coverage: CoverageThresholds::default(),
            conditions: ConditionThresholds::default(),
            calibration_alpha: 0.1,
            calibration_half_life_days: 90,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let rule_pack_root = env::var("RULE_PACK_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.rule_pack_root);
        let primary_dir = env::var("RULE_PACK_PRIMARY_DIR").unwrap_or(defaults.primary_dir);
        let community_dir =
            env::var("RULE_PACK_COMMUNITY_DIR").unwrap_or(defaults.community_dir);

        let cache_ttl = Duration::from_secs(parse_var("RULE_CACHE_TTL_SECS", 300u64)?);
        let resolve_timeout =
            Duration::from_millis(parse_var("RULE_RESOLVE_TIMEOUT_MS", 2000u64)?);

        let coverage = match env::var("RULE_COVERAGE_THRESHOLDS") {
            Ok(raw) => parse_coverage_thresholds(&raw)?,
            Err(_) => defaults.coverage,
        };

        let calibration_alpha = parse_var("CALIBRATION_ALPHA", defaults.calibration_alpha)?;
        if !calibration_alpha.is_finite() || calibration_alpha <= 0.0 {
            return Err(ConfigError::InvalidNumber {
                var: "CALIBRATION_ALPHA",
                value: calibration_alpha.to_string(),
            });
        }
        let calibration_half_life_days =
            parse_var("CALIBRATION_HALF_LIFE_DAYS", defaults.calibration_half_life_days)?;

        Ok(Self {
            rule_pack_root,
            primary_dir,
            community_dir,
            cache_ttl,
            resolve_timeout,
            coverage,
            conditions: defaults.conditions,
            calibration_alpha,
            calibration_half_life_days,
        })
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Parses `full,partial,minimal` rule-count thresholds, e.g. `20,10,5`.
fn parse_coverage_thresholds(raw: &str) -> Result<CoverageThresholds, ConfigError> {
    let parts = raw
        .split(',')
        .map(|part| part.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigError::InvalidCoverageThresholds(raw.to_string()))?;

    match parts.as_slice() {
        [full, partial, minimal] if full >= partial && partial >= minimal && *minimal > 0 => {
            Ok(CoverageThresholds {
                full: *full,
                partial: *partial,
                minimal: *minimal,
            })
        }
        _ => Err(ConfigError::InvalidCoverageThresholds(raw.to_string())),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var: &'static str, value: String },
    InvalidCoverageThresholds(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} has an invalid value '{value}'")
            }
            ConfigError::InvalidCoverageThresholds(value) => write!(
                f,
                "RULE_COVERAGE_THRESHOLDS must be three descending counts (full,partial,minimal), got '{value}'"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidCoverageThresholds(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for var in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "RULE_PACK_ROOT",
            "RULE_PACK_PRIMARY_DIR",
            "RULE_PACK_COMMUNITY_DIR",
            "RULE_CACHE_TTL_SECS",
            "RULE_RESOLVE_TIMEOUT_MS",
            "RULE_COVERAGE_THRESHOLDS",
            "CALIBRATION_ALPHA",
            "CALIBRATION_HALF_LIFE_DAYS",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.engine.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.engine.coverage, CoverageThresholds::default());
        assert_eq!(config.engine.primary_dir, "curated");
        assert!((config.engine.calibration_alpha - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn reads_engine_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RULE_CACHE_TTL_SECS", "30");
        env::set_var("RULE_COVERAGE_THRESHOLDS", "12, 6, 3");
        env::set_var("RULE_PACK_COMMUNITY_DIR", "derived");
        let config = EngineConfig::from_env().expect("engine config loads");
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert_eq!(
            config.coverage,
            CoverageThresholds {
                full: 12,
                partial: 6,
                minimal: 3
            }
        );
        assert_eq!(config.community_dir, "derived");
        reset_env();
    }

    #[test]
    fn rejects_unordered_coverage_thresholds() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RULE_COVERAGE_THRESHOLDS", "5,10,20");
        match EngineConfig::from_env() {
            Err(ConfigError::InvalidCoverageThresholds(value)) => assert_eq!(value, "5,10,20"),
            other => panic!("expected invalid thresholds, got {other:?}"),
        }
        reset_env();
    }

    #[test]
    fn rejects_non_numeric_ttl() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RULE_CACHE_TTL_SECS", "five minutes");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::InvalidNumber {
                var: "RULE_CACHE_TTL_SECS",
                ..
            })
        ));
        reset_env();
    }
}
