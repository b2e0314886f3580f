use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use chrono::Duration;

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

    pub const fn is_test(self) -> bool {
        matches!(self, Self::Test)
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub policy: ReviewPolicy,
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

        let defaults = ReviewPolicy::default();
        let policy = ReviewPolicy {
            audit_dedup_window: Duration::seconds(env_number(
                "AUDIT_DEDUP_WINDOW_SECS",
                defaults.audit_dedup_window.num_seconds(),
            )?),
            timeline_bucket: Duration::seconds(env_number(
                "TIMELINE_BUCKET_SECS",
                defaults.timeline_bucket.num_seconds(),
            )?),
            timeline_tie_break: Duration::seconds(env_number(
                "TIMELINE_TIE_BREAK_SECS",
                defaults.timeline_tie_break.num_seconds(),
            )?),
            max_certification_requests: env_number(
                "MAX_CERTIFICATION_REQUESTS",
                defaults.max_certification_requests,
            )?,
            max_proof_rejections: env_number("MAX_PROOF_REJECTIONS", defaults.max_proof_rejections)?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            policy: policy.sanitized(),
        })
    }
}

fn env_number<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
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

const DEFAULT_DEDUP_WINDOW_SECS: i64 = 5;
const DEFAULT_TIMELINE_BUCKET_SECS: i64 = 60;
const DEFAULT_TIMELINE_TIE_BREAK_SECS: i64 = 30;
const DEFAULT_MAX_CERTIFICATION_REQUESTS: u32 = 10;
const DEFAULT_MAX_PROOF_REJECTIONS: u32 = 8;

/// Tunables for the review pipeline: dedup windows and per-application retry limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewPolicy {
    pub audit_dedup_window: Duration,
    pub timeline_bucket: Duration,
    pub timeline_tie_break: Duration,
    pub max_certification_requests: u32,
    pub max_proof_rejections: u32,
}

impl ReviewPolicy {
    /// Replace non-positive durations and zero limits with the defaults.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            audit_dedup_window: if self.audit_dedup_window < Duration::zero() {
                defaults.audit_dedup_window
            } else {
                self.audit_dedup_window
            },
            timeline_bucket: if self.timeline_bucket <= Duration::zero() {
                defaults.timeline_bucket
            } else {
                self.timeline_bucket
            },
            timeline_tie_break: if self.timeline_tie_break < Duration::zero() {
                defaults.timeline_tie_break
            } else {
                self.timeline_tie_break
            },
            max_certification_requests: if self.max_certification_requests == 0 {
                defaults.max_certification_requests
            } else {
                self.max_certification_requests
            },
            max_proof_rejections: if self.max_proof_rejections == 0 {
                defaults.max_proof_rejections
            } else {
                self.max_proof_rejections
            },
        }
    }
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            audit_dedup_window: Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS),
            timeline_bucket: Duration::seconds(DEFAULT_TIMELINE_BUCKET_SECS),
            timeline_tie_break: Duration::seconds(DEFAULT_TIMELINE_TIE_BREAK_SECS),
            max_certification_requests: DEFAULT_MAX_CERTIFICATION_REQUESTS,
            max_proof_rejections: DEFAULT_MAX_PROOF_REJECTIONS,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
