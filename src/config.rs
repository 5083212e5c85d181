use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::gate::FailurePolicy;
use crate::routes::{RouteRule, RouteTable};
use crate::store::RedisStoreConfig;
use crate::tier::TierSet;

/// Process configuration, from command-line flags or environment variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "throttle-gate", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; the in-memory store is used when absent
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Path to a JSON settings file
    #[arg(long, env = "THROTTLE_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Log level for the throttle_gate target
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> ThrottlerResult<()> {
        if let Some(url) = &self.redis_url {
            validate_redis_url(url)?;
        }
        Ok(())
    }

    /// Settings from the configured file, or defaults when none is given
    pub fn load_settings(&self) -> ThrottlerResult<Settings> {
        match &self.settings {
            Some(path) => Settings::from_file(path),
            None => Ok(Settings::default()),
        }
    }
}

pub fn validate_redis_url(url: &str) -> ThrottlerResult<()> {
    if url.is_empty() {
        return Err(ThrottlerError::Configuration(
            "Redis URL cannot be empty".to_string(),
        ));
    }

    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(ThrottlerError::Configuration(
            "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
        ));
    }

    Ok(())
}

/// Throttling settings, validated once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Default tiers, in evaluation order
    pub tiers: TierSet,
    /// Per-route tier overrides; first matching pattern wins
    pub routes: Vec<RouteRule>,
    pub failure_policy: FailurePolicy,
    /// Honour `x-forwarded-for` / `x-real-ip` when resolving addresses
    pub trust_forwarded_headers: bool,
    /// Header carrying a caller identity set by a trusted gateway
    pub identity_header: Option<String>,
    /// Downstream handlers running longer are cancelled
    #[serde(with = "humantime_serde")]
    pub handler_timeout: Option<Duration>,
    #[validate(length(min = 1, message = "key prefix cannot be empty"))]
    pub key_prefix: String,
    /// Redis history retention after the latest event of a key
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tiers: TierSet::default(),
            routes: Vec::new(),
            failure_policy: FailurePolicy::default(),
            trust_forwarded_headers: false,
            identity_header: None,
            handler_timeout: None,
            key_prefix: "throttle:".to_string(),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> ThrottlerResult<Self> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| ThrottlerError::Configuration(format!("Invalid settings: {}", e)))?;
        settings.check()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> ThrottlerResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ThrottlerError::Configuration(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    /// Field validation plus cross-field rules
    pub fn check(&self) -> ThrottlerResult<()> {
        self.validate()?;

        let longest_window = self
            .tiers
            .iter()
            .chain(self.routes.iter().flat_map(|route| route.tiers.iter()))
            .map(|tier| tier.window_seconds)
            .max()
            .unwrap_or(0);

        if self.retention.as_secs() < longest_window {
            return Err(ThrottlerError::Configuration(format!(
                "Retention of {}s is shorter than the longest tier window of {}s",
                self.retention.as_secs(),
                longest_window
            )));
        }

        if matches!(self.handler_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(ThrottlerError::Configuration(
                "Handler timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn route_table(&self) -> ThrottlerResult<RouteTable> {
        RouteTable::new(&self.routes, self.tiers.clone())
    }

    /// Request-level settings that are set but only honoured by routers
    /// wrapped with `throttled`, not by the standalone decision API.
    pub fn router_only_settings(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.handler_timeout.is_some() {
            names.push("handlerTimeout");
        }
        if self.identity_header.is_some() {
            names.push("identityHeader");
        }
        if self.trust_forwarded_headers {
            names.push("trustForwardedHeaders");
        }
        names
    }

    pub fn redis_store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            key_prefix: self.key_prefix.clone(),
            retention: self.retention,
        }
    }
}
