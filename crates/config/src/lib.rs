//! RidePool configuration
//!
//! A single YAML file (`poolx.yaml`) with `${VAR}` / `$VAR` environment
//! substitution. Every section is optional and falls back to the defaults in
//! [`defaults`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

/// Lobby and candidate-selection limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    #[serde(default = "default_max_distance_km")]
    pub default_max_distance_km: f64,
    #[serde(default = "default_max_passengers")]
    pub default_max_passengers: u32,
    #[serde(default = "default_max_passengers_limit")]
    pub max_passengers_limit: u32,
    #[serde(default = "default_candidate_pool_size")]
    pub candidate_pool_size: usize,
    /// `null` disables approval expiry
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: Option<u64>,
    /// Fixed seed for candidate selection; entropy when unset
    #[serde(default)]
    pub selection_seed: Option<u64>,
}

impl MatchingConfig {
    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_max_distance_km: default_max_distance_km(),
            default_max_passengers: default_max_passengers(),
            max_passengers_limit: default_max_passengers_limit(),
            candidate_pool_size: default_candidate_pool_size(),
            approval_timeout_secs: default_approval_timeout_secs(),
            selection_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteProviderKind {
    /// Great-circle legs between stops, no external service
    StraightLine,
    /// OSRM HTTP API at `routing.endpoint`
    Osrm,
}

impl RouteProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteProviderKind::StraightLine => "straight_line",
            RouteProviderKind::Osrm => "osrm",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default = "default_route_provider")]
    pub provider: RouteProviderKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_densify_step_km")]
    pub densify_step_km: f64,
    #[serde(default = "default_route_timeout_secs")]
    pub timeout_secs: u64,
}

impl RoutingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            provider: default_route_provider(),
            endpoint: None,
            densify_step_km: default_densify_step_km(),
            timeout_secs: default_route_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl NotificationConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormatKind {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormatKind,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}
