use crate::*;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Service name is required")]
    MissingServiceName,

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{field} must be a positive float")]
    InvalidPositiveFloat { field: String },

    #[error("Matching: {message}")]
    InvalidMatching { message: String },

    #[error("Routing: {message}")]
    InvalidRouting { message: String },

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &PoolConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    if config.service.name.trim().is_empty() {
        report.add_error(ValidationError::MissingServiceName);
    }

    validate_matching(&config.matching, &mut report);
    validate_routing(&config.routing, &mut report);
    validate_notifications(&config.notifications, &mut report);

    if config.metrics.enabled && config.metrics.port == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "metrics.port".to_string(),
        });
    }

    report
}

fn validate_matching(matching: &MatchingConfig, report: &mut ValidationReport) {
    if !(matching.default_max_distance_km.is_finite() && matching.default_max_distance_km > 0.0) {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "matching.default_max_distance_km".to_string(),
        });
    }

    if matching.max_passengers_limit == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.max_passengers_limit".to_string(),
        });
    }

    if matching.default_max_passengers == 0
        || matching.default_max_passengers > matching.max_passengers_limit
    {
        report.add_error(ValidationError::InvalidMatching {
            message: format!(
                "default_max_passengers must be between 1 and max_passengers_limit ({}), got: {}",
                matching.max_passengers_limit, matching.default_max_passengers
            ),
        });
    }

    if matching.candidate_pool_size == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.candidate_pool_size".to_string(),
        });
    }

    match matching.approval_timeout_secs {
        Some(0) => report.add_error(ValidationError::InvalidMatching {
            message: "approval_timeout_secs must be positive; use null to disable expiry"
                .to_string(),
        }),
        None => report.add_warning(
            "matching.approval_timeout_secs",
            "Approval expiry disabled; full lobbies wait indefinitely",
        ),
        Some(_) => {}
    }
}

fn validate_routing(routing: &RoutingConfig, report: &mut ValidationReport) {
    if !(routing.densify_step_km.is_finite() && routing.densify_step_km > 0.0) {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "routing.densify_step_km".to_string(),
        });
    }

    if routing.timeout_secs == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "routing.timeout_secs".to_string(),
        });
    }

    match (routing.provider, routing.endpoint.as_deref()) {
        (RouteProviderKind::Osrm, None) => {
            report.add_error(ValidationError::InvalidRouting {
                message: "osrm provider requires an endpoint".to_string(),
            });
        }
        (RouteProviderKind::Osrm, Some(endpoint)) => validate_endpoint(endpoint, report),
        (RouteProviderKind::StraightLine, Some(_)) => {
            report.add_warning(
                "routing.endpoint",
                "Endpoint is ignored by the straight_line provider",
            );
        }
        (RouteProviderKind::StraightLine, None) => {}
    }
}

fn validate_endpoint(endpoint: &str, report: &mut ValidationReport) {
    if has_unresolved_env_vars(endpoint) {
        report.add_error(ValidationError::InvalidEnvVar {
            var: endpoint.to_string(),
            message: "routing.endpoint references an unset variable".to_string(),
        });
        return;
    }

    match Url::parse(endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => report.add_error(ValidationError::InvalidRouting {
            message: format!("Unsupported endpoint scheme '{}'", url.scheme()),
        }),
        Err(e) => report.add_error(ValidationError::InvalidRouting {
            message: format!("Invalid endpoint '{}': {}", endpoint, e),
        }),
    }
}

fn validate_notifications(notifications: &NotificationConfig, report: &mut ValidationReport) {
    if notifications.send_timeout_ms == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "notifications.send_timeout_ms".to_string(),
        });
    }

    if notifications.channel_capacity == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "notifications.channel_capacity".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_are_valid() {
        let report = validate_config(&PoolConfig::default());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_passenger_bounds() {
        let mut cfg = PoolConfig::default();
        cfg.matching.default_max_passengers = 7;
        let report = validate_config(&cfg);
        assert_matches!(report.errors.as_slice(), [ValidationError::InvalidMatching { .. }]);

        cfg.matching.default_max_passengers = 0;
        assert!(!validate_config(&cfg).is_valid());

        cfg.matching.default_max_passengers = 6;
        assert!(validate_config(&cfg).is_valid());
    }

    #[test]
    fn test_zero_approval_timeout_rejected() {
        let mut cfg = PoolConfig::default();
        cfg.matching.approval_timeout_secs = Some(0);
        assert!(!validate_config(&cfg).is_valid());

        cfg.matching.approval_timeout_secs = None;
        let report = validate_config(&cfg);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_non_positive_values() {
        let mut cfg = PoolConfig::default();
        cfg.matching.default_max_distance_km = 0.0;
        cfg.matching.candidate_pool_size = 0;
        cfg.routing.densify_step_km = f64::NAN;
        cfg.notifications.send_timeout_ms = 0;
        let report = validate_config(&cfg);
        assert_eq!(report.errors.len(), 4);
    }

    #[test]
    fn test_osrm_requires_endpoint() {
        let mut cfg = PoolConfig::default();
        cfg.routing.provider = RouteProviderKind::Osrm;
        assert_matches!(
            validate_config(&cfg).errors.as_slice(),
            [ValidationError::InvalidRouting { .. }]
        );

        cfg.routing.endpoint = Some("not a url".to_string());
        assert!(!validate_config(&cfg).is_valid());

        cfg.routing.endpoint = Some("${RIDEPOOL_TEST_UNSET_OSRM}".to_string());
        assert_matches!(
            validate_config(&cfg).errors.as_slice(),
            [ValidationError::InvalidEnvVar { .. }]
        );

        cfg.routing.endpoint = Some("http://localhost:5000".to_string());
        assert!(validate_config(&cfg).is_valid());
    }
}
