use std::net::SocketAddr;

use crate::config::models::{GatewayConfig, RateLimitClassConfig, RouteConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator.
///
/// Collects every problem found and reports them together, so an operator
/// fixes a broken config in one pass instead of one error per restart. Any
/// error is fatal at startup.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.server.listen_addr) {
            errors.push(e);
        }
        if let Err(e) =
            Self::validate_duration("server.upstream_timeout", &config.server.upstream_timeout)
        {
            errors.push(e);
        }
        if let Err(e) = Self::validate_duration(
            "server.health_export_interval",
            &config.server.health_export_interval,
        ) {
            errors.push(e);
        }

        if config.routes.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routes".to_string(),
            });
        } else {
            for route in &config.routes {
                errors.extend(Self::validate_route(route));
            }
            errors.extend(Self::check_prefix_conflicts(&config.routes));
        }

        errors.extend(Self::validate_breaker(config));
        errors.extend(Self::validate_tokens(config));
        errors.extend(Self::validate_rate_limits(config));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8080' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_duration(field: &str, value: &str) -> ValidationResult<()> {
        match humantime::parse_duration(value) {
            Ok(d) if !d.is_zero() => Ok(()),
            Ok(_) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: "Duration must be greater than zero".to_string(),
            }),
            Err(e) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Invalid duration '{value}': {e}"),
            }),
        }
    }

    fn validate_route(route: &RouteConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !route.prefix.starts_with('/') || (route.prefix.len() > 1 && route.prefix.ends_with('/'))
        {
            errors.push(ValidationError::InvalidField {
                field: format!("route prefix: {}", route.prefix),
                message: "Route prefixes must start with '/' and not end with one".to_string(),
            });
        }

        if route.service.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("route '{}' service", route.prefix),
            });
        }

        if !route.backend_url.starts_with("http://") && !route.backend_url.starts_with("https://") {
            errors.push(ValidationError::InvalidField {
                field: format!("route '{}' backend_url", route.prefix),
                message: format!(
                    "Backend URL must start with http:// or https://, got: {}",
                    route.backend_url
                ),
            });
        }

        for entry in &route.path_map {
            if !entry.from.starts_with('/') || !entry.to.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("route '{}' path_map", route.prefix),
                    message: format!(
                        "Path map entries must start with '/': {} -> {}",
                        entry.from, entry.to
                    ),
                });
            }
        }

        errors
    }

    fn check_prefix_conflicts(routes: &[RouteConfig]) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (i, a) in routes.iter().enumerate() {
            for b in routes.iter().skip(i + 1) {
                if a.prefix == b.prefix {
                    errors.push(ValidationError::RouteConflict {
                        message: format!(
                            "Prefix '{}' is mapped to both '{}' and '{}'",
                            a.prefix, a.service, b.service
                        ),
                    });
                }
            }
        }
        errors
    }

    fn validate_breaker(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let breaker = &config.breaker;

        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: "breaker.failure_threshold".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if breaker.reset_timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "breaker.reset_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if breaker.monitoring_period_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "breaker.monitoring_period_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if breaker.half_open_success_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: "breaker.half_open_success_threshold".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        errors
    }

    fn validate_tokens(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let tokens = &config.tokens;

        if tokens.access_secret.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "tokens.access_secret (or JWT_SECRET)".to_string(),
            });
        }
        if tokens.refresh_secret.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "tokens.refresh_secret (or JWT_REFRESH_SECRET)".to_string(),
            });
        }
        if !tokens.access_secret.trim().is_empty()
            && tokens.access_secret == tokens.refresh_secret
        {
            errors.push(ValidationError::InvalidField {
                field: "tokens.refresh_secret".to_string(),
                message: "Access and refresh token secrets must differ".to_string(),
            });
        }
        if let Err(e) = Self::validate_duration("tokens.access_expiry", &tokens.access_expiry) {
            errors.push(e);
        }
        if let Err(e) = Self::validate_duration("tokens.refresh_expiry", &tokens.refresh_expiry) {
            errors.push(e);
        }
        if tokens.issuer.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "tokens.issuer".to_string(),
            });
        }

        errors
    }

    fn validate_rate_limits(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let limits = &config.rate_limits;

        errors.extend(Self::validate_limit_class("rate_limits.general", &limits.general));
        errors.extend(Self::validate_limit_class(
            "rate_limits.sensitive",
            &limits.sensitive,
        ));

        if let Some(url) = &limits.store_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                errors.push(ValidationError::InvalidField {
                    field: "rate_limits.store_url".to_string(),
                    message: format!("Must be a redis:// or rediss:// URL, got: {url}"),
                });
            }
        }
        if limits.store_timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limits.store_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        errors
    }

    fn validate_limit_class(field: &str, class: &RateLimitClassConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(e) = Self::validate_duration(&format!("{field}.window"), &class.window) {
            errors.push(e);
        }
        if class.max == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("{field}.max"),
                message: "Must be greater than 0".to_string(),
            });
        }
        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let lines: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
        format!("{} error(s) found:\n{}", lines.len(), lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{GatewayConfig, PathMapEntry, RouteConfig};

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.tokens.access_secret = "access-secret".to_string();
        config.tokens.refresh_secret = "refresh-secret".to_string();
        config.routes = vec![RouteConfig {
            prefix: "/api/jobs".to_string(),
            service: "job-service".to_string(),
            backend_url: "http://localhost:5003/api/jobs".to_string(),
            requires_auth: true,
            path_map: Vec::new(),
        }];
        config
    }

    #[test]
    fn accepts_a_valid_config() {
        assert!(GatewayConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn rejects_missing_secrets() {
        let mut config = valid_config();
        config.tokens.access_secret = String::new();
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn rejects_equal_secrets() {
        let mut config = valid_config();
        config.tokens.refresh_secret = config.tokens.access_secret.clone();
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn rejects_empty_routes() {
        let mut config = valid_config();
        config.routes.clear();
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("routes"));
    }

    #[test]
    fn rejects_malformed_backend_url_and_prefix() {
        let mut config = valid_config();
        config.routes.push(RouteConfig {
            prefix: "api/auth".to_string(),
            service: "auth-service".to_string(),
            backend_url: "localhost:5001".to_string(),
            requires_auth: false,
            path_map: vec![PathMapEntry {
                from: "methods".to_string(),
                to: "/payment-methods".to_string(),
            }],
        });
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("backend_url"));
        assert!(message.contains("prefix"));
        assert!(message.contains("path_map"));
    }

    #[test]
    fn rejects_duplicate_prefixes() {
        let mut config = valid_config();
        let mut duplicate = config.routes[0].clone();
        duplicate.service = "other-service".to_string();
        config.routes.push(duplicate);
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("mapped to both"));
    }

    #[test]
    fn rejects_zero_thresholds_and_windows() {
        let mut config = valid_config();
        config.breaker.failure_threshold = 0;
        config.breaker.reset_timeout_ms = 0;
        config.rate_limits.general.max = 0;
        config.rate_limits.sensitive.window = "not a duration".to_string();

        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("failure_threshold"));
        assert!(message.contains("reset_timeout_ms"));
        assert!(message.contains("rate_limits.general.max"));
        assert!(message.contains("rate_limits.sensitive.window"));
    }

    #[test]
    fn reports_all_errors_at_once() {
        let mut config = valid_config();
        config.server.listen_addr = "not-an-address".to_string();
        config.tokens.access_secret = String::new();
        config.breaker.failure_threshold = 0;

        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("3 error(s)"));
    }

    #[test]
    fn rejects_non_redis_store_url() {
        let mut config = valid_config();
        config.rate_limits.store_url = Some("http://localhost:6379".to_string());
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("store_url"));
    }
}
