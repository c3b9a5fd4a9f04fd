use crate::config::models::{BalancingClientConfig, ClientConfig, DiscoveryConfig, ServiceConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Client configuration validator
pub struct ClientConfigValidator;

impl ClientConfigValidator {
    /// Validate the entire client configuration
    pub fn validate(config: &ClientConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let needs_discovery = config.services.values().any(|service| !service.is_static());
        match &config.discovery {
            Some(discovery) => {
                if let Err(mut discovery_errors) = Self::validate_discovery(discovery) {
                    errors.append(&mut discovery_errors);
                }
            }
            None if needs_discovery => errors.push(ValidationError::MissingField {
                field: "discovery".to_string(),
            }),
            None => {}
        }

        if let Err(mut client_errors) = Self::validate_http_client(&config.http_client) {
            errors.append(&mut client_errors);
        }

        for (service_type, service) in &config.services {
            if let Err(mut service_errors) = Self::validate_service(service_type, service) {
                errors.append(&mut service_errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_discovery(config: &DiscoveryConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_url(&config.uri, "discovery.uri") {
            errors.push(e);
        }
        if config.environment.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "discovery.environment".to_string(),
            });
        }
        if config.pool.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "discovery.pool".to_string(),
                message: "Pool name must not be empty".to_string(),
            });
        }
        if config.poll_interval.is_zero() {
            errors.push(ValidationError::InvalidField {
                field: "discovery.poll_interval".to_string(),
                message: "Poll interval must be greater than 0".to_string(),
            });
        }
        if config.request_timeout.is_zero() {
            errors.push(ValidationError::InvalidField {
                field: "discovery.request_timeout".to_string(),
                message: "Request timeout must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_http_client(config: &BalancingClientConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.min_backoff > config.max_backoff {
            errors.push(ValidationError::InvalidField {
                field: "http_client.min_backoff".to_string(),
                message: format!(
                    "min_backoff ({:?}) must not exceed max_backoff ({:?})",
                    config.min_backoff, config.max_backoff
                ),
            });
        }
        if config.request_timeout.is_zero() {
            errors.push(ValidationError::InvalidField {
                field: "http_client.request_timeout".to_string(),
                message: "Request timeout must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_service(service_type: &str, config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if service_type.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "services".to_string(),
                message: "Service type must not be empty".to_string(),
            });
        }
        if config.pool.as_deref().is_some_and(|pool| pool.trim().is_empty()) {
            errors.push(ValidationError::InvalidField {
                field: format!("services.{service_type}.pool"),
                message: "Pool name must not be empty".to_string(),
            });
        }
        if let Some(uris) = &config.uris {
            if uris.is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: format!("services.{service_type}.uris"),
                    message: "Static services must list at least one URI".to_string(),
                });
            }
            for (i, uri) in uris.iter().enumerate() {
                if let Err(e) =
                    Self::validate_url(uri, &format!("services.{service_type}.uris[{i}]"))
                {
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
