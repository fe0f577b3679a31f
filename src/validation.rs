/// Input validation for everything crossing the transport boundary
use tracing::warn;
use url::Url;

/// Validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field format: {field} - {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("content length too large ({observed}>{limit})")]
    PayloadTooLarge { observed: u64, limit: u64 },

    #[error("Security validation failed: {reason}")]
    SecurityViolation { reason: String },
}

/// Input validation utilities
pub struct Validator;

impl Validator {
    /// Check a declared request length against the configured limit
    pub fn validate_content_length(observed: u64, limit: u64) -> Result<(), ValidationError> {
        if observed > limit {
            return Err(ValidationError::PayloadTooLarge { observed, limit });
        }
        Ok(())
    }

    /// Validate an HTTP-RPC endpoint URL
    pub fn validate_endpoint(input: &str) -> Result<Url, ValidationError> {
        if input.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "endpoint".to_string(),
            });
        }

        if input.chars().any(char::is_control) {
            warn!("Endpoint rejected: contains control characters");
            return Err(ValidationError::SecurityViolation {
                reason: "Endpoint contains control characters".to_string(),
            });
        }

        let url = Url::parse(input).map_err(|e| ValidationError::InvalidFormat {
            field: "endpoint".to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ValidationError::InvalidFormat {
                field: "endpoint".to_string(),
                reason: format!("unsupported scheme '{}', expected http or https", other),
            }),
        }
    }

    /// Validate one CORS origin entry.
    ///
    /// Empty entries are allowed; they simply never match a request.
    pub fn validate_origin(input: &str) -> Result<(), ValidationError> {
        if input.chars().any(char::is_control) {
            return Err(ValidationError::SecurityViolation {
                reason: format!("Origin {:?} contains control characters", input),
            });
        }
        Ok(())
    }
}
