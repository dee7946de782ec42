use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by gateway adapters and the shared HTTP plumbing.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("rate limited by gateway: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("invalid notification signature: {message}")]
    InvalidSignature { message: String },

    #[error("malformed notification payload: {message}")]
    MalformedNotification { message: String },

    /// The gateway rejected the request or could not be reached after the
    /// adapter's retry budget was spent.
    #[error("gateway {rail} unavailable: {message}")]
    Unavailable {
        rail: String,
        message: String,
        gateway_code: Option<String>,
    },

    #[error("gateway configuration error: {message}")]
    ConfigError { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::NetworkError { .. }
                | GatewayError::RateLimitError { .. }
                | GatewayError::Unavailable { .. }
        )
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::ValidationError { .. } => 400,
            GatewayError::InvalidSignature { .. } => 401,
            GatewayError::MalformedNotification { .. } => 400,
            GatewayError::RateLimitError { .. } => 429,
            GatewayError::NetworkError { .. } | GatewayError::Unavailable { .. } => 502,
            GatewayError::ConfigError { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::ValidationError { message, .. } => message.clone(),
            GatewayError::InvalidSignature { .. } => "Invalid signature".to_string(),
            GatewayError::MalformedNotification { .. } => "Malformed payload".to_string(),
            GatewayError::RateLimitError { .. } => {
                "Payment gateway is busy, please retry shortly".to_string()
            }
            GatewayError::NetworkError { .. } | GatewayError::Unavailable { .. } => {
                "Payment gateway is currently unavailable".to_string()
            }
            GatewayError::ConfigError { .. } => "Internal configuration error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::NetworkError {
            message: "timeout".into()
        }
        .is_retryable());
        assert!(GatewayError::Unavailable {
            rail: "mobile_money".into(),
            message: "push rejected".into(),
            gateway_code: None,
        }
        .is_retryable());
        assert!(!GatewayError::ValidationError {
            message: "bad amount".into(),
            field: None
        }
        .is_retryable());
        assert!(!GatewayError::InvalidSignature {
            message: "mismatch".into()
        }
        .is_retryable());
    }

    #[test]
    fn status_codes_map_by_kind() {
        assert_eq!(
            GatewayError::InvalidSignature {
                message: "x".into()
            }
            .http_status_code(),
            401
        );
        assert_eq!(
            GatewayError::Unavailable {
                rail: "card".into(),
                message: "x".into(),
                gateway_code: None
            }
            .http_status_code(),
            502
        );
    }
}
