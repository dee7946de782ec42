//! Comprehensive error handling for the Mindwell backend
//!
//! This module provides a unified error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::error::DatabaseError;
use crate::gateways::error::GatewayError;
use crate::services::donation_orchestrator::DonationError;
use crate::services::reconciliation::ReconciliationError;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "DONATION_NOT_FOUND")]
    DonationNotFound,
    #[serde(rename = "DONOR_NOT_FOUND")]
    DonorNotFound,
    #[serde(rename = "PROVIDER_NOT_FOUND")]
    ProviderNotFound,
    #[serde(rename = "DONATION_NOT_PENDING")]
    DonationNotPending,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Security
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Donation with the given ID doesn't exist or belongs to someone else
    DonationNotFound { donation_id: String },
    /// Donor doesn't exist in the system
    DonorNotFound,
    /// Wellness provider doesn't exist in the system
    ProviderNotFound,
    /// The donation already reached a terminal state
    DonationNotPending { donation_id: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment gateways)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Card or mobile-money gateway error
    PaymentGateway {
        rail: String,
        message: String,
        is_retryable: bool,
    },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Field value failed validation
    InvalidField { field: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Webhook signature verification failed
    InvalidSignature,
    /// Missing or malformed caller identity
    Unauthorized,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn unauthorized() -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::Unauthorized))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DonationNotFound { .. } => 404,
                DomainError::DonorNotFound => 404,
                DomainError::ProviderNotFound => 404,
                DomainError::DonationNotPending { .. } => 409, // Conflict
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502, // Bad Gateway
                ExternalError::RateLimit { .. } => 429,      // Too Many Requests
                ExternalError::Timeout { .. } => 504,        // Gateway Timeout
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { .. } => 400,
                ValidationError::MissingField { .. } => 400,
                ValidationError::InvalidSignature => 401,
                ValidationError::Unauthorized => 401,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DonationNotFound { .. } => ErrorCode::DonationNotFound,
                DomainError::DonorNotFound => ErrorCode::DonorNotFound,
                DomainError::ProviderNotFound => ErrorCode::ProviderNotFound,
                DomainError::DonationNotPending { .. } => ErrorCode::DonationNotPending,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidSignature => ErrorCode::InvalidSignature,
                ValidationError::Unauthorized => ErrorCode::Unauthorized,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DonationNotFound { donation_id } => {
                    format!("Donation '{}' not found", donation_id)
                }
                DomainError::DonorNotFound => "Donor account not found".to_string(),
                DomainError::ProviderNotFound => "Wellness provider not found".to_string(),
                DomainError::DonationNotPending { donation_id } => {
                    format!(
                        "Donation '{}' has already been finalized and can no longer change",
                        donation_id
                    )
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway {
                    rail, is_retryable, ..
                } => {
                    if *is_retryable {
                        format!(
                            "The {} payment service is temporarily unavailable. Please try again",
                            rail
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidSignature => "Invalid signature".to_string(),
                ValidationError::Unauthorized => "Authentication required".to_string(),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let kind = match &err {
            GatewayError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                })
            }
            GatewayError::InvalidSignature { .. } => {
                AppErrorKind::Validation(ValidationError::InvalidSignature)
            }
            GatewayError::RateLimitError { .. } => AppErrorKind::External(ExternalError::RateLimit {
                service: "payment gateway".to_string(),
                retry_after: None,
            }),
            GatewayError::ConfigError { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: message.clone(),
                })
            }
            other => AppErrorKind::External(ExternalError::PaymentGateway {
                rail: "payment".to_string(),
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

impl From<DonationError> for AppError {
    fn from(err: DonationError) -> Self {
        let kind = match err {
            DonationError::Validation { field, message } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            DonationError::NotFound { entity: "donor" } => AppErrorKind::Domain(DomainError::DonorNotFound),
            DonationError::NotFound {
                entity: "wellness provider",
            } => AppErrorKind::Domain(DomainError::ProviderNotFound),
            DonationError::NotFound { .. } => AppErrorKind::Domain(DomainError::DonationNotFound {
                donation_id: "unknown".to_string(),
            }),
            DonationError::NotPending => AppErrorKind::Domain(DomainError::DonationNotPending {
                donation_id: "unknown".to_string(),
            }),
            DonationError::GatewayUnavailable(message) => {
                AppErrorKind::External(ExternalError::PaymentGateway {
                    rail: "payment".to_string(),
                    message,
                    is_retryable: true,
                })
            }
            DonationError::Database(db) => return AppError::from(db),
        };
        AppError::new(kind)
    }
}

impl From<ReconciliationError> for AppError {
    fn from(err: ReconciliationError) -> Self {
        let kind = match err {
            ReconciliationError::InvalidSignature => {
                AppErrorKind::Validation(ValidationError::InvalidSignature)
            }
            ReconciliationError::UnknownRail(rail) => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "rail".to_string(),
                    reason: format!("unknown payment rail '{}'", rail),
                })
            }
            ReconciliationError::MalformedPayload(message) => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "payload".to_string(),
                    reason: message,
                })
            }
            ReconciliationError::DonationNotFound(reference) => {
                AppErrorKind::Domain(DomainError::DonationNotFound {
                    donation_id: reference,
                })
            }
            ReconciliationError::DatabaseError(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: false,
                })
            }
        };
        AppError::new(kind)
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
