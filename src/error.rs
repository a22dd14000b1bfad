use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured error type for campus session operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampusError {
    /// Error code for programmatic handling
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional context for additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Severity level
    pub severity: ErrorSeverity,
    /// Error category used to decide how callers react
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
}

impl CampusError {
    /// Create a new error builder with the specified error code
    pub fn new(code: ErrorCode) -> CampusErrorBuilder {
        CampusErrorBuilder {
            code,
            message: String::new(),
            context: None,
            severity: ErrorSeverity::Error,
            category: None,
        }
    }

    /// Whether the caller can reasonably continue after this error
    pub fn is_recoverable(&self) -> bool {
        self.category.map_or(false, |c| c.is_recoverable())
    }
}

/// Builder for creating CampusError instances
pub struct CampusErrorBuilder {
    code: ErrorCode,
    message: String,
    context: Option<String>,
    severity: ErrorSeverity,
    category: Option<ErrorCategory>,
}

impl CampusErrorBuilder {
    /// Set the error message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the error context
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set the error severity
    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the error category
    pub fn category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Build the final CampusError
    pub fn build(self) -> CampusError {
        CampusError {
            code: self.code,
            message: self.message,
            context: self.context,
            severity: self.severity,
            category: self.category,
        }
    }
}

/// Error codes for different types of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // General errors
    Unknown,
    Internal,

    // Identity provider errors
    ProviderRejected,
    ProviderUnavailable,

    // Backend session errors
    BackendExchangeFailed,
    ProfileLookupFailed,
    ProfileCreateFailed,

    // Campus API errors
    ApiRequestFailed,
    ApiPermissionDenied,
    NotFound,

    // Session errors
    NotSignedIn,
    AlreadySubscribed,
    Superseded,

    // Token storage errors
    StorageFailed,

    // Configuration related errors
    ConfigInvalid,
    ConfigMissing,

    // Rejected before any request was made
    InvalidInput,
}

/// Detailed error variants using thiserror
#[derive(Error, Debug, Clone)]
pub enum CampusErrorType {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Identity provider rejected {operation}: {reason}")]
    ProviderRejected { operation: String, reason: String },

    #[error("Identity provider unreachable during {operation}: {reason}")]
    ProviderUnavailable { operation: String, reason: String },

    #[error("Failed to exchange identity credential for a session token: {reason}")]
    BackendExchangeFailed { reason: String },

    #[error("Failed to look up profile for '{email}': {reason}")]
    ProfileLookupFailed { email: String, reason: String },

    #[error("Failed to create profile for '{email}': {reason}")]
    ProfileCreateFailed { email: String, reason: String },

    #[error("{method} {url} failed with status {status}: {body}")]
    ApiRequestFailed {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Permission denied: {action} requires role '{required}'")]
    ApiPermissionDenied { action: String, required: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("No signed-in identity for {action}")]
    NotSignedIn { action: String },

    #[error("Identity observer is already subscribed")]
    AlreadySubscribed,

    #[error("{operation} was superseded by a later session change")]
    Superseded { operation: String },

    #[error("Token storage failed: {reason}")]
    StorageFailed { reason: String },

    #[error("Invalid configuration value for '{key}': {reason}")]
    ConfigInvalid { key: String, reason: String },

    #[error("Required configuration key '{key}' is missing")]
    ConfigMissing { key: String },
}

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Informational messages that don't impact functionality
    Info,
    /// Warnings that might impact functionality but don't stop operation
    Warning,
    /// Errors that impact functionality but allow continued operation
    Error,
    /// Critical errors that prevent the session from functioning properly
    Critical,
}

/// Error categories for caller handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport failures, unreachable services
    Network,
    /// Credentials rejected by the identity provider or backend
    Authentication,
    /// Role does not permit the action
    Permission,
    /// Configuration errors - not recoverable without reconfiguration
    Configuration,
    /// Persisted token slot could not be read or written
    Storage,
    /// Resource not found
    NotFound,
    /// Input rejected before any request was made
    Validation,
    /// Internal errors in our code
    Internal,
}

impl ErrorCategory {
    /// Returns true if the session can continue after errors in this category
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network | Self::Authentication | Self::NotFound | Self::Validation => true,
            Self::Permission | Self::Configuration | Self::Storage | Self::Internal => false,
        }
    }
}

impl fmt::Display for CampusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "{}: {} ({})", self.code, self.message, context)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::ProviderRejected => "PROVIDER_REJECTED",
            ErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorCode::BackendExchangeFailed => "BACKEND_EXCHANGE_FAILED",
            ErrorCode::ProfileLookupFailed => "PROFILE_LOOKUP_FAILED",
            ErrorCode::ProfileCreateFailed => "PROFILE_CREATE_FAILED",
            ErrorCode::ApiRequestFailed => "API_REQUEST_FAILED",
            ErrorCode::ApiPermissionDenied => "API_PERMISSION_DENIED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotSignedIn => "NOT_SIGNED_IN",
            ErrorCode::AlreadySubscribed => "ALREADY_SUBSCRIBED",
            ErrorCode::Superseded => "SUPERSEDED",
            ErrorCode::StorageFailed => "STORAGE_FAILED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::ConfigMissing => "CONFIG_MISSING",
            ErrorCode::InvalidInput => "INVALID_INPUT",
        };
        f.write_str(name)
    }
}

impl std::error::Error for CampusError {}

impl From<CampusErrorType> for CampusError {
    fn from(err: CampusErrorType) -> Self {
        let message = err.to_string();
        let (code, category, severity) = match &err {
            CampusErrorType::Internal(_) => {
                (ErrorCode::Internal, ErrorCategory::Internal, ErrorSeverity::Error)
            }
            CampusErrorType::ProviderRejected { .. } => (
                ErrorCode::ProviderRejected,
                ErrorCategory::Authentication,
                ErrorSeverity::Warning,
            ),
            CampusErrorType::ProviderUnavailable { .. } => (
                ErrorCode::ProviderUnavailable,
                ErrorCategory::Network,
                ErrorSeverity::Error,
            ),
            CampusErrorType::BackendExchangeFailed { .. } => (
                ErrorCode::BackendExchangeFailed,
                ErrorCategory::Network,
                ErrorSeverity::Warning,
            ),
            CampusErrorType::ProfileLookupFailed { .. } => (
                ErrorCode::ProfileLookupFailed,
                ErrorCategory::Network,
                ErrorSeverity::Warning,
            ),
            CampusErrorType::ProfileCreateFailed { .. } => (
                ErrorCode::ProfileCreateFailed,
                ErrorCategory::Network,
                ErrorSeverity::Warning,
            ),
            CampusErrorType::ApiRequestFailed { .. } => (
                ErrorCode::ApiRequestFailed,
                ErrorCategory::Network,
                ErrorSeverity::Error,
            ),
            CampusErrorType::ApiPermissionDenied { .. } => (
                ErrorCode::ApiPermissionDenied,
                ErrorCategory::Permission,
                ErrorSeverity::Warning,
            ),
            CampusErrorType::NotFound { .. } => {
                (ErrorCode::NotFound, ErrorCategory::NotFound, ErrorSeverity::Info)
            }
            CampusErrorType::NotSignedIn { .. } => (
                ErrorCode::NotSignedIn,
                ErrorCategory::Authentication,
                ErrorSeverity::Warning,
            ),
            CampusErrorType::AlreadySubscribed => (
                ErrorCode::AlreadySubscribed,
                ErrorCategory::Internal,
                ErrorSeverity::Error,
            ),
            CampusErrorType::Superseded { .. } => (
                ErrorCode::Superseded,
                ErrorCategory::Authentication,
                ErrorSeverity::Info,
            ),
            CampusErrorType::StorageFailed { .. } => (
                ErrorCode::StorageFailed,
                ErrorCategory::Storage,
                ErrorSeverity::Error,
            ),
            CampusErrorType::ConfigInvalid { .. } => (
                ErrorCode::ConfigInvalid,
                ErrorCategory::Configuration,
                ErrorSeverity::Critical,
            ),
            CampusErrorType::ConfigMissing { .. } => (
                ErrorCode::ConfigMissing,
                ErrorCategory::Configuration,
                ErrorSeverity::Critical,
            ),
        };

        CampusError::new(code)
            .message(message)
            .category(category)
            .severity(severity)
            .build()
    }
}

impl From<anyhow::Error> for CampusError {
    fn from(err: anyhow::Error) -> Self {
        // A CampusError wrapped in anyhow keeps its code
        match err.downcast::<CampusError>() {
            Ok(campus) => campus,
            Err(err) => CampusError::new(ErrorCode::Internal)
                .message(format!("{:#}", err))
                .category(ErrorCategory::Internal)
                .build(),
        }
    }
}

impl From<reqwest::Error> for CampusError {
    fn from(err: reqwest::Error) -> Self {
        CampusError::new(ErrorCode::ApiRequestFailed)
            .message("HTTP transport failure")
            .context(err.to_string())
            .category(ErrorCategory::Network)
            .build()
    }
}

impl From<serde_json::Error> for CampusError {
    fn from(err: serde_json::Error) -> Self {
        CampusError::new(ErrorCode::ApiRequestFailed)
            .message("Malformed JSON payload")
            .context(err.to_string())
            .category(ErrorCategory::Validation)
            .build()
    }
}

impl From<std::io::Error> for CampusError {
    fn from(err: std::io::Error) -> Self {
        CampusError::new(ErrorCode::StorageFailed)
            .message("I/O failure")
            .context(err.to_string())
            .category(ErrorCategory::Storage)
            .build()
    }
}

/// Result type for campus session operations
pub type CampusResult<T> = Result<T, CampusError>;

/// Helpers producing the detailed variants
pub mod errors {
    use super::*;

    /// Provider refused the credentials or request
    pub fn provider_rejected(operation: impl Into<String>, reason: impl fmt::Display) -> CampusError {
        CampusErrorType::ProviderRejected {
            operation: operation.into(),
            reason: reason.to_string(),
        }
        .into()
    }

    /// Provider could not be reached
    pub fn provider_unavailable(
        operation: impl Into<String>,
        reason: impl fmt::Display,
    ) -> CampusError {
        CampusErrorType::ProviderUnavailable {
            operation: operation.into(),
            reason: reason.to_string(),
        }
        .into()
    }

    pub fn backend_exchange_failed(reason: impl fmt::Display) -> CampusError {
        CampusErrorType::BackendExchangeFailed {
            reason: reason.to_string(),
        }
        .into()
    }

    pub fn profile_lookup_failed(email: impl Into<String>, reason: impl fmt::Display) -> CampusError {
        CampusErrorType::ProfileLookupFailed {
            email: email.into(),
            reason: reason.to_string(),
        }
        .into()
    }

    pub fn profile_create_failed(email: impl Into<String>, reason: impl fmt::Display) -> CampusError {
        CampusErrorType::ProfileCreateFailed {
            email: email.into(),
            reason: reason.to_string(),
        }
        .into()
    }

    /// Non-2xx response from a REST endpoint
    pub fn api_request_failed(
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> CampusError {
        CampusErrorType::ApiRequestFailed {
            method: method.into(),
            url: url.into(),
            status,
            body: body.into(),
        }
        .into()
    }

    pub fn permission_denied(action: impl Into<String>, required: impl Into<String>) -> CampusError {
        CampusErrorType::ApiPermissionDenied {
            action: action.into(),
            required: required.into(),
        }
        .into()
    }

    pub fn not_found(resource: impl Into<String>) -> CampusError {
        CampusErrorType::NotFound {
            resource: resource.into(),
        }
        .into()
    }

    pub fn not_signed_in(action: impl Into<String>) -> CampusError {
        CampusErrorType::NotSignedIn {
            action: action.into(),
        }
        .into()
    }

    pub fn already_subscribed() -> CampusError {
        CampusErrorType::AlreadySubscribed.into()
    }

    /// A later sign-out or sign-in invalidated this operation's result
    pub fn superseded(operation: impl Into<String>) -> CampusError {
        CampusErrorType::Superseded {
            operation: operation.into(),
        }
        .into()
    }

    pub fn storage_failed(reason: impl fmt::Display) -> CampusError {
        CampusErrorType::StorageFailed {
            reason: reason.to_string(),
        }
        .into()
    }

    pub fn config_missing(key: impl Into<String>) -> CampusError {
        CampusErrorType::ConfigMissing { key: key.into() }.into()
    }

    pub fn config_invalid(key: impl Into<String>, reason: impl Into<String>) -> CampusError {
        CampusErrorType::ConfigInvalid {
            key: key.into(),
            reason: reason.into(),
        }
        .into()
    }

    /// Input rejected before any request was made
    pub fn invalid_input(field: &str, reason: &str) -> CampusError {
        CampusError::new(ErrorCode::InvalidInput)
            .message(format!("Invalid value for '{}'", field))
            .context(reason.to_string())
            .category(ErrorCategory::Validation)
            .severity(ErrorSeverity::Warning)
            .build()
    }
}
