use std::fmt;
use thiserror::Error;

/// Stage of the callback exchange that was running when something failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Exchange,
    Federation,
    Signing,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Exchange => "token exchange",
            StageKind::Federation => "credential federation",
            StageKind::Signing => "url signing",
        };
        f.write_str(name)
    }
}

/// Why the object store could not produce a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningFailure {
    /// Store unreachable or answered with a server error
    Unavailable { message: String },
    /// The configured object does not exist
    NotFound { key: String },
    /// The federated role may not read the object
    Denied { message: String },
}

impl fmt::Display for SigningFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningFailure::Unavailable { message } => {
                write!(f, "object store unavailable: {}", message)
            }
            SigningFailure::NotFound { key } => write!(f, "object not found: {}", key),
            SigningFailure::Denied { message } => write!(f, "object store denied access: {}", message),
        }
    }
}

/// Errors that end a callback invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Malformed request: neither code nor error present")]
    MalformedRequest,

    #[error("Identity provider returned {error}")]
    Provider {
        error: String,
        description: Option<String>,
    },

    #[error("Authorization code exchange failed: {reason}")]
    AuthExchange { reason: String },

    #[error("Credential federation failed: {reason}")]
    Federation { reason: String },

    #[error("Signing failed: {0}")]
    Signing(SigningFailure),

    #[error("Timed out during {stage}")]
    Timeout { stage: StageKind },
}

impl CallbackError {
    pub fn provider(error: impl Into<String>, description: Option<String>) -> Self {
        Self::Provider {
            error: error.into(),
            description,
        }
    }

    pub fn auth_exchange(reason: impl Into<String>) -> Self {
        Self::AuthExchange {
            reason: reason.into(),
        }
    }

    pub fn federation(reason: impl Into<String>) -> Self {
        Self::Federation {
            reason: reason.into(),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::Signing(SigningFailure::Unavailable {
            message: message.into(),
        })
    }

    pub fn object_not_found(key: impl Into<String>) -> Self {
        Self::Signing(SigningFailure::NotFound { key: key.into() })
    }

    pub fn store_denied(message: impl Into<String>) -> Self {
        Self::Signing(SigningFailure::Denied {
            message: message.into(),
        })
    }

    pub fn timeout(stage: StageKind) -> Self {
        Self::Timeout { stage }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            CallbackError::MalformedRequest => 400,
            CallbackError::Provider { .. } => 400,
            CallbackError::AuthExchange { .. } => 401,
            CallbackError::Federation { .. } => 403,
            CallbackError::Signing(SigningFailure::NotFound { .. }) => 404,
            CallbackError::Signing(_) => 502,
            CallbackError::Timeout { .. } => 504,
        }
    }

    /// Machine-readable code returned to the caller
    pub fn code(&self) -> &'static str {
        match self {
            CallbackError::MalformedRequest => "malformed_request",
            CallbackError::Provider { .. } => "provider_error",
            CallbackError::AuthExchange { .. } => "auth_exchange_failed",
            CallbackError::Federation { .. } => "federation_failed",
            CallbackError::Signing(SigningFailure::Unavailable { .. }) => "store_unavailable",
            CallbackError::Signing(SigningFailure::NotFound { .. }) => "object_not_found",
            CallbackError::Signing(SigningFailure::Denied { .. }) => "store_denied",
            CallbackError::Timeout { .. } => "timeout",
        }
    }

    /// Only transient store failures are worth a second attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallbackError::Signing(SigningFailure::Unavailable { .. }))
    }

    /// Message shown to the end user. Downstream detail stays in the logs,
    /// except for the provider's own description which is passed through.
    pub fn public_message(&self) -> String {
        match self {
            CallbackError::MalformedRequest => {
                "The sign-in response did not contain an authorization code.".to_string()
            }
            CallbackError::Provider { error, description } => description
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| error.clone()),
            CallbackError::AuthExchange { .. } => {
                "The sign-in code was rejected or has already been used. Please sign in again."
                    .to_string()
            }
            CallbackError::Federation { .. } => {
                "Your account is not allowed to access this download.".to_string()
            }
            CallbackError::Signing(SigningFailure::NotFound { .. }) => {
                "The requested file is not available.".to_string()
            }
            CallbackError::Signing(_) => {
                "The file store could not be reached. Please try again shortly.".to_string()
            }
            CallbackError::Timeout { .. } => {
                "The request took too long to complete. Please try again.".to_string()
            }
        }
    }
}

pub type CallbackResult<T> = Result<T, CallbackError>;
