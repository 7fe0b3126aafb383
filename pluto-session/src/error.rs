//! Session error types

use pluto_core::PlutoError;
use thiserror::Error;

/// Failure of a single call to the authentication service.
///
/// Non-2xx responses and transport failures are distinct variants here, but
/// the session manager funnels them into one failure path per operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("HTTP {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Status { status: u16, detail: Option<String> },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Invalid response body: {message}")]
    Decode { message: String },
}

impl ApiError {
    /// Server-provided message, if the server sent one
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// The server explicitly refused the credentials (401 or 403)
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::Status { status, .. } if *status == 401 || *status == 403)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode {
                message: err.to_string(),
            }
        } else {
            ApiError::Transport {
                message: err.to_string(),
            }
        }
    }
}

/// Errors surfaced to session consumers.
///
/// The credential variants display the bare server message so a login form
/// can show it inline.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{message}")]
    Authentication { message: String },

    #[error("{message}")]
    Registration { message: String },

    #[error("{message}")]
    PasswordReset { message: String },

    #[error("Core error: {0}")]
    Core(#[from] PlutoError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn registration<S: Into<String>>(message: S) -> Self {
        Self::Registration {
            message: message.into(),
        }
    }

    pub fn password_reset<S: Into<String>>(message: S) -> Self {
        Self::PasswordReset {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        let unauthorized = ApiError::Status {
            status: 401,
            detail: Some("Invalid authentication credentials".to_string()),
        };
        assert!(unauthorized.is_rejection());
        assert_eq!(
            unauthorized.detail(),
            Some("Invalid authentication credentials")
        );

        let server_error = ApiError::Status {
            status: 500,
            detail: None,
        };
        assert!(!server_error.is_rejection());
        assert_eq!(server_error.to_string(), "HTTP 500: no detail");

        let transport = ApiError::Transport {
            message: "connection refused".to_string(),
        };
        assert!(!transport.is_rejection());
        assert!(transport.detail().is_none());
    }

    #[test]
    fn test_credential_errors_display_bare_message() {
        let err = SessionError::authentication("Invalid credentials");
        assert_eq!(err.to_string(), "Invalid credentials");

        let err = SessionError::registration("Email already registered");
        assert_eq!(err.to_string(), "Email already registered");
    }
}
