use thiserror::Error;

use super::transport::TransportError;
use crate::auth::CredentialError;

/// Steps a person must take when the session cannot be recovered automatically
pub const AUTH_REMEDIATION: &str = "Authentication failed repeatedly. Please:
  1. Open PowerTrack in Chrome and log in
  2. Press F12, open the Network tab, right-click any /api/ request and choose Copy > Copy as fetch (Node.js)
  3. Paste it into the capture file (auth/mostRecentFetch.js by default)
  4. Re-run the command";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Authentication expired - still unauthorized after {attempts} attempts")]
    AuthExpired { attempts: u32 },

    #[error("403 Forbidden - check permissions for endpoint: {0}")]
    Forbidden(String),

    #[error("404 Not Found - endpoint may not exist: {0}")]
    NotFound(String),

    #[error("Server error {status} after {attempts} attempts")]
    ServerError { status: u16, attempts: u32 },

    #[error("Request failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("API error {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Max retries exceeded")]
    RetriesExhausted,
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        ApiError::InvalidConfig(e.to_string())
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..end],
                body.len()
            )
        }
    }

    /// Error for a status that ends the request immediately.
    ///
    /// Only meaningful for statuses that are never retried: 403, 404 and
    /// anything other than 200, 401 and 5xx.
    pub fn from_status(status: u16, endpoint: &str, body: &str) -> Self {
        match status {
            403 => ApiError::Forbidden(endpoint.to_string()),
            404 => ApiError::NotFound(endpoint.to_string()),
            _ => ApiError::UnexpectedStatus {
                status,
                body: Self::truncate_body(body),
            },
        }
    }

    /// Human guidance for failures that need manual intervention
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            ApiError::AuthExpired { .. } => Some(AUTH_REMEDIATION),
            _ => None,
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ApiError::from_status(403, "/api/x", ""),
            ApiError::Forbidden(e) if e == "/api/x"
        ));
        assert!(matches!(ApiError::from_status(404, "/api/x", ""), ApiError::NotFound(_)));
        assert!(matches!(
            ApiError::from_status(302, "/api/x", "moved"),
            ApiError::UnexpectedStatus { status: 302, body } if body == "moved"
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "é".repeat(400);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
        assert_eq!(ApiError::truncate_body("short"), "short");
    }

    #[test]
    fn test_remediation_only_for_auth() {
        let auth = ApiError::AuthExpired { attempts: 5 };
        assert!(auth.remediation().unwrap().contains("Copy as fetch"));
        assert!(ApiError::RetriesExhausted.remediation().is_none());
    }
}
