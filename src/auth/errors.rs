//! # Auth Errors
//!
//! Error types for the identity module.

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication and identity errors
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    // ==================
    // Sign-in Errors
    // ==================
    /// User not found or wrong password (generic - don't leak whether email exists)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Email already registered
    #[error("Email already registered")]
    EmailAlreadyExists,

    /// Email is not a valid address
    #[error("Invalid email address")]
    InvalidEmail,

    /// Email not verified
    #[error("Email not verified")]
    EmailNotVerified,

    /// Password does not meet requirements
    #[error("Password does not meet requirements: {0}")]
    WeakPassword(String),

    /// Verification or recovery code is wrong or expired
    #[error("Invalid or expired code")]
    InvalidCode,

    // ==================
    // Token Errors
    // ==================
    /// Token is malformed
    #[error("Malformed token")]
    MalformedToken,

    /// Token has expired
    #[error("Token expired")]
    TokenExpired,

    /// Token signature is invalid
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Caller presented no token and guest identities are disabled
    #[error("Authentication required")]
    AuthenticationRequired,

    // ==================
    // Internal Errors
    // ==================
    /// Password hashing failed
    #[error("Internal error: password hashing failed")]
    HashingFailed,

    /// Token generation failed
    #[error("Internal error: token generation failed")]
    TokenGenerationFailed,

    /// Code delivery failed
    #[error("Code delivery failed: {0}")]
    DeliveryFailed(String),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl AuthError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            AuthError::WeakPassword(_) => 400,
            AuthError::InvalidEmail => 400,
            AuthError::MalformedToken => 400,
            AuthError::InvalidCode => 400,

            // 401 Unauthorized
            AuthError::InvalidCredentials => 401,
            AuthError::TokenExpired => 401,
            AuthError::InvalidSignature => 401,
            AuthError::AuthenticationRequired => 401,

            // 403 Forbidden
            AuthError::EmailNotVerified => 403,

            // 409 Conflict
            AuthError::EmailAlreadyExists => 409,

            // 500 Internal Server Error
            AuthError::HashingFailed => 500,
            AuthError::TokenGenerationFailed => 500,
            AuthError::DeliveryFailed(_) => 500,
            AuthError::StorageError(_) => 500,
        }
    }

    /// Stable error code for responses
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            AuthError::InvalidEmail => "INVALID_EMAIL",
            AuthError::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            AuthError::WeakPassword(_) => "WEAK_PASSWORD",
            AuthError::InvalidCode => "INVALID_CODE",
            AuthError::MalformedToken => "MALFORMED_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::InvalidSignature => "INVALID_SIGNATURE",
            AuthError::AuthenticationRequired => "AUTH_REQUIRED",
            AuthError::HashingFailed => "HASHING_FAILED",
            AuthError::TokenGenerationFailed => "TOKEN_GENERATION_FAILED",
            AuthError::DeliveryFailed(_) => "DELIVERY_FAILED",
            AuthError::StorageError(_) => "STORAGE_ERROR",
        }
    }

    /// Returns whether this error should be logged at warn level
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AuthError::InvalidCredentials.status_code(), 401);
        assert_eq!(AuthError::EmailNotVerified.status_code(), 403);
        assert_eq!(AuthError::EmailAlreadyExists.status_code(), 409);
        assert_eq!(AuthError::HashingFailed.status_code(), 500);
    }

    #[test]
    fn test_error_messages_do_not_leak_info() {
        let err = AuthError::InvalidCredentials;
        assert!(!err.to_string().contains("password"));
        assert!(!err.to_string().contains("email"));
    }

    #[test]
    fn test_client_errors() {
        assert!(AuthError::TokenExpired.is_client_error());
        assert!(!AuthError::StorageError("x".into()).is_client_error());
    }
}
