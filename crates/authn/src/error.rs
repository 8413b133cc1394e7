//! Authentication error types.
//!
//! This module defines errors that can occur while rotating signing keys,
//! issuing tokens, and verifying inbound tokens.

use thiserror::Error;

/// Errors raised by [`KeyAuthority`](crate::KeyAuthority) and
/// [`TokenCodec`](crate::TokenCodec).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The token could not be parsed, or a required claim is missing or malformed.
    #[error("Malformed token: {0}")]
    TokenMalformed(String),

    /// The signature does not match the token contents.
    #[error("Invalid token signature")]
    TokenSignatureInvalid,

    /// The token's `exp` is at or before the current instant.
    #[error("Token expired")]
    TokenExpired,

    /// The token was issued by someone else.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// The token's subject differs from the one the caller expected.
    #[error("Subject mismatch: expected '{expected}', got '{actual}'")]
    SubjectMismatch {
        /// Subject the caller required.
        expected: String,
        /// Subject carried by the token.
        actual: String,
    },

    /// The token was minted for a different purpose.
    #[error("Scope mismatch: expected {expected}, got {actual}")]
    ScopeMismatch {
        /// Scope the caller required.
        expected: String,
        /// Scope carried by the token.
        actual: String,
    },

    /// The header names an algorithm outside the accepted set.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// No signing key exists yet.
    #[error("No signing key available")]
    KeyUnavailable,

    /// The header names a key that is not (or no longer) retained.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// The `kid` from the token header.
        kid: String,
    },

    /// Generated or stored key material could not be loaded.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// The token could not be encoded or signed.
    #[error("Token encoding failed: {0}")]
    TokenEncoding(String),
}

impl AuthError {
    /// Creates a [`AuthError::TokenMalformed`] error.
    #[must_use]
    pub fn token_malformed(message: impl Into<String>) -> Self {
        Self::TokenMalformed(message.into())
    }

    /// Creates a [`AuthError::InvalidIssuer`] error.
    #[must_use]
    pub fn invalid_issuer(issuer: impl Into<String>) -> Self {
        Self::InvalidIssuer(issuer.into())
    }

    /// Creates a [`AuthError::UnsupportedAlgorithm`] error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates a [`AuthError::KeyNotFound`] error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a [`AuthError::InvalidKeyMaterial`] error.
    #[must_use]
    pub fn invalid_key_material(message: impl Into<String>) -> Self {
        Self::InvalidKeyMaterial(message.into())
    }

    /// Returns `true` for failures attributable to the presented token
    /// rather than to this service's key state.
    #[must_use]
    pub fn is_token_rejection(&self) -> bool {
        !matches!(self, Self::KeyUnavailable | Self::InvalidKeyMaterial(_) | Self::TokenEncoding(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => AuthError::TokenSignatureInvalid,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidIssuer => AuthError::invalid_issuer("Issuer validation failed"),
            ErrorKind::InvalidAlgorithm => {
                AuthError::unsupported_algorithm("Algorithm not supported")
            },
            ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                AuthError::invalid_key_material(err.to_string())
            },
            _ => AuthError::token_malformed(format!("JWT error: {err}")),
        }
    }
}

/// Result alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::token_malformed("bad").to_string(), "Malformed token: bad");
        assert_eq!(AuthError::TokenExpired.to_string(), "Token expired");
        assert_eq!(AuthError::key_not_found("k1").to_string(), "Signing key not found: k1");
        assert_eq!(
            AuthError::SubjectMismatch { expected: "a".into(), actual: "b".into() }.to_string(),
            "Subject mismatch: expected 'a', got 'b'"
        );
    }

    #[rstest]
    #[case(ErrorKind::InvalidSignature, "TokenSignatureInvalid")]
    #[case(ErrorKind::ExpiredSignature, "TokenExpired")]
    #[case(ErrorKind::InvalidIssuer, "InvalidIssuer")]
    #[case(ErrorKind::InvalidAlgorithm, "UnsupportedAlgorithm")]
    #[case(ErrorKind::InvalidToken, "TokenMalformed")]
    #[case(ErrorKind::InvalidKeyFormat, "InvalidKeyMaterial")]
    fn test_error_from_jsonwebtoken(#[case] kind: ErrorKind, #[case] expected: &str) {
        let auth_err: AuthError = JwtError::from(kind).into();
        let variant = format!("{auth_err:?}");
        assert!(variant.starts_with(expected), "expected {expected}, got {variant}");
    }

    #[test]
    fn test_token_rejection_classification() {
        assert!(AuthError::TokenExpired.is_token_rejection());
        assert!(AuthError::key_not_found("k").is_token_rejection());
        assert!(!AuthError::KeyUnavailable.is_token_rejection());
        assert!(!AuthError::invalid_key_material("x").is_token_rejection());
    }
}
