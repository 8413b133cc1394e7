//! Token header validation.
//!
//! Security checks run on the unverified header before any key lookup:
//! - Only EdDSA is accepted, to rule out algorithm substitution
//! - Symmetric algorithms and "none" are always rejected
//! - `kid` values are bounded and restricted to a safe character set

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted.
///
/// - `none`: No signature verification
/// - `HS256`, `HS384`, `HS512`: Symmetric algorithms (shared secret)
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted JWT algorithms. Keys minted by the key authority are Ed25519.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA"];

/// Maximum accepted length of a `kid` header, in bytes.
pub const MAX_KID_LENGTH: usize = 256;

/// Validate a JWT algorithm name against the accepted set.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is forbidden
/// or not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use tokenward_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("RS256").is_err());
/// assert!(validate_algorithm("HS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list (only EdDSA is supported)"
        )));
    }

    Ok(())
}

/// Validate the format of a `kid` header value.
///
/// Accepts non-empty values up to [`MAX_KID_LENGTH`] bytes made of ASCII
/// alphanumerics, `-`, `_` and `.`.
///
/// # Errors
///
/// Returns [`AuthError::TokenMalformed`] if the value is empty, too long, or
/// contains other characters.
///
/// # Examples
///
/// ```
/// use tokenward_authn::validation::validate_kid;
///
/// assert!(validate_kid("0190f0c2-7e4b-7c1d-9a55-2f1e0b7c9d10").is_ok());
/// assert!(validate_kid("../../etc/passwd").is_err());
/// ```
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::token_malformed("kid header is empty"));
    }
    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::token_malformed(format!(
            "kid header exceeds {MAX_KID_LENGTH} bytes"
        )));
    }
    if !kid.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')) {
        return Err(AuthError::token_malformed("kid header contains invalid characters"));
    }
    if kid.contains("..") {
        return Err(AuthError::token_malformed("kid header contains a path traversal sequence"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_algorithm_eddsa_accepted() {
        assert!(validate_algorithm("EdDSA").is_ok());
    }

    #[test]
    fn test_validate_algorithm_rs256_rejected() {
        let result = validate_algorithm("RS256");
        assert!(
            matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not in accepted list"))
        );
    }

    #[test]
    fn test_forbidden_algorithms_each_rejected_with_security_message() {
        for alg in FORBIDDEN_ALGORITHMS {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not allowed for security reasons")),
                "Expected security rejection for forbidden algorithm '{alg}'"
            );
        }
    }

    #[test]
    fn test_validate_kid_accepts_generated_ids() {
        let kid = tokenward_storage::KeyId::generate();
        assert!(validate_kid(kid.as_str()).is_ok());
        assert!(validate_kid("key_2026.01").is_ok());
    }

    #[test]
    fn test_validate_kid_rejects_bad_values() {
        assert!(validate_kid("").is_err());
        assert!(validate_kid(&"k".repeat(MAX_KID_LENGTH + 1)).is_err());
        assert!(validate_kid("key\0null").is_err());
        assert!(validate_kid("key/with/slash").is_err());
        assert!(validate_kid("..").is_err());
        assert!(validate_kid("a..b").is_err());
    }

    #[test]
    fn test_validate_kid_length_boundary() {
        assert!(validate_kid(&"k".repeat(MAX_KID_LENGTH)).is_ok());
    }
}
