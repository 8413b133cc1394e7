//! Token issuance and verification.
//!
//! Tokens are compact JWS (JWT) strings signed with the
//! [`KeyAuthority`](crate::KeyAuthority)'s current Ed25519 key. The header's
//! `kid` names the signing key; verification always resolves the key by
//! that id rather than assuming the current one.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use tokenward_authn::{IssueRequest, KeyAuthority, TokenCodec};
//! use tokenward_storage::{SessionId, SessionScope};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = Arc::new(KeyAuthority::builder().retention(Duration::from_secs(86_400)).build());
//! keys.rotate().await?;
//! let codec = TokenCodec::new(keys, "tokenward", Arc::new(tokenward_storage::SystemClock));
//!
//! let request = IssueRequest::builder()
//!     .user_id("u-1")
//!     .subject("alice@example.com")
//!     .session_id(SessionId::generate())
//!     .scope(SessionScope::Login)
//!     .ttl(Duration::from_secs(900))
//!     .build();
//! let issued = codec.issue(&request)?;
//!
//! let claims = codec.verify(&issued.token, Some("alice@example.com"))?;
//! assert_eq!(claims.uid.as_str(), "u-1");
//! # Ok(())
//! # }
//! ```

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use tokenward_storage::{Clock, KeyId, SessionId, SessionScope, UserId};

use crate::{
    error::{AuthError, Result},
    key_authority::{KeyAuthority, SIGNING_ALGORITHM},
    validation::{validate_algorithm, validate_kid},
};

/// Claims carried by every issued token.
///
/// All fields except `ext` are required; a token missing any of them, or
/// carrying one of the wrong type, fails to deserialize and is rejected
/// as malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Issuer.
    pub iss: String,
    /// Subject: the identity the user authenticated with.
    pub sub: String,
    /// Issued at (seconds since Unix epoch).
    pub iat: u64,
    /// Expiration (seconds since Unix epoch).
    pub exp: u64,
    /// Token id; equal to `sid`.
    pub jti: String,
    /// Session record this token is bound to.
    pub sid: SessionId,
    /// User the session belongs to.
    pub uid: UserId,
    /// What the token may be used for.
    pub scope: SessionScope,
    /// Caller-supplied extra claims.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ext: BTreeMap<String, serde_json::Value>,
}

impl SessionClaims {
    /// Expiration as a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.exp).ok().and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Parameters for [`TokenCodec::issue`].
#[derive(Debug, Clone, bon::Builder)]
pub struct IssueRequest {
    /// User the session belongs to.
    #[builder(into)]
    pub user_id: UserId,
    /// Identity the user authenticated with; becomes `sub`.
    #[builder(into)]
    pub subject: String,
    /// Session record the token is bound to.
    #[builder(into)]
    pub session_id: SessionId,
    /// What the token may be used for.
    pub scope: SessionScope,
    /// Lifetime; truncated to whole seconds.
    pub ttl: Duration,
    /// Extra claims, carried under `ext`.
    #[builder(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A freshly signed token.
#[derive(Clone)]
pub struct IssuedToken {
    /// The compact JWT.
    pub token: String,
    /// Key that signed it.
    pub kid: KeyId,
    /// When it stops verifying.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[REDACTED]")
            .field("kid", &self.kid)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Issues and verifies session tokens.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    keys: Arc<KeyAuthority>,
    issuer: String,
    clock: Arc<dyn Clock>,
    validation: Validation,
}

impl TokenCodec {
    /// Creates a codec signing with `keys` under the given issuer name.
    pub fn new(keys: Arc<KeyAuthority>, issuer: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        // Expiry and issuer are checked against the injected clock below.
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        Self { keys, issuer: issuer.into(), clock, validation }
    }

    /// The issuer name written into and required of every token.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The key authority backing this codec.
    pub fn key_authority(&self) -> &Arc<KeyAuthority> {
        &self.keys
    }

    /// Signs a token with the current key.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyUnavailable`] if no key has been generated yet
    /// - [`AuthError::TokenEncoding`] if signing fails
    #[tracing::instrument(skip(self, request), fields(sid = %request.session_id, scope = %request.scope))]
    pub fn issue(&self, request: &IssueRequest) -> Result<IssuedToken> {
        let signing_key = self.keys.current_signing_key()?;

        let iat = u64::try_from(self.clock.now().timestamp())
            .map_err(|_| AuthError::TokenEncoding("clock is before the Unix epoch".into()))?;
        let exp = iat
            .checked_add(request.ttl.as_secs())
            .ok_or_else(|| AuthError::TokenEncoding("expiry overflows".into()))?;
        let expires_at = i64::try_from(exp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| AuthError::TokenEncoding("expiry out of range".into()))?;

        let claims = SessionClaims {
            iss: self.issuer.clone(),
            sub: request.subject.clone(),
            iat,
            exp,
            jti: request.session_id.to_string(),
            sid: request.session_id.clone(),
            uid: request.user_id.clone(),
            scope: request.scope,
            ext: request.extra.clone(),
        };

        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(signing_key.kid.to_string());

        let token = encode(&header, &claims, &signing_key.encoding_key)
            .map_err(|e| AuthError::TokenEncoding(e.to_string()))?;

        Ok(IssuedToken { token, kid: signing_key.kid.clone(), expires_at })
    }

    /// Verifies a token's signature and claims.
    ///
    /// Checks, in order: structure and algorithm, key resolution by `kid`
    /// (the current key when the header has none), signature, issuer,
    /// claim consistency, expiry, and, when given, the subject.
    ///
    /// A token is valid only while `now < exp`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenMalformed`] for structural or claim-shape problems
    /// - [`AuthError::UnsupportedAlgorithm`] for anything but EdDSA
    /// - [`AuthError::KeyNotFound`] if the `kid` is not retained
    /// - [`AuthError::TokenSignatureInvalid`] if the signature does not verify
    /// - [`AuthError::InvalidIssuer`] if the issuer differs
    /// - [`AuthError::TokenExpired`] if `exp <= now`
    /// - [`AuthError::SubjectMismatch`] if `expected_subject` differs from `sub`
    #[tracing::instrument(skip(self, token))]
    pub fn verify(&self, token: &str, expected_subject: Option<&str>) -> Result<SessionClaims> {
        let result = self.verify_inner(token, expected_subject);
        if let Err(ref e) = result {
            tracing::debug!(error = %e, "Token verification failed");
        }
        result
    }

    /// Like [`verify`](Self::verify), additionally requiring a scope.
    ///
    /// # Errors
    ///
    /// Everything [`verify`](Self::verify) returns, plus
    /// [`AuthError::ScopeMismatch`].
    pub fn verify_scoped(
        &self,
        token: &str,
        scope: SessionScope,
        expected_subject: Option<&str>,
    ) -> Result<SessionClaims> {
        let claims = self.verify(token, expected_subject)?;
        if claims.scope != scope {
            return Err(AuthError::ScopeMismatch {
                expected: scope.to_string(),
                actual: claims.scope.to_string(),
            });
        }
        Ok(claims)
    }

    fn verify_inner(&self, token: &str, expected_subject: Option<&str>) -> Result<SessionClaims> {
        if token.split('.').count() != 3 {
            return Err(AuthError::token_malformed("JWT must have 3 parts separated by dots"));
        }

        // Algorithm check runs on the raw header so "none" is reported as
        // an unsupported algorithm rather than a parse failure.
        validate_algorithm(&header_algorithm(token)?)?;
        let header = decode_jwt_header(token)?;

        let ring = self.keys.snapshot();
        let key = match header.kid.as_deref() {
            Some(kid) => {
                validate_kid(kid)?;
                ring.get(kid).cloned().ok_or_else(|| AuthError::key_not_found(kid))?
            },
            None => {
                let current = ring.current().ok_or(AuthError::KeyUnavailable)?;
                ring.get(current.kid.as_str()).cloned().ok_or(AuthError::KeyUnavailable)?
            },
        };

        let claims = decode::<SessionClaims>(token, &key.decoding_key, &self.validation)?.claims;

        if claims.iss != self.issuer {
            return Err(AuthError::invalid_issuer(format!(
                "expected '{}', got '{}'",
                self.issuer, claims.iss
            )));
        }
        if claims.jti != claims.sid.as_str() {
            return Err(AuthError::token_malformed("jti does not match sid"));
        }
        if claims.iat > claims.exp {
            return Err(AuthError::token_malformed("iat is after exp"));
        }

        let now = self.clock.now().timestamp();
        if i64::try_from(claims.exp).is_ok_and(|exp| exp <= now) {
            return Err(AuthError::TokenExpired);
        }

        if let Some(expected) = expected_subject
            && claims.sub != expected
        {
            return Err(AuthError::SubjectMismatch {
                expected: expected.to_owned(),
                actual: claims.sub.clone(),
            });
        }

        Ok(claims)
    }
}

/// Decode a JWT header without verification.
///
/// # Errors
///
/// Returns [`AuthError::TokenMalformed`] if the header cannot be decoded.
pub fn decode_jwt_header(token: &str) -> Result<Header> {
    decode_header(token)
        .map_err(|e| AuthError::token_malformed(format!("Failed to decode JWT header: {e}")))
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

fn header_algorithm(token: &str) -> Result<String> {
    let segment = token
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::token_malformed("JWT header is empty"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::token_malformed(format!("Failed to decode JWT header: {e}")))?;
    let raw: RawHeader = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::token_malformed(format!("Failed to parse JWT header: {e}")))?;
    Ok(raw.alg)
}
