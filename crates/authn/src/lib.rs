//! # Tokenward Authentication
//!
//! Signing keys and session tokens for the tokenward credential lifecycle
//! engine.
//!
//! This crate provides:
//! - **Key authority**: Ed25519 key rotation over an atomically swapped key ring, with retention
//!   of superseded public keys and JWKS-style publication
//! - **Token codec**: issuance and verification of signed tokens with typed claims
//! - **Header validation**: algorithm and `kid` checks run before any key lookup
//!
//! ## Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use tokenward_authn::{IssueRequest, KeyAuthority, TokenCodec};
//! use tokenward_storage::{SessionId, SessionScope, SystemClock};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = Arc::new(KeyAuthority::builder().retention(Duration::from_secs(86_400)).build());
//! keys.rotate().await?;
//!
//! let codec = TokenCodec::new(keys.clone(), "tokenward", Arc::new(SystemClock));
//! let issued = codec.issue(
//!     &IssueRequest::builder()
//!         .user_id("u-1")
//!         .subject("alice@example.com")
//!         .session_id(SessionId::generate())
//!         .scope(SessionScope::Login)
//!         .ttl(Duration::from_secs(900))
//!         .build(),
//! )?;
//!
//! let claims = codec.verify(&issued.token, None)?;
//! println!("verified session {}", claims.sid);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Authentication error types.
pub mod error;
/// Publishable key set.
pub mod jwks;
/// Token issuance and verification.
pub mod jwt;
/// Signing key lifecycle.
pub mod key_authority;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
/// Header validation.
pub mod validation;

// Re-export key types for convenience
pub use error::{AuthError, Result};
pub use jwks::{PublishedKey, PublishedKeySet};
pub use jwt::{IssueRequest, IssuedToken, SessionClaims, TokenCodec};
pub use key_authority::{ActiveSigningKey, KeyAuthority, KeyRing, RetainedKey};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
