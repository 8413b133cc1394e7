//! Shared test utilities for authentication testing.
//!
//! Helpers for building a ready-to-sign key authority and codec, crafting
//! raw JWT strings for attack testing, and asserting on [`AuthError`]
//! variants. Feature-gated behind `testutil`.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tokenward-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tokenward_authn::testutil::{craft_raw_jwt, rotated_codec};
//! ```
//!
//! [`AuthError`]: crate::error::AuthError

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use tokenward_storage::Clock;

use crate::{jwt::TokenCodec, key_authority::KeyAuthority};

/// Issuer used by [`rotated_codec`].
pub const TEST_ISSUER: &str = "tokenward-test";

/// Creates a key authority that already has a current key, plus a codec
/// signing with it.
///
/// # Panics
///
/// Panics if the initial rotation fails.
pub async fn rotated_codec(
    clock: Arc<dyn Clock>,
    retention: Duration,
) -> (Arc<KeyAuthority>, TokenCodec) {
    let keys = Arc::new(KeyAuthority::builder().retention(retention).clock(clock.clone()).build());
    keys.rotate().await.expect("initial rotation");
    let codec = TokenCodec::new(keys.clone(), TEST_ISSUER, clock);
    (keys, codec)
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. Useful for testing rejection of malformed or
/// attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Asserts that a [`Result<T, AuthError>`] is an `Err` matching the given
/// [`AuthError`] variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tokenward_authn::assert_auth_error;
/// use tokenward_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
/// assert_auth_error!(result, TokenExpired);
/// ```
///
/// [`AuthError`]: crate::error::AuthError
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
