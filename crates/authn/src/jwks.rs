//! Publishable key set in JWKS form (RFC 7517, OKP keys per RFC 8037).

use serde::{Deserialize, Serialize};
use tokenward_storage::KeyId;

/// One public key as published for external verifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedKey {
    /// Key id, matching the `kid` header of tokens it verifies.
    pub kid: KeyId,
    /// Key type, always `OKP`.
    pub kty: String,
    /// Curve, always `Ed25519`.
    pub crv: String,
    /// Raw public key, base64url without padding.
    pub x: String,
    /// Signing algorithm, always `EdDSA`.
    pub alg: String,
    /// Intended use, always `sig`.
    #[serde(rename = "use")]
    pub key_use: String,
}

impl PublishedKey {
    /// Builds the JWK for an Ed25519 public key.
    pub fn ed25519(kid: KeyId, x: String) -> Self {
        Self {
            kid,
            kty: "OKP".to_owned(),
            crv: "Ed25519".to_owned(),
            x,
            alg: "EdDSA".to_owned(),
            key_use: "sig".to_owned(),
        }
    }
}

/// The full set of keys a verifier may encounter, current key first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedKeySet {
    /// Published keys.
    pub keys: Vec<PublishedKey>,
}

impl PublishedKeySet {
    /// Looks up a key by id.
    pub fn find(&self, kid: &str) -> Option<&PublishedKey> {
        self.keys.iter().find(|key| key.kid.as_str() == kid)
    }
}
