//! Signing key lifecycle: rotation, retention, lookup and publication.
//!
//! The [`KeyAuthority`] owns an immutable [`KeyRing`] snapshot. Rotation
//! builds a new snapshot and swaps the shared pointer, so a reader either
//! sees the ring before the rotation or after it, never a mix.
//!
//! ```text
//!   rotate()                         rotate()
//!      │                                │
//!      ▼                                ▼
//! ┌──────────┐  superseded_at  ┌──────────────┐  + retention  ┌────────┐
//! │ current  │────────────────►│   retained   │──────────────►│ pruned │
//! │ (signs)  │                 │ (verifies)   │ prune_retired │        │
//! └──────────┘                 └──────────────┘               └────────┘
//! ```
//!
//! Keys are Ed25519. The private half only ever exists for the current key
//! and is held as PKCS#8 DER inside the [`EncodingKey`].

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use fail::fail_point;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use parking_lot::RwLock;
use rand_core::OsRng;
use tokenward_storage::{
    Clock, KeyId, SystemClock,
    session::audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, NoopAuditLogger, key_resource},
};
use zeroize::Zeroizing;

use crate::{
    error::{AuthError, Result},
    jwks::{PublishedKey, PublishedKeySet},
};

/// Signing algorithm of every key minted by the authority.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::EdDSA;

/// PKCS#8 v1 prefix for a raw 32-byte Ed25519 private key.
const PKCS8_ED25519_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE, 46 bytes
    0x02, 0x01, 0x00, // INTEGER version 0
    0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING, 34 bytes
    0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
];

const AUDIT_ACTOR: &str = "key-authority";

/// The key currently used for signing.
#[derive(Clone)]
pub struct ActiveSigningKey {
    /// Key id, written into the `kid` header of every token it signs.
    pub kid: KeyId,
    /// Private signing key.
    pub encoding_key: EncodingKey,
    /// When the key was generated.
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for ActiveSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSigningKey")
            .field("kid", &self.kid)
            .field("encoding_key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Public half of a key, kept for verification after it stops signing.
#[derive(Clone)]
pub struct RetainedKey {
    /// Key id.
    pub kid: KeyId,
    /// Raw Ed25519 public key, base64url without padding (43 characters).
    pub public_key: String,
    /// Verification key derived from `public_key`.
    pub decoding_key: DecodingKey,
    /// When the key was generated.
    pub created_at: DateTime<Utc>,
    /// When a newer key replaced it; `None` while it is current.
    pub superseded_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for RetainedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedKey")
            .field("kid", &self.kid)
            .field("public_key", &self.public_key)
            .field("created_at", &self.created_at)
            .field("superseded_at", &self.superseded_at)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of every key the authority knows about.
///
/// `retained` is ordered newest first and includes the current key's
/// public half.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    current: Option<Arc<ActiveSigningKey>>,
    retained: Vec<Arc<RetainedKey>>,
    index: HashMap<KeyId, usize>,
}

impl KeyRing {
    fn from_parts(current: Option<Arc<ActiveSigningKey>>, retained: Vec<Arc<RetainedKey>>) -> Self {
        let index = retained.iter().enumerate().map(|(i, key)| (key.kid.clone(), i)).collect();
        Self { current, retained, index }
    }

    /// The key used for new signatures, if any rotation has happened.
    pub fn current(&self) -> Option<&Arc<ActiveSigningKey>> {
        self.current.as_ref()
    }

    /// Looks up a retained public key by id.
    pub fn get(&self, kid: &str) -> Option<&Arc<RetainedKey>> {
        self.index.get(&KeyId::from(kid)).and_then(|&i| self.retained.get(i))
    }

    /// Retained public keys, newest first.
    pub fn retained(&self) -> &[Arc<RetainedKey>] {
        &self.retained
    }

    /// Number of retained public keys.
    pub fn len(&self) -> usize {
        self.retained.len()
    }

    /// Returns `true` if no key has ever been generated.
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }
}

/// Owner of the signing key lifecycle.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use tokenward_authn::KeyAuthority;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let authority = KeyAuthority::builder().retention(Duration::from_secs(26 * 3600)).build();
/// let kid = authority.rotate().await?;
/// assert_eq!(authority.current_signing_key()?.kid, kid);
/// # Ok(())
/// # }
/// ```
pub struct KeyAuthority {
    ring: RwLock<Arc<KeyRing>>,
    retention: chrono::Duration,
    clock: Arc<dyn Clock>,
    audit_logger: Arc<dyn AuditLogger>,
}

#[bon::bon]
impl KeyAuthority {
    /// Creates an authority with an empty key ring.
    ///
    /// `retention` is how long a superseded key stays resolvable. It must be
    /// at least the longest token lifetime.
    #[builder]
    pub fn new(
        retention: Duration,
        clock: Option<Arc<dyn Clock>>,
        audit_logger: Option<Arc<dyn AuditLogger>>,
    ) -> Self {
        Self {
            ring: RwLock::new(Arc::new(KeyRing::default())),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
            audit_logger: audit_logger.unwrap_or_else(|| Arc::new(NoopAuditLogger)),
        }
    }
}

impl KeyAuthority {
    /// Returns the current key ring snapshot.
    ///
    /// The snapshot stays valid and consistent even if a rotation happens
    /// while the caller holds it.
    pub fn snapshot(&self) -> Arc<KeyRing> {
        Arc::clone(&self.ring.read())
    }

    /// Generates a new key pair and makes it current.
    ///
    /// The previous current key stays in the retained set, marked
    /// superseded, until [`prune_retired`](Self::prune_retired) drops it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyMaterial`] if the generated key cannot
    /// be loaded for signing or verification.
    #[tracing::instrument(skip(self))]
    pub async fn rotate(&self) -> Result<KeyId> {
        let result = self.rotate_inner();
        let (resource, audit_result) = match &result {
            Ok(kid) => (key_resource(kid), AuditResult::Success),
            Err(e) => (key_resource("-"), AuditResult::Failure(e.to_string())),
        };
        let event = AuditEvent::builder()
            .actor(AUDIT_ACTOR)
            .action(AuditAction::RotateKey)
            .resource(resource)
            .result(audit_result)
            .timestamp(self.clock.now())
            .build();
        self.audit_logger.log(&event).await;
        result
    }

    fn rotate_inner(&self) -> Result<KeyId> {
        fail_point!("key-authority-rotate", |_| {
            Err(AuthError::invalid_key_material("injected rotation failure"))
        });

        let generated = generate_keypair()?;
        let now = self.clock.now();
        let kid = KeyId::generate();

        let current = Arc::new(ActiveSigningKey {
            kid: kid.clone(),
            encoding_key: generated.encoding_key,
            created_at: now,
        });
        let public = Arc::new(RetainedKey {
            kid: kid.clone(),
            public_key: generated.public_key,
            decoding_key: generated.decoding_key,
            created_at: now,
            superseded_at: None,
        });

        let mut guard = self.ring.write();
        let mut retained = Vec::with_capacity(guard.retained.len() + 1);
        retained.push(public);
        for key in &guard.retained {
            if key.superseded_at.is_none() {
                let mut superseded = RetainedKey::clone(key);
                superseded.superseded_at = Some(now);
                retained.push(Arc::new(superseded));
            } else {
                retained.push(Arc::clone(key));
            }
        }
        let previous = guard.current.as_ref().map(|key| key.kid.clone());
        *guard = Arc::new(KeyRing::from_parts(Some(current), retained));
        drop(guard);

        tracing::info!(
            kid = %kid,
            previous_kid = ?previous,
            "Rotated signing key"
        );
        Ok(kid)
    }

    /// Returns the key to sign with.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyUnavailable`] if no rotation has happened yet.
    pub fn current_signing_key(&self) -> Result<Arc<ActiveSigningKey>> {
        self.snapshot().current().cloned().ok_or(AuthError::KeyUnavailable)
    }

    /// Resolves a retained public key by id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyNotFound`] if the key was never issued or has
    /// been pruned.
    pub fn public_key(&self, kid: &str) -> Result<Arc<RetainedKey>> {
        self.snapshot().get(kid).cloned().ok_or_else(|| AuthError::key_not_found(kid))
    }

    /// Returns every retained public key in publishable form, current first.
    pub fn publishable_key_set(&self) -> PublishedKeySet {
        let ring = self.snapshot();
        PublishedKeySet {
            keys: ring
                .retained()
                .iter()
                .map(|key| PublishedKey::ed25519(key.kid.clone(), key.public_key.clone()))
                .collect(),
        }
    }

    /// Drops superseded keys whose retention window has elapsed.
    ///
    /// The current key is never pruned. Returns the ids that were dropped.
    #[tracing::instrument(skip(self))]
    pub async fn prune_retired(&self) -> Vec<KeyId> {
        let now = self.clock.now();
        let retention = self.retention;

        let pruned: Vec<KeyId> = {
            let mut guard = self.ring.write();
            let (expired, kept): (Vec<_>, Vec<_>) =
                guard.retained.iter().cloned().partition(|key| {
                    key.superseded_at
                        .is_some_and(|at| at.checked_add_signed(retention).is_some_and(|end| end <= now))
                });
            if expired.is_empty() {
                return Vec::new();
            }
            *guard = Arc::new(KeyRing::from_parts(guard.current.clone(), kept));
            expired.into_iter().map(|key| key.kid.clone()).collect()
        };

        for kid in &pruned {
            tracing::info!(kid = %kid, "Pruned retired signing key");
            let event = AuditEvent::builder()
                .actor(AUDIT_ACTOR)
                .action(AuditAction::PruneKey)
                .resource(key_resource(kid))
                .result(AuditResult::Success)
                .timestamp(now)
                .build();
            self.audit_logger.log(&event).await;
        }
        pruned
    }
}

impl fmt::Debug for KeyAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.snapshot();
        f.debug_struct("KeyAuthority")
            .field("current", &ring.current().map(|key| &key.kid))
            .field("retained", &ring.len())
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

struct GeneratedKeyPair {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key: String,
}

fn generate_keypair() -> Result<GeneratedKeyPair> {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(Vec::with_capacity(PKCS8_ED25519_PREFIX.len() + 32));
    pkcs8_der.extend_from_slice(&PKCS8_ED25519_PREFIX);
    pkcs8_der.extend_from_slice(&*private_bytes);

    let encoding_key = EncodingKey::from_ed_der(&pkcs8_der);
    let decoding_key = DecodingKey::from_ed_components(&public_key)
        .map_err(|e| AuthError::invalid_key_material(format!("public key: {e}")))?;

    Ok(GeneratedKeyPair { encoding_key, decoding_key, public_key })
}
